//! Request correlation under concurrency, timeouts and link loss

use std::sync::Arc;
use std::time::Duration;

use hub::correlator::{CorrelationMode, RequestCorrelator, ResolveOutcome};
use hub::HubError;
use proptest::prelude::*;

mod id_mode {
    use super::*;

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let correlator = Arc::new(RequestCorrelator::<u64>::new(
            CorrelationMode::Id,
            Duration::from_secs(5),
        ));

        let mut waiters = Vec::new();
        for _ in 0..20 {
            let request = correlator.register(0).await;
            let id = request.id;
            let correlator = correlator.clone();
            waiters.push((id, tokio::spawn(async move { correlator.wait(request).await })));
        }

        for (id, _) in waiters.iter().rev() {
            assert_eq!(
                correlator.resolve_id(*id, Ok(*id * 10)).await,
                ResolveOutcome::Delivered
            );
        }
        for (id, waiter) in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), id * 10);
        }
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_error_result_is_delivered() {
        let correlator = RequestCorrelator::<u8>::new(CorrelationMode::Id, Duration::from_secs(5));
        let request = correlator.register(0).await;
        let id = request.id;

        correlator
            .resolve_id(id, Err(HubError::Relay {
                code: -32000,
                message: "peripheral gone".to_string(),
            }))
            .await;

        let Err(HubError::Relay { code, .. }) = correlator.wait(request).await else {
            panic!("expected the relay error");
        };
        assert_eq!(code, -32000);
    }

    #[tokio::test]
    async fn test_dropped_calls_do_not_accumulate() {
        let correlator = RequestCorrelator::<u8>::new(CorrelationMode::Id, Duration::from_secs(5));
        for _ in 0..50 {
            drop(correlator.register(0).await);
        }
        let live = correlator.register(0).await;
        assert_eq!(correlator.pending_count().await, 1);
        correlator.resolve_id(live.id, Ok(5)).await;
        assert_eq!(correlator.wait(live).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_cancelled_request_is_forgotten() {
        let correlator = RequestCorrelator::<u8>::new(CorrelationMode::Id, Duration::from_secs(5));
        let request = correlator.register(0).await;
        let id = request.id;

        correlator.cancel(request).await;
        assert_eq!(correlator.pending_count().await, 0);
        assert_eq!(
            correlator.resolve_id(id, Ok(1)).await,
            ResolveOutcome::Unmatched
        );
    }
}

mod fifo_mode {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_head_does_not_block_queue() {
        let correlator = Arc::new(RequestCorrelator::<u8>::new(
            CorrelationMode::Fifo,
            Duration::from_millis(5000),
        ));
        let first = correlator.register(0x0b).await;
        let second = correlator.register(0x06).await;

        let Err(HubError::Timeout(_)) = correlator.wait(first).await else {
            panic!("first request should time out");
        };
        assert_eq!(correlator.pending_count().await, 1);

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.wait(second).await })
        };
        assert_eq!(
            correlator.resolve_next(0x06, Ok(9)).await,
            ResolveOutcome::Delivered
        );
        assert_eq!(waiter.await.unwrap().unwrap(), 9);
    }

    #[tokio::test]
    async fn test_reply_skips_unanswered_head_of_other_opcode() {
        let correlator = Arc::new(RequestCorrelator::<u8>::new(
            CorrelationMode::Fifo,
            Duration::from_secs(5),
        ));
        let _unanswered = correlator.register(0x0b).await;
        let battery = correlator.register(0x06).await;

        assert_eq!(
            correlator.resolve_next(0x06, Ok(42)).await,
            ResolveOutcome::Delivered
        );
        assert_eq!(correlator.wait(battery).await.unwrap(), 42);
        assert_eq!(correlator.pending_count().await, 1);
        assert_eq!(
            correlator.resolve_next(0x06, Ok(1)).await,
            ResolveOutcome::Stale
        );
    }

    #[tokio::test]
    async fn test_same_opcode_resolves_oldest_first() {
        let correlator = RequestCorrelator::<u8>::new(CorrelationMode::Fifo, Duration::from_secs(5));
        let first = correlator.register(0x0d).await;
        let _other = correlator.register(0x06).await;
        let second = correlator.register(0x0d).await;

        correlator.resolve_next(0x0d, Ok(1)).await;
        correlator.resolve_next(0x0d, Ok(2)).await;
        assert_eq!(correlator.wait(first).await.unwrap(), 1);
        assert_eq!(correlator.wait(second).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_does_not_block_queue() {
        let correlator = Arc::new(RequestCorrelator::<u8>::new(
            CorrelationMode::Fifo,
            Duration::from_secs(5),
        ));
        let abandoned = correlator.register(0x0d).await;
        let gave_up = tokio::time::timeout(
            Duration::from_millis(100),
            correlator.wait(abandoned),
        )
        .await;
        assert!(gave_up.is_err());

        let next = correlator.register(0x0d).await;
        assert_eq!(correlator.pending_count().await, 1);
        assert_eq!(
            correlator.resolve_next(0x0d, Ok(7)).await,
            ResolveOutcome::Delivered
        );
        assert_eq!(correlator.wait(next).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_fail_all_then_reuse() {
        let correlator = RequestCorrelator::<u8>::new(CorrelationMode::Fifo, Duration::from_secs(5));
        let lost = correlator.register(0x0d).await;
        assert_eq!(correlator.fail_all().await, 1);
        let Err(HubError::ConnectionLost) = correlator.wait(lost).await else {
            panic!("expected ConnectionLost");
        };

        let fresh = correlator.register(0x0d).await;
        correlator.resolve_next(0x0d, Ok(3)).await;
        assert_eq!(correlator.wait(fresh).await.unwrap(), 3);
    }

    proptest! {
        #[test]
        fn prop_replies_reach_requests_in_send_order(commands in prop::collection::vec(any::<u8>(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            runtime.block_on(async {
                let correlator =
                    RequestCorrelator::<usize>::new(CorrelationMode::Fifo, Duration::from_secs(5));
                let mut requests = Vec::new();
                for &command in &commands {
                    requests.push(correlator.register(command).await);
                }
                for (index, &command) in commands.iter().enumerate() {
                    prop_assert_eq!(
                        correlator.resolve_next(command, Ok(index)).await,
                        ResolveOutcome::Delivered
                    );
                }
                for (index, request) in requests.into_iter().enumerate() {
                    prop_assert_eq!(correlator.wait(request).await.unwrap(), index);
                }
                prop_assert_eq!(correlator.pending_count().await, 0);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
