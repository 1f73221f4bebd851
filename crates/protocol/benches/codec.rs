//! Benchmarks for the hub codecs
//!
//! Measures:
//! - LWP3 output command encoding and inbound message decoding
//! - NXT telegram encoding and reassembly of coalesced replies

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::lwp3::{OutputCommand, decode_message};
use protocol::nxt::{TelegramAssembler, command};

fn benchmark_lwp3(c: &mut Criterion) {
    let mut group = c.benchmark_group("lwp3");

    group.bench_function("encode_start_speed", |b| {
        b.iter(|| OutputCommand::start_speed(black_box(1), black_box(75)).encode())
    });

    let port_value = vec![0x08, 0x00, 0x45, 0x00, 0x68, 0x01, 0x00, 0x00];
    group.bench_function("decode_port_value", |b| {
        b.iter(|| decode_message(black_box(&port_value)))
    });

    let attach = vec![0x0f, 0x00, 0x04, 0x01, 0x01, 0x30, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
    group.bench_function("decode_attach", |b| {
        b.iter(|| decode_message(black_box(&attach)))
    });

    group.finish();
}

fn benchmark_nxt(c: &mut Criterion) {
    let mut group = c.benchmark_group("nxt");

    group.bench_function("encode_set_output_state", |b| {
        b.iter(|| {
            command::OutputStateCommand::run(black_box(0), black_box(60))
                .telegram()
                .encode()
        })
    });

    for count in [1usize, 8, 32].iter() {
        let mut stream = Vec::new();
        for _ in 0..*count {
            stream.extend_from_slice(&[0x05, 0x00, 0x02, 0x0b, 0x00, 0x70, 0x17]);
        }

        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("reassemble", count), &stream, |b, s| {
            b.iter(|| {
                let mut assembler = TelegramAssembler::new();
                assembler.feed(black_box(s))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_lwp3, benchmark_nxt);
criterion_main!(benches);
