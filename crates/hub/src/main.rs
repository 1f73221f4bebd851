//! lego-hub command line tool
//!
//! Connects to a Powered Up hub or an NXT brick through the configured
//! transport and runs one command against it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use common::setup_logging;
use hub::config::{HubConfig, HubProtocol, TransportKind};
use hub::session::{HubEvent, HubSession, Lwp3Session, NxtSession, Pattern, ScreenBuffer};
use hub::transport;
use protocol::lwp3::command::DEFAULT_END_STATE;
use protocol::nxt::{InputPort, OutputPort};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Time allowed for attach events and property replies after connecting
const SETTLE_TIME: Duration = Duration::from_secs(1);
/// Spacing of output and input reads while monitoring an NXT brick
const NXT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Vertical distance between lines drawn with `draw --text`
const TEXT_LINE_HEIGHT: i32 = 9;

#[derive(Parser, Debug)]
#[command(name = "lego-hub")]
#[command(
    author,
    version,
    about = "Drive LEGO Powered Up hubs and NXT bricks"
)]
#[command(long_about = "
Talks LWP3 to Powered Up, BOOST, SPIKE and Control+ hubs and direct commands
to NXT bricks, through a Scratch Link style relay or a local HTTP bridge.

EXAMPLES:
    # Show hub type, battery and attached devices
    lego-hub info

    # Run the motor on port A at 50% for two seconds
    lego-hub motor A 50 --time-ms 2000

    # Upload and start an NXT program
    lego-hub --protocol nxt upload prog.rxe
    lego-hub --protocol nxt run prog.rxe

    # Stream telemetry through the HTTP bridge
    lego-hub --transport bridge monitor

CONFIGURATION:
    1. Path specified with --config
    2. ~/.config/lego-hub/hub.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save the effective configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Hub family
    #[arg(long, value_enum, global = true)]
    protocol: Option<HubProtocol>,

    /// How to reach the hub
    #[arg(long, value_enum, global = true)]
    transport: Option<TransportKind>,

    /// HTTP bridge endpoint
    #[arg(long, value_name = "URL", global = true)]
    bridge_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print hub information
    Info,
    /// Print events until Ctrl+C
    Monitor,
    /// Run a motor
    Motor {
        /// Port letter (A-D) or LWP3 port number
        port: String,
        /// Power in percent, -100..=100
        #[arg(allow_negative_numbers = true)]
        power: i32,
        /// Stop after this many milliseconds
        #[arg(long)]
        time_ms: Option<u32>,
        /// Stop after turning this many degrees
        #[arg(long, conflicts_with = "time_ms", allow_negative_numbers = true)]
        degrees: Option<i32>,
    },
    /// Upload a file to the NXT brick
    Upload {
        file: PathBuf,
        /// Name on the brick; defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Start a program on the NXT brick
    Run { program: String },
    /// Stop every motor
    Stop,
    /// Play a tone on the NXT brick
    Beep {
        #[arg(long, default_value_t = 440)]
        frequency: u32,
        #[arg(long, default_value_t = 500)]
        duration_ms: u32,
    },
    /// Switch the Powered Up hub off
    Shutdown,
    /// Configure an NXT sensor port for a standard sensor
    Sensor {
        /// Sensor port (S1-S4)
        port: String,
        kind: SensorKind,
        /// Light: floodlight off. Sound: plain dB instead of dBA
        #[arg(long)]
        passive: bool,
    },
    /// Draw on the NXT screen
    Draw {
        /// Fill pattern: checkerboard, stripes-h, stripes-v, grid, dots, border, smile
        #[arg(long)]
        pattern: Option<Pattern>,
        /// Text drawn on top, one line per occurrence
        #[arg(long)]
        text: Vec<String>,
    },
    /// Save the NXT screen as a BMP image
    Screenshot { output: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SensorKind {
    Touch,
    Light,
    Sound,
    Ultrasonic,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HubConfig::load(Some(path.clone())).context("Failed to load configuration")?,
        None => HubConfig::load_or_default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    if args.save_config {
        let path = HubConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    setup_logging(&config.hub.log_level).context("Failed to setup logging")?;
    info!("lego-hub v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = args.command else {
        bail!("No command given, see --help");
    };

    let transport = transport::from_config(&config).context("Failed to create transport")?;
    let session = HubSession::new(&config, transport);
    session
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {} hub", config.hub.protocol))?;

    let result = run(&session, command).await;

    if let Err(e) = session.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    result
}

fn apply_overrides(config: &mut HubConfig, args: &Args) {
    if let Some(level) = &args.log_level {
        config.hub.log_level = level.clone();
    }
    if let Some(protocol) = args.protocol {
        config.hub.protocol = protocol;
    }
    if let Some(kind) = args.transport {
        config.transport.kind = kind;
    }
    if let Some(url) = &args.bridge_url {
        config.transport.bridge_url = url.clone();
    }
}

async fn run(session: &HubSession, command: Command) -> Result<()> {
    match command {
        Command::Info => match session {
            HubSession::PoweredUp(hub) => poweredup_info(hub).await,
            HubSession::Nxt(brick) => nxt_info(brick).await,
        },
        Command::Monitor => monitor(session).await,
        Command::Motor {
            port,
            power,
            time_ms,
            degrees,
        } => match session {
            HubSession::PoweredUp(hub) => poweredup_motor(hub, &port, power, time_ms, degrees).await,
            HubSession::Nxt(brick) => nxt_motor(brick, &port, power, time_ms, degrees).await,
        },
        Command::Upload { file, name } => {
            let brick = require_nxt(session)?;
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("Cannot derive a brick file name from {}", file.display()))?,
            };
            let progress = |p: hub::TransferProgress| {
                eprint!("\rUploading {}: {:3}%", name, p.percent());
            };
            let summary = brick
                .upload_file(&name, &data, Some(&progress))
                .await
                .context("Upload failed")?;
            eprintln!();
            println!(
                "Uploaded {} ({} bytes in {} chunks)",
                summary.filename, summary.bytes, summary.chunks
            );
            Ok(())
        }
        Command::Run { program } => {
            require_nxt(session)?
                .start_program(&program)
                .await
                .with_context(|| format!("Failed to start {}", program))
        }
        Command::Stop => {
            tokio::time::sleep(SETTLE_TIME).await;
            session
                .stop_all_motors()
                .await
                .context("Failed to stop motors")
        }
        Command::Beep {
            frequency,
            duration_ms,
        } => {
            require_nxt(session)?
                .play_tone(frequency, duration_ms)
                .await
                .context("Failed to play tone")?;
            tokio::time::sleep(Duration::from_millis(u64::from(duration_ms))).await;
            Ok(())
        }
        Command::Shutdown => match session.as_poweredup() {
            Some(hub) => hub.shutdown().await.context("Failed to switch hub off"),
            None => bail!("shutdown is only available for Powered Up hubs"),
        },
        Command::Sensor {
            port,
            kind,
            passive,
        } => {
            let brick = require_nxt(session)?;
            let port: InputPort = port.parse()?;
            let result = match kind {
                SensorKind::Touch => brick.setup_touch_sensor(port).await,
                SensorKind::Light => brick.setup_light_sensor(port, !passive).await,
                SensorKind::Sound => brick.setup_sound_sensor(port, !passive).await,
                SensorKind::Ultrasonic => brick.setup_ultrasonic_sensor(port).await,
            };
            result.with_context(|| format!("Failed to set up {:?} sensor on {}", kind, port))?;
            let values = brick.get_input_values(port).await?;
            println!("{}: raw {} scaled {}", port, values.raw, values.scaled);
            Ok(())
        }
        Command::Draw { pattern, text } => {
            let brick = require_nxt(session)?;
            let mut screen = ScreenBuffer::default();
            if let Some(pattern) = pattern {
                screen.pattern(pattern);
            }
            for (line, text) in (0..).zip(&text) {
                screen.text(text, 2, 2 + line * TEXT_LINE_HEIGHT);
            }
            brick
                .write_display(&screen)
                .await
                .context("Failed to write the screen")
        }
        Command::Screenshot { output } => {
            let screen = require_nxt(session)?
                .read_display()
                .await
                .context("Failed to read the screen")?;
            tokio::fs::write(&output, screen.to_bmp())
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Saved screen to {}", output.display());
            Ok(())
        }
    }
}

fn require_nxt(session: &HubSession) -> Result<&NxtSession> {
    session
        .as_nxt()
        .ok_or_else(|| anyhow!("this command needs --protocol nxt"))
}

async fn poweredup_info(hub: &Lwp3Session) -> Result<()> {
    tokio::time::sleep(SETTLE_TIME).await;
    let status = hub.status().await;

    println!("Hub:       {}", status.name());
    if let Some(firmware) = status.firmware {
        println!("Firmware:  {}", firmware);
    }
    if let Some(battery) = status.battery {
        println!("Battery:   {}%", battery);
    }
    if let Some(rssi) = status.rssi {
        println!("RSSI:      {} dBm", rssi);
    }
    for device in hub.devices().await {
        println!("Port {:>3}:  {}", device.port(), device.name());
    }
    Ok(())
}

async fn nxt_info(brick: &NxtSession) -> Result<()> {
    let info = brick
        .get_device_info()
        .await
        .context("Failed to read device info")?;
    let firmware = brick
        .get_firmware_version()
        .await
        .context("Failed to read firmware version")?;
    let battery = brick
        .get_battery_level()
        .await
        .context("Failed to read battery level")?;

    println!("Brick:     {}", info.name);
    println!("Address:   {}", info.address);
    println!("Firmware:  {} (protocol {})", firmware.firmware(), firmware.protocol());
    println!("Battery:   {} mV", battery);
    println!("Free flash: {} bytes", info.free_flash);
    match brick.get_current_program_name().await {
        Ok(name) => println!("Running:   {}", name),
        Err(_) => println!("Running:   none"),
    }
    Ok(())
}

fn lwp3_port(port: &str) -> Result<u8> {
    if let Ok(number) = port.parse::<u8>() {
        return Ok(number);
    }
    match port.trim().to_ascii_uppercase().as_str() {
        "A" => Ok(0),
        "B" => Ok(1),
        "C" => Ok(2),
        "D" => Ok(3),
        _ => bail!("invalid port '{}'", port),
    }
}

async fn poweredup_motor(
    hub: &Lwp3Session,
    port: &str,
    power: i32,
    time_ms: Option<u32>,
    degrees: Option<i32>,
) -> Result<()> {
    let port = lwp3_port(port)?;
    tokio::time::sleep(SETTLE_TIME).await;
    let motor = hub
        .device(port)
        .await
        .ok_or_else(|| anyhow!("nothing attached to port {}", port))?;

    match (time_ms, degrees) {
        (Some(ms), _) => {
            motor
                .start_speed_for_time(ms, power, DEFAULT_END_STATE)
                .await?;
            tokio::time::sleep(Duration::from_millis(u64::from(ms))).await;
        }
        (None, Some(degrees)) => {
            motor
                .start_speed_for_degrees(degrees, power, DEFAULT_END_STATE)
                .await?;
        }
        (None, None) => motor.start_speed(power).await?,
    }
    Ok(())
}

async fn nxt_motor(
    brick: &NxtSession,
    port: &str,
    power: i32,
    time_ms: Option<u32>,
    degrees: Option<i32>,
) -> Result<()> {
    let port: OutputPort = port.parse()?;
    match (time_ms, degrees) {
        (Some(ms), _) => {
            brick.set_motor_power(port, power).await?;
            tokio::time::sleep(Duration::from_millis(u64::from(ms))).await;
            brick.stop_motor(port, true).await?;
        }
        (None, Some(degrees)) => brick.run_motor_for_degrees(port, power, degrees).await?,
        (None, None) => brick.set_motor_power(port, power).await?,
    }
    Ok(())
}

async fn monitor(session: &HubSession) -> Result<()> {
    let mut events = session.subscribe();
    // NXT bricks only answer, so their state is polled
    let mut poll = tokio::time::interval(NXT_POLL_INTERVAL);
    println!("Monitoring, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = poll.tick(), if session.as_nxt().is_some() => {
                if let Some(brick) = session.as_nxt() {
                    poll_brick(brick).await;
                }
            }
            event = events.recv() => match event {
                Ok(HubEvent::Disconnected { reason }) => {
                    println!("Disconnected: {}", reason);
                    break;
                }
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

async fn poll_brick(brick: &NxtSession) {
    for port in OutputPort::ALL {
        if let Err(e) = brick.get_output_state(port).await {
            warn!("Reading output {} failed: {}", port, e);
        }
    }
    for port in InputPort::ALL {
        if let Err(e) = brick.get_input_values(port).await {
            warn!("Reading input {} failed: {}", port, e);
        }
    }
}

fn print_event(event: &HubEvent) {
    match event {
        HubEvent::Attached { port, type_id } => {
            println!("port {:>3} attached 0x{:02x}", port, type_id)
        }
        HubEvent::Detached { port } => println!("port {:>3} detached", port),
        HubEvent::Telemetry {
            port,
            quantity,
            reading,
        } => println!("port {:>3} {} = {}", port, quantity, reading),
        HubEvent::Property(update) => println!("property {:?}", update),
        HubEvent::Alert { alert, active } => println!("alert 0x{:02x} active={}", alert, active),
        HubEvent::HubError { command, code } => {
            println!("error 0x{:02x} for command 0x{:02x}", code, command)
        }
        HubEvent::MotorState(state) => println!("motor {} rotation {}", state.port, state.rotation_count),
        HubEvent::SensorValues(values) => println!("sensor {} scaled {}", values.port, values.scaled),
        HubEvent::Connected | HubEvent::Disconnected { .. } | HubEvent::Feedback { .. } => {}
    }
}
