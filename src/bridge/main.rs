// Forza Haptics Bridge - Forza telemetry to controller rumble and impulse triggers
//
// Submits a rumble request through the haptics session at a fixed rate and
// drives an Xbox-family controller's motors and impulse triggers.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use haptics_bridge::common::{
    feedback::{FeedbackOutput, VibrationRequest, MOTOR_CEILING, TRIGGER_CEILING},
    session::HapticsSession,
    settings::AppSettings,
    sink::{ActuatorSink, TracingSink, XboxHidSink},
    util::BridgeResult,
    worker::TelemetryWorker,
};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// In game: Settings > HUD and Gameplay > Data Out = On,
// Data Out IP Address = 127.0.0.1, Data Out IP Port = 9999

const DEFAULT_REQUEST: f32 = 0.2;
const DEFAULT_RATE_HZ: u32 = 60;
const STATS_INTERVAL: Duration = Duration::from_secs(5);
const TEST_STEP: Duration = Duration::from_millis(500);
const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "haptics-bridge")]
#[command(about = "Forza telemetry to controller rumble and impulse trigger bridge")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on (overrides the settings file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bridge telemetry to the controller (default)
    Run {
        /// Left motor request submitted every tick
        #[arg(long, default_value_t = DEFAULT_REQUEST)]
        left: f32,

        /// Right motor request submitted every tick
        #[arg(long, default_value_t = DEFAULT_REQUEST)]
        right: f32,

        /// Requests per second
        #[arg(long, default_value_t = DEFAULT_RATE_HZ)]
        rate: u32,
    },
    /// Print decoded telemetry as it arrives
    Dump,
    /// Pulse motors and triggers without the game running
    Test {
        /// Repeat the pattern until interrupted
        #[arg(short, long)]
        continuous: bool,
    },
    /// Write a settings file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn open_sink() -> Box<dyn ActuatorSink + Send> {
    match XboxHidSink::open() {
        Ok(sink) => Box::new(sink),
        Err(err) => {
            warn!(%err, "no controller, logging feedback instead");
            Box::new(TracingSink::new())
        }
    }
}

async fn run_bridge(
    settings: AppSettings,
    settings_path: Option<PathBuf>,
    request: VibrationRequest,
    rate: u32,
) -> BridgeResult {
    let session = HapticsSession::new(&settings, settings_path, open_sink());
    info!(
        address = %session.worker().bind_addr(),
        left = request.left_motor,
        right = request.right_motor,
        rate,
        "starting haptics bridge"
    );

    let mut ticker = interval(Duration::from_secs_f64(1.0 / f64::from(rate.max(1))));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats_ticker = interval(STATS_INTERVAL);
    let mut settings_ticker = interval(SETTINGS_POLL_INTERVAL);
    if let Some(path) = session.settings_path() {
        info!(path = ?path, "edits to the settings file are applied while running");
    }
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                // HID writes block the calling thread.
                tokio::task::block_in_place(|| session.set_vibration(request));
            }
            _ = settings_ticker.tick() => {
                session.reload_if_modified();
            }
            _ = stats_ticker.tick() => {
                let stats = session.worker().stats();
                info!(
                    engaged = session.is_engaged(),
                    packets = stats.packets,
                    short_packets = stats.short_packets,
                    rejected_packets = stats.rejected_packets,
                    receive_errors = stats.receive_errors,
                    "bridge status"
                );
            }
        }
    }

    info!("shutting down");
    session.shutdown();
    Ok(())
}

async fn dump_telemetry(settings: AppSettings) -> BridgeResult {
    let worker = TelemetryWorker::new(settings.telemetry.socket_addr());
    worker.start()?;

    let mut ticker = interval(Duration::from_millis(50));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_sequence = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let (sequence, state) = worker.latest_with_sequence();
                if sequence == last_sequence {
                    continue;
                }
                last_sequence = sequence;
                println!(
                    "# rpm {:>7.0} ({:.2})  slip {:>5.2}  impact {:>6.2}  gear {}  speed {:>6.1}",
                    state.current_engine_rpm,
                    state.normalized_rpm,
                    state.slip,
                    state.collision_magnitude,
                    state.gear,
                    state.speed,
                );
            }
        }
    }

    worker.stop();
    Ok(())
}

async fn run_test_pattern(sink: &mut XboxHidSink) -> BridgeResult {
    let levels = [0.0, 0.25, 0.5, 0.75, 1.0];
    let step = |level: f32| FeedbackOutput {
        left_motor: level * MOTOR_CEILING,
        right_motor: level * MOTOR_CEILING,
        left_trigger: level * TRIGGER_CEILING,
        right_trigger: level * TRIGGER_CEILING,
    };

    info!("ramping motors and triggers up");
    for level in levels {
        sink.apply(&step(level))?;
        sleep(TEST_STEP).await;
    }

    info!("ramping motors and triggers down");
    for level in levels.iter().rev() {
        sink.apply(&step(*level))?;
        sleep(TEST_STEP).await;
    }
    Ok(())
}

async fn test_feedback(continuous: bool) -> BridgeResult {
    let mut sink = XboxHidSink::open()?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            result = run_test_pattern(&mut sink) => result?,
        }
        if !continuous {
            break;
        }
    }

    sink.apply(&FeedbackOutput::OFF)
}

fn init_config(settings_path: Option<PathBuf>, force: bool) -> BridgeResult {
    let path = match settings_path {
        Some(path) => path,
        None => AppSettings::config_path()?,
    };
    if path.exists() && !force {
        info!(path = ?path, "settings file already exists, use --force to overwrite");
        return Ok(());
    }
    AppSettings::default().save_to(&path)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings_path = match cli.config {
        Some(path) => Some(path),
        None => match AppSettings::config_path() {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(%err, "settings file unavailable");
                None
            }
        },
    };
    let mut settings = settings_path
        .as_deref()
        .map(AppSettings::load_or_default)
        .unwrap_or_default();
    settings.telemetry.port = settings.effective_port(cli.port);

    let command = cli.command.unwrap_or(Commands::Run {
        left: DEFAULT_REQUEST,
        right: DEFAULT_REQUEST,
        rate: DEFAULT_RATE_HZ,
    });
    let result = match command {
        Commands::Run { left, right, rate } => {
            let request = VibrationRequest::new(left.clamp(0.0, 1.0), right.clamp(0.0, 1.0));
            run_bridge(settings, settings_path, request, rate).await
        }
        Commands::Dump => dump_telemetry(settings).await,
        Commands::Test { continuous } => test_feedback(continuous).await,
        Commands::InitConfig { force } => init_config(settings_path, force),
    };

    if let Err(err) = result {
        error!(%err, "haptics bridge failed");
        std::process::exit(1);
    }
}
