//! waterctl node binary.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  FileStore        MemoryStore      SimAnalogBus   SimPin       │
//! │  (Config+Storage) (Persistence)    (AnalogBus)    (OutputPin)  │
//! │  SystemClock      LogEventSink                                 │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  NodeService (tick loop) · ControlStateMachine         │    │
//! │  │  Arbitrator · policy (transfer | top-up | valve station)│   │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  ValveServo thread · ProbeDecoder thread                       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! With no vendor bus crate in the stack the node runs against simulated
//! converter channels and digital lines.  The shared database is the
//! in-memory store.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info, warn};
use tracing_subscriber::EnvFilter;

use waterctl::adapters::clock::SystemClock;
use waterctl::adapters::file_store::FileStore;
use waterctl::adapters::log_sink::LogEventSink;
use waterctl::adapters::memory_store::MemoryStore;
use waterctl::adapters::sim::{SimAnalogBus, SimPin};
use waterctl::app::ports::ConfigPort;
use waterctl::app::service::NodeService;
use waterctl::arbitrator::{Arbitrator, DeviceKey, RetryPolicy};
use waterctl::config::{NodeConfig, PolicyKind};
use waterctl::devices::gate_valve::{ServoOutputs, ServoTiming, ValveServo};
use waterctl::devices::level_probe::ProbeDecoder;
use waterctl::devices::{Device, ManagedGateValve, ManagedLevelProbe, SwitchDevice};
use waterctl::error::Error;
use waterctl::fsm::StateKey;
use waterctl::fsm::context::{NodeContext, PolicyContext};
use waterctl::policy::topup::{self, TopUpBoard, TopUpState};
use waterctl::policy::transfer::{self, TransferBoard, TransferState};
use waterctl::policy::valve_station::{self, StationBoard, StationState};
use waterctl::reading::ReadingId;

/// Device id of the gate valve a valve station owns.
const STATION_VALVE: &str = "V12";

#[derive(Parser, Debug)]
#[command(name = "waterctl", version, about = "Water-management control node")]
struct Args {
    /// Node configuration (JSON).  Defaults apply when the file is absent.
    #[arg(long, default_value = "waterctl.json")]
    config: PathBuf,

    /// Directory for machine records that survive a restart.
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Everything a policy needs besides its board.
struct NodeParts {
    store: MemoryStore,
    node: Arc<NodeContext>,
    bus: Arc<Mutex<SimAnalogBus>>,
    probe: Arc<ManagedLevelProbe>,
}

impl NodeParts {
    fn arbiter(&self, cfg: &NodeConfig) -> Arbitrator<MemoryStore> {
        Arbitrator::new(
            cfg.site_id.as_str(),
            self.store.clone(),
            RetryPolicy {
                attempts: cfg.remote_retries,
                pause: Duration::from_millis(cfg.remote_retry_pause_ms),
            },
        )
    }
}

fn run_service<S: StateKey, X>(
    mut svc: NodeService<S, MemoryStore, X>,
    probe: Arc<ManagedLevelProbe>,
    storage: &mut FileStore,
) -> Result<()> {
    svc.monitor(Device::LevelProbe(probe));
    let clock = SystemClock::new();
    match svc.run(|| clock.now(), storage, &mut LogEventSink::new()) {
        Ok(()) => Ok(()),
        Err(Error::Halted) => bail!("node halted after a fatal device fault"),
        Err(e) => Err(e).context("node service failed"),
    }
}

/// Build the configured policy and tick it until exit.  Background loops the
/// policy owns are stopped and joined before this returns.
fn run_policy(cfg: &NodeConfig, parts: &NodeParts, files: &mut FileStore) -> Result<()> {
    match cfg.policy {
        PolicyKind::Transfer => {
            let board = TransferBoard::standard(cfg.transfer)?;
            let ctx = PolicyContext::new(parts.arbiter(cfg), parts.node.clone(), board);
            let svc = NodeService::new(transfer::build_machine(), ctx, TransferState::Init)?;
            run_service(svc, parts.probe.clone(), files)
        }
        PolicyKind::TopUp => {
            let solenoid = SwitchDevice::new("S0", SimPin::new());
            let board = TopUpBoard::standard(
                solenoid,
                SystemClock::new(),
                cfg.topup,
                cfg.override_file.clone(),
            )?;
            let ctx = PolicyContext::new(parts.arbiter(cfg), parts.node.clone(), board);
            let svc = NodeService::new(topup::build_machine(), ctx, TopUpState::Idle)?;
            run_service(svc, parts.probe.clone(), files)
        }
        PolicyKind::ValveStation => {
            let valve = Arc::new(ManagedGateValve::new(STATION_VALVE, cfg.valve));
            let outputs = ServoOutputs {
                forward: SimPin::new(),
                reverse: SimPin::new(),
                clutch: SimPin::new(),
            };
            {
                let mut bus = parts
                    .bus
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                bus.attach_motor(
                    cfg.valve_position_channel,
                    outputs.forward.clone(),
                    outputs.reverse.clone(),
                    0.02,
                    cfg.valve.ref_voltage,
                );
            }
            let servo = ValveServo::new(
                valve.clone(),
                parts.bus.clone(),
                cfg.valve_position_channel,
                outputs,
                parts.node.clone(),
                ServoTiming {
                    hold: Duration::from_millis(cfg.servo_hold_period_ms),
                    drive: Duration::from_millis(cfg.servo_drive_period_ms),
                },
            );
            let servo_handle = servo.spawn().context("spawning the valve servo")?;

            let key = DeviceKey::new(cfg.site_id.as_str(), STATION_VALVE);
            let ctx = PolicyContext::new(
                parts.arbiter(cfg),
                parts.node.clone(),
                StationBoard::new(valve, key),
            );
            let result = NodeService::new(valve_station::build_machine(), ctx, StationState::Following)
                .map_err(anyhow::Error::from)
                .and_then(|svc| run_service(svc, parts.probe.clone(), files));

            // The servo releases its clutch on the way out.
            parts.node.request_exit();
            match servo_handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(fault)) => error!("CRITICAL: valve servo stopped: {}", fault),
                Err(_) => warn!("valve servo thread panicked"),
            }
            result
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("waterctl v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Configuration ──────────────────────────────────────
    let mut files = FileStore::new(&args.config, &args.state_dir);
    let cfg = files
        .load()
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!("site {} running the {:?} policy", cfg.site_id, cfg.policy);

    // ── 2. Shared parts ───────────────────────────────────────
    let probe_id: ReadingId = cfg
        .probe_reading_id
        .parse()
        .context("probe_reading_id")?;
    let parts = NodeParts {
        store: MemoryStore::new(),
        node: NodeContext::new(),
        bus: Arc::new(Mutex::new(SimAnalogBus::new())),
        probe: Arc::new(ManagedLevelProbe::new(probe_id, cfg.probe.clone())),
    };

    // ── 3. Ctrl-C / SIGTERM ───────────────────────────────────
    let exit = Arc::clone(&parts.node);
    ctrlc::set_handler(move || {
        info!("exit requested by signal");
        exit.request_exit();
    })
    .context("installing the exit handler")?;

    // ── 4. Level decoder loop ─────────────────────────────────
    let decoder = ProbeDecoder::new(
        parts.probe.clone(),
        parts.bus.clone(),
        cfg.probe_channels,
        parts.node.clone(),
        Duration::from_millis(cfg.decoder_period_ms),
    );
    let decoder_handle = decoder.spawn().context("spawning the level decoder")?;

    // ── 5. Policy ─────────────────────────────────────────────
    let result = run_policy(&cfg, &parts, &mut files);

    // ── 6. Shutdown ───────────────────────────────────────────
    parts.node.request_exit();
    if decoder_handle.join().is_err() {
        warn!("level decoder thread panicked");
    }
    info!("waterctl stopped");
    result
}
