//! A transfer node requests a valve position; the valve station picks it
//! up from the lock record and its servo drives the simulated motor into
//! the band.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use waterctl::adapters::memory_store::MemoryStore;
use waterctl::adapters::sim::{SimAnalogBus, SimPin};
use waterctl::app::events::NodeEvent;
use waterctl::app::service::NodeService;
use waterctl::arbitrator::DeviceKey;
use waterctl::config::ValveGeometry;
use waterctl::devices::gate_valve::{Drive, ServoOutputs, ServoTiming, ValveServo};
use waterctl::devices::{ManagedGateValve, Positionable};
use waterctl::fsm::context::{NodeContext, PolicyContext};
use waterctl::policy::valve_station::{self, StationBoard, StationState};

use super::mock_hw::{MockStorage, RecordingSink, arbiter, now};

const CHANNEL: u8 = 2;

struct Station {
    valve: Arc<ManagedGateValve>,
    forward: SimPin,
    reverse: SimPin,
    clutch: SimPin,
    node: Arc<NodeContext>,
    servo: ValveServo<SimAnalogBus, SimPin, SimPin, SimPin>,
}

impl Station {
    fn new() -> Self {
        let valve = Arc::new(ManagedGateValve::new("V12", ValveGeometry::default()));
        let (forward, reverse, clutch) = (SimPin::new(), SimPin::new(), SimPin::new());
        let node = NodeContext::new();
        let mut bus = SimAnalogBus::new();
        // One percent of travel per read.
        bus.attach_motor(CHANNEL, forward.clone(), reverse.clone(), 0.033, 3.3);
        let servo = ValveServo::new(
            Arc::clone(&valve),
            Arc::new(Mutex::new(bus)),
            CHANNEL,
            ServoOutputs {
                forward: forward.clone(),
                reverse: reverse.clone(),
                clutch: clutch.clone(),
            },
            Arc::clone(&node),
            ServoTiming {
                hold: Duration::ZERO,
                drive: Duration::ZERO,
            },
        );
        Self {
            valve,
            forward,
            reverse,
            clutch,
            node,
            servo,
        }
    }

    /// Cycle until the servo holds.  Returns the number of drive cycles.
    fn settle(&mut self) -> usize {
        for n in 0..500 {
            if self.servo.cycle().unwrap() == Drive::Hold {
                return n;
            }
        }
        panic!("servo never settled");
    }
}

#[test]
fn station_follows_transfer_request() {
    let store = MemoryStore::new();
    let mut station = Station::new();

    let key = DeviceKey::new("VALVE12", "V12");
    let mut ctx = PolicyContext::new(
        arbiter("VALVE12", &store),
        NodeContext::new(),
        StationBoard::new(Arc::clone(&station.valve), key.clone()),
    );
    let mut fsm = valve_station::build_machine();
    fsm.enter(StationState::Following, &mut ctx);

    let mut g6 = arbiter("G6", &store);
    assert_eq!(g6.request_control(&key, "50%"), Ok(true));
    fsm.tick(&mut ctx, 15);
    assert_eq!(station.valve.requested_position(), 50);

    assert!(station.settle() > 0);
    let band = station.valve.band();
    assert_eq!((band.low, band.high), (45, 55));
    let measured = station.valve.measured_position().unwrap();
    assert!(band.contains(measured), "measured {measured}");
    assert!(!station.forward.is_high() && !station.reverse.is_high());
    assert!(station.clutch.is_high());

    g6.request_control(&key, "0%").unwrap();
    fsm.tick(&mut ctx, 15);
    station.settle();
    let measured = station.valve.measured_position().unwrap();
    assert!(measured <= 3, "measured {measured}");
    assert_eq!(
        store.status("VALVE12").as_deref(),
        Some("Position requested: 0")
    );
}

#[test]
fn released_valve_keeps_last_position() {
    let store = MemoryStore::new();
    let mut station = Station::new();
    let key = DeviceKey::new("VALVE12", "V12");
    let mut ctx = PolicyContext::new(
        arbiter("VALVE12", &store),
        NodeContext::new(),
        StationBoard::new(Arc::clone(&station.valve), key.clone()),
    );
    let mut fsm = valve_station::build_machine();
    fsm.enter(StationState::Following, &mut ctx);

    let mut g6 = arbiter("G6", &store);
    g6.request_control(&key, "25%").unwrap();
    fsm.tick(&mut ctx, 15);
    station.settle();

    g6.release_control(&key).unwrap();
    fsm.tick(&mut ctx, 15);
    assert_eq!(station.valve.requested_position(), 25);
    assert_eq!(
        store.status("VALVE12").as_deref(),
        Some("Position requested: None")
    );
    assert_eq!(station.settle(), 0);
}

#[test]
fn shutdown_releases_clutch_last() {
    let mut station = Station::new();
    station.valve.set_position(100);
    station.servo.cycle().unwrap();
    assert!(station.forward.is_high() && station.clutch.is_high());
    station.servo.shutdown();
    assert!(!station.forward.is_high());
    assert!(!station.reverse.is_high());
    assert!(!station.clutch.is_high());
}

#[test]
fn exit_request_mid_run_stops_the_node_with_the_clutch_released() {
    let store = MemoryStore::new();
    let Station {
        valve,
        forward,
        reverse,
        clutch,
        node,
        servo,
    } = Station::new();

    let key = DeviceKey::new("VALVE12", "V12");
    arbiter("G6", &store).request_control(&key, "100%").unwrap();

    let servo_handle = servo.spawn().unwrap();
    let ctx = PolicyContext::new(
        arbiter("VALVE12", &store),
        Arc::clone(&node),
        StationBoard::new(Arc::clone(&valve), key),
    );
    let mut svc =
        NodeService::new(valve_station::build_machine(), ctx, StationState::Following).unwrap();
    svc.set_second(Duration::from_millis(1));

    // Stand-in for the signal handler: exit once the motor is engaged.
    let watcher = {
        let clutch = clutch.clone();
        let node = Arc::clone(&node);
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !clutch.is_high() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            node.request_exit();
        })
    };

    let mut storage = MockStorage::default();
    let mut sink = RecordingSink::new();
    assert!(svc.run(now, &mut storage, &mut sink).is_ok());
    watcher.join().unwrap();
    assert_eq!(servo_handle.join().unwrap(), Ok(()));

    assert_eq!(valve.requested_position(), 100);
    assert!(!forward.is_high());
    assert!(!reverse.is_high());
    assert!(!clutch.is_high());
    assert!(matches!(sink.events.last(), Some(NodeEvent::Stopped { .. })));
}
