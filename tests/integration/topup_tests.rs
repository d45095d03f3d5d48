//! Daily top-up run through the node service with an override file on
//! disk and a settable clock.

use std::fs;

use chrono::NaiveTime;

use waterctl::adapters::clock::FixedClock;
use waterctl::adapters::memory_store::MemoryStore;
use waterctl::app::service::NodeService;
use waterctl::arbitrator::{DeviceKey, DeviceLockRecord};
use waterctl::config::TopUpSchedule;
use waterctl::devices::SwitchDevice;
use waterctl::fsm::context::{NodeContext, PolicyContext};
use waterctl::policy::topup::{self, TopUpBoard, TopUpState};

use super::mock_hw::{MockStorage, RecordingPin, RecordingSink, arbiter, now, publish_zone};

type Board = TopUpBoard<SwitchDevice<RecordingPin>, FixedClock>;

struct Node {
    store: MemoryStore,
    pin: RecordingPin,
    clock: FixedClock,
    dir: tempfile::TempDir,
    svc: NodeService<TopUpState, MemoryStore, Board>,
    storage: MockStorage,
    sink: RecordingSink,
}

impl Node {
    fn new() -> Self {
        let store = MemoryStore::new();
        let pin = RecordingPin::new();
        let clock = FixedClock::at(13, 0);
        let dir = tempfile::tempdir().unwrap();
        let board = TopUpBoard::standard(
            SwitchDevice::new("S0", pin.clone()),
            clock.clone(),
            TopUpSchedule::default(),
            dir.path().join("S0"),
        )
        .unwrap();
        let ctx = PolicyContext::new(arbiter("G3", &store), NodeContext::new(), board);
        let svc = NodeService::new(topup::build_machine(), ctx, TopUpState::Idle).unwrap();
        let mut node = Self {
            store,
            pin,
            clock,
            dir,
            svc,
            storage: MockStorage::default(),
            sink: RecordingSink::new(),
        };
        node.svc.start(&mut node.storage, &mut node.sink);
        node
    }

    fn at(&self, h: u32, m: u32) {
        self.clock.set(NaiveTime::from_hms_opt(h, m, 0).unwrap());
    }

    fn set_override(&self, word: &str) {
        fs::write(self.dir.path().join("S0"), word).unwrap();
    }

    fn tick(&mut self) -> TopUpState {
        self.svc.tick(now(), &mut self.storage, &mut self.sink);
        self.svc.state().unwrap()
    }
}

#[test]
fn a_day_of_topping_up() {
    let mut node = Node::new();
    publish_zone(&node.store, "G3", 200, false, false);
    assert!(!node.pin.is_high());

    // Low all morning, but nothing happens before the window.
    assert_eq!(node.tick(), TopUpState::Idle);

    node.at(14, 0);
    assert_eq!(node.tick(), TopUpState::ToppingUp);
    assert!(node.pin.is_high());

    node.at(14, 20);
    publish_zone(&node.store, "G3", 420, false, false);
    assert_eq!(node.tick(), TopUpState::ToppingUp);

    publish_zone(&node.store, "G3", 510, false, false);
    assert_eq!(node.tick(), TopUpState::Idle);
    assert!(!node.pin.is_high());

    // Still inside the day but past the start window: no restart.
    publish_zone(&node.store, "G3", 450, false, false);
    node.at(14, 30);
    assert_eq!(node.tick(), TopUpState::Idle);

    let required: Vec<_> = node
        .store
        .events()
        .into_iter()
        .filter(|e| e.text.starts_with("New device state required"))
        .map(|e| e.text)
        .collect();
    assert_eq!(
        required,
        vec![
            "New device state required: G3:S0: disable".to_owned(),
            "New device state required: G3:S0: enable".to_owned(),
            "New device state required: G3:S0: disable".to_owned(),
        ]
    );
}

#[test]
fn high_switch_alone_counts_as_topped_up() {
    let mut node = Node::new();
    publish_zone(&node.store, "G3", 100, false, false);
    node.at(14, 1);
    assert_eq!(node.tick(), TopUpState::ToppingUp);
    publish_zone(&node.store, "G3", 100, true, false);
    assert_eq!(node.tick(), TopUpState::Idle);
}

#[test]
fn override_file_takes_the_solenoid_out_of_automatic_control() {
    let mut node = Node::new();
    publish_zone(&node.store, "G3", 900, false, false);
    node.at(22, 0);

    node.set_override("on\n");
    assert_eq!(node.tick(), TopUpState::ToppingUp);
    assert!(node.pin.is_high());

    node.set_override("auto\n");
    assert_eq!(node.tick(), TopUpState::Idle);
    assert!(!node.pin.is_high());
}

#[test]
fn remote_override_defers_to_the_lock_record() {
    let mut node = Node::new();
    publish_zone(&node.store, "G3", 900, false, false);
    node.at(22, 0);
    node.set_override("remote/off");

    assert_eq!(node.tick(), TopUpState::Idle);

    node.store
        .force_lock(DeviceKey::new("G3", "S0"), DeviceLockRecord::locked("NAS", "on"));
    assert_eq!(node.tick(), TopUpState::ToppingUp);

    node.store
        .force_lock(DeviceKey::new("G3", "S0"), DeviceLockRecord::locked("NAS", "bogus"));
    // Unusable request falls back to the file's `off`.
    assert_eq!(node.tick(), TopUpState::Idle);
}

#[test]
fn contradicting_switches_never_start_a_top_up() {
    let mut node = Node::new();
    publish_zone(&node.store, "G3", 100, true, true);
    node.at(14, 1);
    assert_eq!(node.tick(), TopUpState::Idle);
    assert!(!node.pin.is_high());
    let events = node.store.events();
    assert!(events.iter().any(|e| e.text == "G1 sensors contradict"));
    assert!(
        events
            .iter()
            .any(|e| e.text.starts_with("Control logic stalled in TTUIdleState"))
    );
}

#[test]
fn solenoid_is_written_every_tick() {
    let mut node = Node::new();
    publish_zone(&node.store, "G3", 900, false, false);
    node.pin.clear();
    node.tick();
    node.tick();
    assert_eq!(node.pin.writes(), vec![false, false]);
}
