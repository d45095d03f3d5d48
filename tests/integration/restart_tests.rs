//! Restart by name: a node rebuilt over the same state directory resumes
//! in its persisted state and re-asserts the same outputs.

use waterctl::adapters::file_store::FileStore;
use waterctl::adapters::memory_store::MemoryStore;
use waterctl::app::events::NodeEvent;
use waterctl::app::service::{NodeService, RECORD_NAMESPACE};
use waterctl::app::ports::StoragePort;
use waterctl::arbitrator::{DeviceKey, DeviceLockRecord};
use waterctl::config::TransferLevels;
use waterctl::fsm::context::{NodeContext, PolicyContext};
use waterctl::policy::transfer::{self, TransferBoard, TransferState};

use super::mock_hw::{RecordingSink, arbiter, now, publish_zone};

type Service = NodeService<TransferState, MemoryStore, TransferBoard>;

fn service(store: &MemoryStore) -> Service {
    let board = TransferBoard::standard(TransferLevels::default()).unwrap();
    let ctx = PolicyContext::new(arbiter("G6", store), NodeContext::new(), board);
    NodeService::new(transfer::build_machine(), ctx, TransferState::Init).unwrap()
}

fn files(dir: &tempfile::TempDir) -> FileStore {
    FileStore::new(dir.path().join("node.json"), dir.path().join("state"))
}

fn valve(store: &MemoryStore) -> Option<DeviceLockRecord> {
    store.lock(&DeviceKey::new("VALVE12", "V12"))
}

#[test]
fn resumes_persisted_state_with_same_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    publish_zone(&store, "G6", 600, false, false);
    publish_zone(&store, "G4", 750, false, false);

    let before = {
        let mut storage = files(&dir);
        let mut svc = service(&store);
        svc.start(&mut storage, &mut RecordingSink::new());
        for _ in 0..3 {
            svc.tick(now(), &mut storage, &mut RecordingSink::new());
        }
        assert_eq!(svc.state(), Some(TransferState::G4NearlyFilled));
        valve(&store)
    };

    // Outputs drift while the node is down.
    store.force_lock(
        DeviceKey::new("VALVE12", "V12"),
        DeviceLockRecord::locked("G6", "0%"),
    );

    let mut storage = files(&dir);
    let mut sink = RecordingSink::new();
    let mut svc = service(&store);
    assert_eq!(svc.start(&mut storage, &mut sink), 30);
    assert_eq!(svc.state(), Some(TransferState::G4NearlyFilled));
    assert_eq!(svc.node().tick(), 3);
    assert_eq!(valve(&store), before);
    assert_eq!(
        sink.events[0],
        NodeEvent::Started {
            machine: transfer::MACHINE_NAME,
            state: "TransferG4NearlyFilledState",
            resumed: true,
        }
    );

    svc.tick(now(), &mut storage, &mut sink);
    assert_eq!(store.tick("G6"), Some(4));
}

#[test]
fn unknown_persisted_name_falls_back_to_init() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let mut storage = files(&dir);

    let record = waterctl::app::MachineRecord {
        machine: transfer::MACHINE_NAME.to_owned(),
        state: "TransferG4HalfFullState".to_owned(),
        tick: 9,
    };
    storage
        .write(
            RECORD_NAMESPACE,
            transfer::MACHINE_NAME,
            &postcard::to_allocvec(&record).unwrap(),
        )
        .unwrap();

    let mut svc = service(&store);
    assert_eq!(svc.start(&mut storage, &mut RecordingSink::new()), 15);
    assert_eq!(svc.state(), Some(TransferState::Init));
    assert_eq!(svc.node().tick(), 9);
    assert_eq!(valve(&store), None);
}

#[test]
fn every_state_resumes_by_name() {
    for state in [
        TransferState::G4Overfilled,
        TransferState::G4Filled,
        TransferState::G4VeryNearlyFilled,
        TransferState::G4NearlyFilled,
        TransferState::G4Filling,
        TransferState::G6Empty,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        publish_zone(&store, "G6", 600, false, false);
        publish_zone(&store, "G4", 500, false, false);
        let mut storage = files(&dir);
        let record = waterctl::app::MachineRecord {
            machine: transfer::MACHINE_NAME.to_owned(),
            state: waterctl::fsm::StateKey::name(state).to_owned(),
            tick: 1,
        };
        storage
            .write(
                RECORD_NAMESPACE,
                transfer::MACHINE_NAME,
                &postcard::to_allocvec(&record).unwrap(),
            )
            .unwrap();

        let mut svc = service(&store);
        svc.start(&mut storage, &mut RecordingSink::new());
        assert_eq!(svc.state(), Some(state));
        assert!(valve(&store).is_some(), "{state:?} drives the valve on entry");
    }
}
