//! Two zones competing for one gate valve through the shared store.

use waterctl::adapters::memory_store::MemoryStore;
use waterctl::arbitrator::{DeviceKey, LockStatus};

use super::mock_hw::arbiter;

fn valve() -> DeviceKey {
    DeviceKey::new("VALVE12", "V12")
}

#[test]
fn first_zone_wins_second_is_refused() {
    let store = MemoryStore::new();
    let mut g6 = arbiter("G6", &store);
    let mut g5 = arbiter("G5", &store);

    assert_eq!(g6.request_control(&valve(), "50%"), Ok(true));
    assert_eq!(g5.request_control(&valve(), "100%"), Ok(false));

    let record = store.lock(&valve()).unwrap();
    assert_eq!(record.status(), LockStatus::Locked);
    assert_eq!(record.owner(), Some("G6"));
    assert_eq!(record.requested(), "50%");
}

#[test]
fn owner_may_change_its_request() {
    let store = MemoryStore::new();
    let mut g6 = arbiter("G6", &store);

    assert_eq!(g6.request_control(&valve(), "25%"), Ok(true));
    assert_eq!(g6.request_control(&valve(), "100%"), Ok(true));
    assert_eq!(store.lock(&valve()).unwrap().requested(), "100%");
}

#[test]
fn release_hands_the_valve_over() {
    let store = MemoryStore::new();
    let mut g6 = arbiter("G6", &store);
    let mut g5 = arbiter("G5", &store);

    g6.request_control(&valve(), "50%").unwrap();
    // Only the owner's release counts.
    g5.release_control(&valve()).unwrap();
    assert_eq!(store.lock(&valve()).unwrap().owner(), Some("G6"));

    g6.release_control(&valve()).unwrap();
    let record = store.lock(&valve()).unwrap();
    assert_eq!(record.status(), LockStatus::Unlocked);
    assert_eq!(record.request(), None);

    assert_eq!(g5.request_control(&valve(), "0%"), Ok(true));
    assert_eq!(store.lock(&valve()).unwrap().owner(), Some("G5"));
}

#[test]
fn events_are_logged_per_site() {
    let store = MemoryStore::new();
    let mut g6 = arbiter("G6", &store);
    g6.request_control(&valve(), "50%").unwrap();
    g6.request_control(&valve(), "50%").unwrap();
    g6.release_control(&valve()).unwrap();

    let texts: Vec<_> = store
        .events()
        .into_iter()
        .filter(|e| e.site == "G6")
        .map(|e| e.text)
        .collect();
    assert_eq!(
        texts,
        vec![
            "Taking control of VALVE12:V12, Request: 50%".to_owned(),
            "Releasing control of VALVE12:V12".to_owned(),
        ]
    );
}

#[test]
fn outage_surfaces_as_remote_error_and_leaves_record() {
    let store = MemoryStore::new();
    let mut g6 = arbiter("G6", &store);
    g6.request_control(&valve(), "50%").unwrap();

    store.set_offline(true);
    assert!(g6.request_control(&valve(), "0%").is_err());
    store.set_offline(false);
    assert_eq!(store.lock(&valve()).unwrap().requested(), "50%");
}
