//! Application core: the node service and its port boundary.
//!
//! The tick loop, restart-by-name persistence and event reporting live
//! here.  All interaction with the shared database, the analog bus, the
//! clock and local storage happens through the **port traits** in
//! [`ports`], so the whole service runs against in-memory adapters in tests.

pub mod events;
pub mod ports;
pub mod service;

pub use events::NodeEvent;
pub use service::{MachineRecord, NodeService};
