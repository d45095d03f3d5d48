//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                   |
//! |----------------|--------------------|-------------------------------|
//! | `memory_store` | PersistencePort    | In-memory shared database     |
//! | `file_store`   | ConfigPort         | JSON config file              |
//! |                | StoragePort        | Per-record files on disk      |
//! | `sim`          | AnalogBus          | Scripted converter channels   |
//! |                | OutputPin          | Simulated digital lines       |
//! | `clock`        | Clock              | Host local time / fixed time  |
//! | `log_sink`     | EventSink          | `log` facade                  |

pub mod clock;
pub mod file_store;
pub mod log_sink;
pub mod memory_store;
pub mod sim;
