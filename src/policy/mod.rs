//! Control policies.
//!
//! Each policy is a [`ControlStateMachine`](crate::fsm::ControlStateMachine)
//! built by its module's `build_machine`, run over a
//! [`PolicyContext`](crate::fsm::context::PolicyContext) whose board holds
//! the policy's devices and reading ids.
//!
//! | policy           | node       | states |
//! |------------------|------------|--------|
//! | `transfer`       | G6 → G4    | 7      |
//! | `topup`          | G3 mains   | 2      |
//! | `valve_station`  | VALVE12    | 1      |

pub mod readings;
pub mod topup;
pub mod transfer;
pub mod valve_station;

pub use readings::{ZoneReadings, ZoneSnapshot};
pub use topup::{TopUpBoard, TopUpState};
pub use transfer::{FlowDirection, TransferBoard, TransferState};
pub use valve_station::{StationBoard, StationState};
