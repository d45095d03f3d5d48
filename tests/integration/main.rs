//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a cross-module scenario
//! against the in-memory store and mock adapters.  No hardware required.

mod arbitration_tests;
mod mock_hw;
mod restart_tests;
mod topup_tests;
mod transfer_tests;
mod valve_station_tests;
