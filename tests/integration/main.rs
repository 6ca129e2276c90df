//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives a full `Client` through one
//! flow against recording mock ports. All tests run on the host with no
//! network required.

mod connection_tests;
mod provisioning_flow_tests;
mod telemetry_tests;
mod time_sync_tests;
