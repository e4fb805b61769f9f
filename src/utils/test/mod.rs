//! Test utilities
//!
//! A recording warehouse double and small data fixtures shared by unit and
//! integration tests.


pub use fixtures::{at, id_batch};
pub use recording::{Dispatch, RecordingWarehouse};
