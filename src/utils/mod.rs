//! Shared utilities: file IO, logging and test doubles

pub mod io;
pub mod logging;
pub mod test;
