//! Process-level setup.
//!
//! The engine itself needs no global state; this module only offers logger
//! initialization for binaries and tests that embed it.

mod logger;

pub use logger::init_logger_with;
