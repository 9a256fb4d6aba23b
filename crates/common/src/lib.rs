//! Common utilities for botodisp
//!
//! Shared error handling and logging setup used by the driver library and
//! its command line front end.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::setup_logging;
