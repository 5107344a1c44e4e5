//! Helpers shared by the metacollector binaries: logging setup and build
//! version information.

pub mod logging;
pub mod version;
