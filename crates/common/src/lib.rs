//! # sluice-common
//!
//! Cross-cutting pieces shared by the sluice binaries and services.

pub mod logging;
