//! Buildsync CLI library - daemon, socket protocol and client
//!
//! The `bsync` binary is a thin layer over these modules; integration tests
//! drive them directly.

pub mod daemon;
pub mod ipc;
pub mod locks;
pub mod util;
