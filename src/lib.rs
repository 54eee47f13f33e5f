//! Developer bridge between a debugger and a device host.
//!
//! Moves large payloads over a message transport with a hard size ceiling:
//! app bundles are sideloaded from the debugger to the host, and screenshots,
//! heap snapshots and installed-content listings are pushed back from the
//! host. Reinstalls ship only what changed since the last install.
//!
//! - [`transfer`]: token-keyed stream buffers, chunked writes, stream receivers
//! - [`install`]: install orchestration (debugger) and acceptance (host)
//! - [`bundle`]: bundle archives, manifests, content listings, partial bundles
//! - [`rpc`]: method surface and the transport seams
//! - [`debugger`] / [`host`]: the two endpoints of a connection

pub mod bundle;
pub mod capabilities;
pub mod config;
pub mod debugger;
pub mod error;
pub mod host;
pub mod install;
pub mod rpc;
pub mod transfer;

pub use capabilities::{Capabilities, WireEncoding};
pub use config::BridgeConfig;
pub use debugger::Debugger;
pub use error::{BridgeError, Result};
pub use host::{Host, HostServices};
pub use install::{ComponentKind, InstallOptions, InstallResult, InstallType};
