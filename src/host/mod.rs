//! # Module host.
//!
//! - [`HostBuilder`] / [`Host`]: module lifecycle and shutdown orchestration
//! - [`Module`] / [`Kernel`]: what a module implements and what it is given
//! - [`HostConfig`]: grace period and failure policies

mod config;
#[allow(clippy::module_inception)]
mod host;
mod module;
mod signal;

pub use config::{CriticalPolicy, HostConfig, StartPolicy};
pub use host::{Host, HostBuilder, ShutdownReport};
pub use module::{Kernel, Module, ShutdownHandle};
