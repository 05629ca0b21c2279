//! Fastboot protocol plumbing: binary resolution, supervised command execution,
//! and device enumeration.
//!
//! Everything that touches the external protocol binary goes through the
//! `CommandRunner` trait. `CommandExecutor` is the production implementation;
//! tests substitute a scripted runner.

pub mod commands;
pub mod discovery;
pub mod executor;
pub mod locator;

pub use commands::FastbootCommand;
pub use discovery::{parse_device_list, DeviceDiscovery, DeviceScanCache, PROTOCOL_MODE_MARKER};
pub use executor::{
    CommandExecutor, CommandInvocation, CommandResult, CommandRunner, ExecutorOptions,
    InvocationHandle, InvocationId, DEFAULT_COMMAND_TIMEOUT,
};
pub use locator::{BinaryLocator, FASTBOOT_BINARY};
