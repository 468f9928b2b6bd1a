//! promon - process monitoring aggregator library.
//!
//! Independent measurement modules sample a monitored process at their own
//! pace; the session merges their buffers into one column-aligned table.
//! This library backs the `promon` binary:
//! - [`module`] - the module contract, sample buffers and worker threads
//! - [`sources`] - built-in modules (`procstat`, `sysstat`, `top`, `nethogs`, `iperf3`)
//! - [`aggregate`] - direct and timestamp-aligned row synthesis
//! - [`supervisor`] - target and module liveness, the tick loop, shutdown

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod module;
pub mod procfs;
pub mod sink;
pub mod sources;
pub mod supervisor;
