//! Stagehand Tools - locating, fetching and running external executables
//!
//! - [`resolve`] finds binaries through overrides, the search path and
//!   fallback directories.
//! - [`command`] spawns processes, drains their output concurrently and
//!   returns a structured [`CommandResult`].
//! - [`acquire`] downloads a missing tool into a project-local directory.
//! - [`sink`] receives output lines mirrored while a process runs.

pub mod acquire;
pub mod command;
pub mod error;
pub mod resolve;
pub mod sink;

pub use acquire::{current_platform, ToolAcquirer, ToolSpec};
pub use command::{run, Command, CommandResult, EXIT_CANCELED, EXIT_UNAVAILABLE};
pub use error::{Result, ToolError};
pub use resolve::{default_cache_dir, executable_name, find, BinaryResolver};
pub use sink::{CollectingSink, LineSink, OutputStream, TracingSink};

pub use tokio_util::sync::CancellationToken;
