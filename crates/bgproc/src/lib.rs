//! # bgproc
//!
//! Run a process in the background and wait until it says it is ready.
//!
//! The [`Supervisor`] spawns the child, copies its output line by line into a
//! [`LineBuffer`], lets the caller wait (with a timeout) for a line matching a
//! predicate, and terminates the child's whole process group on request.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bgproc::{CommandSpec, Supervisor, SupervisorConfig, starts_with};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), bgproc::SupervisorError> {
//! let mut server = Supervisor::new(SupervisorConfig::default());
//! server.start(&CommandSpec::new(["python3", "server.py"]).env("DEBUG", "1"))?;
//!
//! let ready = server
//!     .wait_for_line(starts_with("* Running on http://127.0.0.1"), Duration::from_secs(5))
//!     .await?;
//! if ready.is_none() {
//!     eprintln!("server did not start:\n{}", server.buffer().text());
//! }
//!
//! server.terminate().await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod capture;
pub mod supervisor;
pub mod waiter;

pub use buffer::LineBuffer;
pub use capture::{LineSplitter, Stream};
pub use supervisor::{CommandSpec, Supervisor, SupervisorConfig, SupervisorError, SupervisorState};
pub use waiter::{starts_with, wait_for_line, LineCursor};
