//! # runwerk
//!
//! Runs a local development web server (Werkzeug, Flask, or anything that
//! prints a similar banner) in a background process, so it can be tested
//! with real HTTP requests.
//!
//! ```rust,no_run
//! use runwerk::{RunWerk, RunnerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), runwerk::RunError> {
//! let config = RunnerConfig::command(["{python}", "tests/server.py"])
//!     .with_env("my_test_x_variable", "42");
//!
//! RunWerk::new(config)
//!     .run(|server| async move {
//!         println!("server is up at {:?}", server.url());
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Setting `RUNWERK_ENABLED=0` skips the launch entirely, for when the server
//! is already running elsewhere.

pub mod command;
pub mod config;
pub mod env;
pub mod runner;
pub mod toggle;

pub use command::Launch;
pub use config::{load_config, ConfigError, RunnerConfig};
pub use env::EnvError;
pub use runner::{RunError, RunWerk, ServerHandle};
