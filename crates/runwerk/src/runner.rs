use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::process::ExitStatus;

use bgproc::{starts_with, CommandSpec, LineBuffer, Supervisor, SupervisorError};
use futures::FutureExt;

use crate::config::{ConfigError, RunnerConfig};
use crate::env::{self, EnvError};
use crate::toggle;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Env(#[from] EnvError),
	#[error(transparent)]
	Supervisor(#[from] SupervisorError),
	#[error("failed to start the server\n{}", .output.join("\n"))]
	StartupFailed { output: Vec<String> },
}

/// What the body of [`RunWerk::run`] gets to see of the server.
#[derive(Debug, Clone, Default)]
pub struct ServerHandle {
	ready_line: Option<String>,
	output: Option<LineBuffer>,
	pid: Option<u32>,
}

impl ServerHandle {
	/// False when the launch was switched off by the environment.
	pub fn is_launched(&self) -> bool {
		self.output.is_some()
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn ready_line(&self) -> Option<&str> {
		self.ready_line.as_deref()
	}

	/// Base address announced in the readiness line, e.g. `http://127.0.0.1:5000`.
	pub fn url(&self) -> Option<&str> {
		self.ready_line.as_deref().and_then(parse_url)
	}

	pub fn buffer(&self) -> Option<&LineBuffer> {
		self.output.as_ref()
	}

	pub fn output(&self) -> Vec<String> {
		self.output.as_ref().map(LineBuffer::snapshot).unwrap_or_default()
	}
}

/// Pulls the `http://...` address out of a line like
/// `* Running on http://127.0.0.1:5000/ (Press CTRL+C to quit)`.
pub fn parse_url(line: &str) -> Option<&str> {
	let start = line.find("http://").or_else(|| line.find("https://"))?;
	let url = line[start..].split_whitespace().next()?;
	Some(url.trim_end_matches('/'))
}

/// A development server running in the background for the duration of a test.
///
/// Either pair [`enter`](Self::enter) with [`exit`](Self::exit) yourself, or
/// hand a body to [`run`](Self::run), which always shuts the server down.
pub struct RunWerk {
	config: RunnerConfig,
	enabled: Option<bool>,
	server: Option<Supervisor>,
	ready_line: Option<String>,
}

impl RunWerk {
	pub fn new(config: RunnerConfig) -> Self {
		Self {
			config,
			enabled: None,
			server: None,
			ready_line: None,
		}
	}

	/// Overrides the environment switch instead of reading it on `enter`.
	pub fn enabled(mut self, enabled: bool) -> Self {
		self.enabled = Some(enabled);
		self
	}

	pub fn config(&self) -> &RunnerConfig {
		&self.config
	}

	pub fn is_running(&self) -> bool {
		self.server.is_some()
	}

	pub fn ready_line(&self) -> Option<&str> {
		self.ready_line.as_deref()
	}

	pub fn output(&self) -> Vec<String> {
		self.server.as_ref().map(Supervisor::output).unwrap_or_default()
	}

	pub fn handle(&self) -> ServerHandle {
		ServerHandle {
			ready_line: self.ready_line.clone(),
			output: self.server.as_ref().map(|s| s.buffer().clone()),
			pid: self.server.as_ref().and_then(Supervisor::pid),
		}
	}

	/// The argument vector, environment and directory the server runs with.
	pub fn command_spec(&self) -> Result<CommandSpec, RunError> {
		self.config.validate()?;
		let argv = self.config.launch()?.argv(&self.config.interpreter);
		let mut vars = self.config.env.clone();
		if self.config.copy_search_path {
			env::apply_search_path(&mut vars, &env::current_search_path())?;
		}
		Ok(CommandSpec {
			argv,
			env: vars,
			dir: self.config.dir.clone(),
		})
	}

	/// Starts the server and waits for its readiness line.
	///
	/// Does nothing when the launch is switched off. If the line does not show
	/// up within `start_timeout` the server is stopped and everything it
	/// printed comes back in [`RunError::StartupFailed`].
	pub async fn enter(&mut self) -> Result<(), RunError> {
		if self.server.is_some() {
			return Err(SupervisorError::AlreadyStarted.into());
		}
		let enabled = self.enabled.unwrap_or_else(toggle::enabled);
		if !enabled {
			tracing::info!("{} is off, not starting the server", toggle::ENABLED_VAR);
			return Ok(());
		}

		let spec = self.command_spec()?;
		let mut server = Supervisor::new(self.config.supervisor_config());
		server.start(&spec)?;
		tracing::debug!(pid = ?server.pid(), "waiting for {:?}", self.config.ready_prefix);

		let ready = server
			.wait_for_line(
				starts_with(self.config.ready_prefix.as_str()),
				self.config.start_timeout(),
			)
			.await;

		match ready {
			Ok(Some(line)) => {
				tracing::info!("{}", line);
				self.ready_line = Some(line);
				self.server = Some(server);
				Ok(())
			}
			Ok(None) => {
				if let Err(e) = server.terminate().await {
					tracing::warn!("failed to stop the server: {}", e);
				}
				Err(RunError::StartupFailed {
					output: server.output(),
				})
			}
			Err(e) => {
				if let Err(stop_err) = server.terminate().await {
					tracing::warn!("failed to stop the server: {}", stop_err);
				}
				Err(e.into())
			}
		}
	}

	/// Reaps the server if it exited on its own.
	pub fn poll_exit(&mut self) -> Result<Option<ExitStatus>, RunError> {
		match self.server.as_mut() {
			Some(server) => Ok(server.poll_exit()?),
			None => Ok(None),
		}
	}

	/// Stops the server. Safe to call any number of times.
	pub async fn exit(&mut self) -> Result<(), RunError> {
		self.ready_line = None;
		if let Some(mut server) = self.server.take() {
			server.terminate().await?;
			tracing::debug!(status = ?server.exit_status(), "server stopped");
		}
		Ok(())
	}

	/// Runs `body` against a started server and stops the server afterwards,
	/// whether the body returns or panics. A panic is resumed once the server
	/// is down.
	pub async fn run<F, Fut, T>(mut self, body: F) -> Result<T, RunError>
	where
		F: FnOnce(ServerHandle) -> Fut,
		Fut: Future<Output = T>,
	{
		self.enter().await?;
		let handle = self.handle();

		let outcome = AssertUnwindSafe(async move { body(handle).await })
			.catch_unwind()
			.await;
		let exited = self.exit().await;

		match outcome {
			Ok(value) => exited.map(|_| value),
			Err(panic) => std::panic::resume_unwind(panic),
		}
	}
}
