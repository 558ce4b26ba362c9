use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::LineBuffer;
use crate::capture::{self, Stream};
use crate::waiter::{self, LineCursor};

/// How long capture tasks may keep reading after the child is gone.
const CAPTURE_DRAIN: Duration = Duration::from_millis(500);

/// How often a leaderless process group is checked for survivors.
const GROUP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
	#[error("command is empty")]
	EmptyCommand,
	#[error("process already started")]
	AlreadyStarted,
	#[error("failed to spawn {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},
	#[error("process is not running ({0:?})")]
	NotRunning(SupervisorState),
	#[error("failed to send {signal:?} to process group {pid}: {source}")]
	Signal {
		pid: u32,
		signal: Signal,
		#[source]
		source: Errno,
	},
	#[error("failed to wait for process {pid}: {source}")]
	Wait {
		pid: u32,
		#[source]
		source: io::Error,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
	NotStarted,
	Running,
	Terminated,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	/// Time between SIGTERM and SIGKILL.
	pub grace_period: Duration,
	/// Capture stderr into the same buffer as stdout. When off, stderr is
	/// inherited from the parent.
	pub capture_stderr: bool,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			grace_period: Duration::from_secs(3),
			capture_stderr: true,
		}
	}
}

/// What to run: the argument vector, environment overrides and working
/// directory. Overrides are applied on top of the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
	pub argv: Vec<String>,
	pub env: BTreeMap<String, String>,
	pub dir: Option<PathBuf>,
}

impl CommandSpec {
	pub fn new<I, S>(argv: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			argv: argv.into_iter().map(Into::into).collect(),
			..Self::default()
		}
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.insert(key.into(), value.into());
		self
	}

	pub fn envs<I, K, V>(mut self, vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.env
			.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
		self
	}

	pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.dir = Some(dir.into());
		self
	}
}

/// Owns one child process from spawn to reap.
///
/// `start` may succeed at most once. `terminate` is idempotent and must be
/// awaited on every exit path; dropping a running supervisor only kills the
/// child as a last resort.
pub struct Supervisor {
	config: SupervisorConfig,
	state: SupervisorState,
	child: Option<Child>,
	pid: Option<u32>,
	exit_status: Option<ExitStatus>,
	output: LineBuffer,
	cursor: LineCursor,
	captures: Vec<JoinHandle<()>>,
	stop_capture: Option<watch::Sender<bool>>,
	/// Set from spawn until the process group has been cleaned up once.
	group_pending: bool,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Self {
		Self {
			config,
			state: SupervisorState::NotStarted,
			child: None,
			pid: None,
			exit_status: None,
			output: LineBuffer::new(),
			cursor: LineCursor::new(),
			captures: Vec::new(),
			stop_capture: None,
			group_pending: false,
		}
	}

	pub fn state(&self) -> SupervisorState {
		self.state
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn exit_status(&self) -> Option<ExitStatus> {
		self.exit_status
	}

	/// Shared handle to everything the child has printed so far.
	pub fn buffer(&self) -> &LineBuffer {
		&self.output
	}

	pub fn output(&self) -> Vec<String> {
		self.output.snapshot()
	}

	/// Spawns the child in its own process group and starts capturing its
	/// output. Must be called from within a Tokio runtime.
	pub fn start(&mut self, spec: &CommandSpec) -> Result<(), SupervisorError> {
		if self.state != SupervisorState::NotStarted {
			return Err(SupervisorError::AlreadyStarted);
		}
		let (program, args) = spec
			.argv
			.split_first()
			.ok_or(SupervisorError::EmptyCommand)?;

		let mut cmd = Command::new(program);
		cmd.args(args)
			.envs(&spec.env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(if self.config.capture_stderr {
				Stdio::piped()
			} else {
				Stdio::inherit()
			})
			.process_group(0)
			.kill_on_drop(true);
		if let Some(dir) = &spec.dir {
			cmd.current_dir(dir);
		}

		let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
			program: program.clone(),
			source,
		})?;
		let pid = child.id();
		tracing::debug!(?pid, "spawned {}", spec.argv.join(" "));

		let (stop_tx, stop_rx) = watch::channel(false);
		if let Some(stdout) = child.stdout.take() {
			self.captures.push(capture::spawn_capture(
				stdout,
				Stream::Stdout,
				self.output.clone(),
				stop_rx.clone(),
			));
		}
		if let Some(stderr) = child.stderr.take() {
			self.captures.push(capture::spawn_capture(
				stderr,
				Stream::Stderr,
				self.output.clone(),
				stop_rx,
			));
		}

		self.stop_capture = Some(stop_tx);
		self.child = Some(child);
		self.pid = pid;
		self.group_pending = pid.is_some();
		self.state = SupervisorState::Running;
		Ok(())
	}

	/// Waits for the next line accepted by `predicate`.
	///
	/// Lines examined by earlier calls are not examined again. `Ok(None)`
	/// means `timeout` elapsed without a match; deciding whether that is
	/// fatal is up to the caller.
	pub async fn wait_for_line<P>(
		&mut self,
		predicate: P,
		timeout: Duration,
	) -> Result<Option<String>, SupervisorError>
	where
		P: FnMut(&str) -> bool,
	{
		if self.state != SupervisorState::Running {
			return Err(SupervisorError::NotRunning(self.state));
		}
		Ok(waiter::wait_for_line(&self.output, &mut self.cursor, predicate, timeout).await)
	}

	/// Checks whether the child has exited on its own, reaping it if so.
	pub fn poll_exit(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
		if let Some(child) = self.child.as_mut() {
			let pid = self.pid.unwrap_or(0);
			let exited = child
				.try_wait()
				.map_err(|source| SupervisorError::Wait { pid, source })?;
			if let Some(status) = exited {
				tracing::debug!(pid, %status, "process exited on its own");
				self.child = None;
				self.exit_status = Some(status);
				self.state = SupervisorState::Terminated;
			}
		}
		Ok(self.exit_status)
	}

	/// Stops the child: SIGTERM to its process group, SIGKILL once the grace
	/// period runs out, then winds down the capture tasks.
	///
	/// A child that already exited is just reaped, but whatever it left
	/// behind in its process group is still stopped. Calling this again, or
	/// before `start`, does nothing.
	pub async fn terminate(&mut self) -> Result<(), SupervisorError> {
		if self.state == SupervisorState::NotStarted {
			return Ok(());
		}

		if let Some(mut child) = self.child.take() {
			let pid = self.pid.unwrap_or(0);
			let status = match child.try_wait() {
				Ok(Some(status)) => {
					tracing::debug!(pid, %status, "process already exited");
					status
				}
				Ok(None) => match stop_child(&mut child, pid, self.config.grace_period).await {
					Ok(status) => status,
					Err(e) => {
						self.child = Some(child);
						return Err(e);
					}
				},
				Err(source) => {
					self.child = Some(child);
					return Err(SupervisorError::Wait { pid, source });
				}
			};
			self.exit_status = Some(status);
		}

		if self.group_pending {
			if let Some(pid) = self.pid {
				stop_group(pid, self.config.grace_period).await?;
			}
			self.group_pending = false;
		}

		self.state = SupervisorState::Terminated;
		self.finish_capture().await;
		Ok(())
	}

	async fn finish_capture(&mut self) {
		let mut captures = std::mem::take(&mut self.captures);
		if captures.is_empty() {
			self.stop_capture = None;
			return;
		}

		let drained = tokio::time::timeout(CAPTURE_DRAIN, async {
			for handle in captures.iter_mut() {
				let _ = handle.await;
			}
		})
		.await;

		if drained.is_err() {
			// Something else in the process group still holds the pipe open.
			tracing::debug!("output still open after exit, stopping capture");
			if let Some(stop) = &self.stop_capture {
				let _ = stop.send(true);
			}
			for handle in captures {
				if !handle.is_finished() {
					let _ = handle.await;
				}
			}
		}
		self.stop_capture = None;
	}
}

impl Drop for Supervisor {
	fn drop(&mut self) {
		if self.child.is_some() || self.group_pending {
			if let Some(pid) = self.pid {
				tracing::warn!(pid, "supervisor dropped without terminate(), killing process group");
				let _ = signal_group(pid, Signal::SIGKILL);
			}
		}
		if let Some(stop) = self.stop_capture.take() {
			let _ = stop.send(true);
		}
	}
}

async fn stop_child(
	child: &mut Child,
	pid: u32,
	grace: Duration,
) -> Result<ExitStatus, SupervisorError> {
	signal_group(pid, Signal::SIGTERM)?;

	match tokio::time::timeout(grace, child.wait()).await {
		Ok(waited) => waited.map_err(|source| SupervisorError::Wait { pid, source }),
		Err(_) => {
			tracing::warn!(pid, "process still alive {:?} after SIGTERM, killing", grace);
			signal_group(pid, Signal::SIGKILL)?;
			child
				.wait()
				.await
				.map_err(|source| SupervisorError::Wait { pid, source })
		}
	}
}

/// Stops whatever is left in the group once its leader is gone. The group
/// id cannot be reused while any member is alive.
async fn stop_group(pgid: u32, grace: Duration) -> Result<(), SupervisorError> {
	if !group_alive(pgid) {
		return Ok(());
	}
	tracing::debug!(pgid, "process group outlived its leader, sending SIGTERM");
	signal_group(pgid, Signal::SIGTERM)?;

	let gone = tokio::time::timeout(grace, async {
		while group_alive(pgid) {
			tokio::time::sleep(GROUP_POLL).await;
		}
	})
	.await;

	if gone.is_err() {
		tracing::warn!(pgid, "process group still alive {:?} after SIGTERM, killing", grace);
		signal_group(pgid, Signal::SIGKILL)?;
	}
	Ok(())
}

fn group_alive(pgid: u32) -> bool {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;

	// EPERM still means the group exists.
	!matches!(killpg(Pid::from_raw(pgid as i32), None), Err(Errno::ESRCH))
}

/// Signals the whole process group led by `pid`. A group that no longer
/// exists is not an error.
fn signal_group(pid: u32, signal: Signal) -> Result<(), SupervisorError> {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;

	match killpg(Pid::from_raw(pid as i32), signal) {
		Ok(()) | Err(Errno::ESRCH) => Ok(()),
		Err(source) => Err(SupervisorError::Signal { pid, signal, source }),
	}
}
