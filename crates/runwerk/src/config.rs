use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bgproc::SupervisorConfig;

use crate::command::Launch;

/// File picked up from the working directory when no config is given.
pub const CONFIG_FILE: &str = "runwerk.toml";

/// Line prefix the Werkzeug development server prints once it listens.
pub const DEFAULT_READY_PREFIX: &str = "* Running on http://127.0.0.1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid config {}: {source}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("specify either `module` or `command`, but not both")]
	CommandAndModule,
	#[error("no `command` or `module` to run")]
	NoCommand,
	#[error("`{field}` must be a non-negative number of seconds, got {value}")]
	InvalidDuration { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
	#[serde(default)]
	pub command: Option<Vec<String>>,
	#[serde(default)]
	pub module: Option<String>,
	/// Extra environment for the server only.
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	pub dir: Option<PathBuf>,
	/// Seconds to wait for the readiness line.
	#[serde(default = "default_start_timeout")]
	pub start_timeout: f64,
	/// Seconds between SIGTERM and SIGKILL on shutdown.
	#[serde(default = "default_grace_period")]
	pub grace_period: f64,
	/// Pass the caller's module search path to the server as `PYTHONPATH`.
	#[serde(default = "default_true")]
	pub copy_search_path: bool,
	#[serde(default = "default_true")]
	pub capture_stderr: bool,
	#[serde(default = "default_ready_prefix")]
	pub ready_prefix: String,
	#[serde(default = "default_interpreter")]
	pub interpreter: String,
}

impl Default for RunnerConfig {
	fn default() -> Self {
		Self {
			command: None,
			module: None,
			env: BTreeMap::new(),
			dir: None,
			start_timeout: default_start_timeout(),
			grace_period: default_grace_period(),
			copy_search_path: true,
			capture_stderr: true,
			ready_prefix: default_ready_prefix(),
			interpreter: default_interpreter(),
		}
	}
}

fn default_start_timeout() -> f64 {
	5.0
}
fn default_grace_period() -> f64 {
	3.0
}
fn default_true() -> bool {
	true
}
fn default_ready_prefix() -> String {
	DEFAULT_READY_PREFIX.to_string()
}
fn default_interpreter() -> String {
	"python3".to_string()
}

impl RunnerConfig {
	pub fn command<I, S>(argv: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			command: Some(argv.into_iter().map(Into::into).collect()),
			..Self::default()
		}
	}

	pub fn module(name: impl Into<String>) -> Self {
		Self {
			module: Some(name.into()),
			..Self::default()
		}
	}

	pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.insert(key.into(), value.into());
		self
	}

	pub fn launch(&self) -> Result<Launch, ConfigError> {
		match (&self.command, &self.module) {
			(Some(_), Some(_)) => Err(ConfigError::CommandAndModule),
			(Some(argv), None) => Ok(Launch::Command(argv.clone())),
			(None, Some(module)) => Ok(Launch::Module(module.clone())),
			(None, None) => Err(ConfigError::NoCommand),
		}
	}

	/// Checks what `launch` checks plus the durations. An infinite duration
	/// is accepted and means no limit.
	pub fn validate(&self) -> Result<(), ConfigError> {
		for (field, value) in [
			("start_timeout", self.start_timeout),
			("grace_period", self.grace_period),
		] {
			if value.is_nan() || value < 0.0 {
				return Err(ConfigError::InvalidDuration { field, value });
			}
		}
		self.launch().map(|_| ())
	}

	pub fn start_timeout(&self) -> Duration {
		secs(self.start_timeout)
	}

	pub fn supervisor_config(&self) -> SupervisorConfig {
		SupervisorConfig {
			grace_period: secs(self.grace_period),
			capture_stderr: self.capture_stderr,
		}
	}
}

/// Saturates at `Duration::MAX`; anything `validate` rejects becomes zero.
fn secs(value: f64) -> Duration {
	match Duration::try_from_secs_f64(value) {
		Ok(duration) => duration,
		Err(_) if value > 0.0 => Duration::MAX,
		Err(_) => Duration::ZERO,
	}
}

pub fn parse_config(text: &str) -> Result<RunnerConfig, toml::de::Error> {
	toml::from_str(text)
}

pub fn load_config(path: &Path) -> Result<RunnerConfig, ConfigError> {
	let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	parse_config(&text).map_err(|source| ConfigError::Parse {
		path: path.to_path_buf(),
		source,
	})
}
