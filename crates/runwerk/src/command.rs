/// First-argument placeholder replaced by the configured interpreter.
pub const INTERPRETER_PLACEHOLDER: &str = "{python}";

/// How the server is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
	/// A full argument vector, e.g. `["{python}", "server.py"]`.
	Command(Vec<String>),
	/// A module run as `<interpreter> -m <module>`.
	Module(String),
}

impl Launch {
	pub fn argv(&self, interpreter: &str) -> Vec<String> {
		match self {
			Launch::Command(argv) => argv
				.iter()
				.enumerate()
				.map(|(i, arg)| {
					if i == 0 && arg == INTERPRETER_PLACEHOLDER {
						interpreter.to_string()
					} else {
						arg.clone()
					}
				})
				.collect(),
			Launch::Module(module) => vec![interpreter.to_string(), "-m".to_string(), module.clone()],
		}
	}
}
