use std::path::PathBuf;
use std::time::Duration;

use owo_colors::OwoColorize;
use runwerk::config::{self, CONFIG_FILE};
use runwerk::{RunError, RunWerk, RunnerConfig};

#[derive(Debug, Default)]
struct Args {
	config: Option<PathBuf>,
	timeout: Option<f64>,
	env: Vec<(String, String)>,
	module: Option<String>,
	ready: Option<String>,
	no_search_path: bool,
	command: Vec<String>,
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().with_writer(std::io::stderr).init();

	let raw: Vec<String> = std::env::args().skip(1).collect();
	if raw.iter().any(|a| a == "--help" || a == "-h") && !raw.iter().any(|a| a == "--") {
		print_usage();
		return;
	}
	if matches!(raw.first().map(String::as_str), Some("--version" | "-V")) {
		println!("runwerk {}", env!("CARGO_PKG_VERSION"));
		return;
	}

	let args = match parse_args(&raw) {
		Ok(a) => a,
		Err(e) => {
			eprintln!("{} {}", "error:".red(), e);
			eprintln!();
			print_usage();
			std::process::exit(2);
		}
	};

	let config = match build_config(args) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("{} {}", "error:".red(), e);
			std::process::exit(2);
		}
	};

	std::process::exit(serve(config).await);
}

fn print_usage() {
	eprintln!("runwerk - run a development server in the background until Ctrl-C");
	eprintln!();
	eprintln!("usage: runwerk [options] (-m MODULE | -- COMMAND [ARGS...])");
	eprintln!("  -c, --config FILE    config file (default: ./{} if present)", CONFIG_FILE);
	eprintln!("  -m, --module MODULE  run `<interpreter> -m MODULE`");
	eprintln!("  -t, --timeout SECS   seconds to wait for the server to come up");
	eprintln!("  -e, --env KEY=VALUE  extra environment for the server (repeatable)");
	eprintln!("  -r, --ready PREFIX   readiness line prefix");
	eprintln!("      --no-search-path do not pass the current search path as PYTHONPATH");
	eprintln!("  -h, --help           show this help");
	eprintln!("  -V, --version        show version");
	eprintln!();
	eprintln!("A first COMMAND argument of {{python}} is replaced by the interpreter.");
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
	let mut args = Args::default();
	let mut iter = raw.iter();

	while let Some(arg) = iter.next() {
		let mut value = |name: &str| {
			iter.next()
				.cloned()
				.ok_or_else(|| format!("{} needs a value", name))
		};
		match arg.as_str() {
			"-c" | "--config" => args.config = Some(PathBuf::from(value(arg.as_str())?)),
			"-m" | "--module" => args.module = Some(value(arg.as_str())?),
			"-r" | "--ready" => args.ready = Some(value(arg.as_str())?),
			"-t" | "--timeout" => {
				let secs = value(arg.as_str())?;
				args.timeout = Some(
					secs.parse()
						.map_err(|_| format!("invalid timeout: {}", secs))?,
				);
			}
			"-e" | "--env" => {
				let pair = value(arg.as_str())?;
				let (key, val) = pair
					.split_once('=')
					.ok_or_else(|| format!("expected KEY=VALUE, got {}", pair))?;
				args.env.push((key.to_string(), val.to_string()));
			}
			"--no-search-path" => args.no_search_path = true,
			"--" => {
				args.command = iter.by_ref().cloned().collect();
				break;
			}
			other if other.starts_with('-') => return Err(format!("unknown option: {}", other)),
			_ => {
				args.command.push(arg.clone());
				args.command.extend(iter.by_ref().cloned());
				break;
			}
		}
	}

	Ok(args)
}

fn build_config(args: Args) -> Result<RunnerConfig, String> {
	let mut config = match &args.config {
		Some(path) => config::load_config(path).map_err(|e| e.to_string())?,
		None => {
			let default_path = PathBuf::from(CONFIG_FILE);
			if default_path.exists() {
				config::load_config(&default_path).map_err(|e| e.to_string())?
			} else {
				RunnerConfig::default()
			}
		}
	};

	if !args.command.is_empty() {
		config.command = Some(args.command);
		config.module = None;
	}
	if let Some(module) = args.module {
		config.module = Some(module);
		config.command = None;
	}
	if let Some(timeout) = args.timeout {
		config.start_timeout = timeout;
	}
	if let Some(ready) = args.ready {
		config.ready_prefix = ready;
	}
	if args.no_search_path {
		config.copy_search_path = false;
	}
	config.env.extend(args.env);

	config.validate().map_err(|e| e.to_string())?;
	Ok(config)
}

async fn serve(config: RunnerConfig) -> i32 {
	let mut runner = RunWerk::new(config);

	match runner.enter().await {
		Ok(()) => {}
		Err(RunError::StartupFailed { output }) => {
			eprintln!("{} server failed to start", "●".red());
			for line in &output {
				eprintln!("{}", line.dimmed());
			}
			return 1;
		}
		Err(e) => {
			eprintln!("{} {}", "error:".red(), e);
			return 1;
		}
	}

	let handle = runner.handle();
	let Some(buffer) = handle.buffer().cloned() else {
		eprintln!("{} launch disabled by environment", "○".dimmed());
		return 0;
	};

	if let Some(line) = handle.ready_line() {
		eprintln!("{} {}", "●".green(), line);
	}

	let mut printed = buffer.len();
	let mut code = 0;
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);
	let mut tick = tokio::time::interval(Duration::from_millis(500));

	loop {
		tokio::select! {
			_ = buffer.wait_for_len(printed + 1) => {
				for line in buffer.lines_from(printed) {
					println!("{}", line);
					printed += 1;
				}
			}
			_ = tick.tick() => {
				match runner.poll_exit() {
					Ok(Some(status)) => {
						for line in buffer.lines_from(printed) {
							println!("{}", line);
						}
						eprintln!("{} server exited ({})", "●".red(), status);
						code = 1;
						break;
					}
					Ok(None) => {}
					Err(e) => {
						eprintln!("{} {}", "error:".red(), e);
						code = 1;
						break;
					}
				}
			}
			_ = &mut ctrl_c => {
				eprintln!();
				break;
			}
		}
	}

	if let Err(e) = runner.exit().await {
		eprintln!("{} {}", "error:".red(), e);
		return 1;
	}
	eprintln!("{} stopped", "○".dimmed());
	code
}
