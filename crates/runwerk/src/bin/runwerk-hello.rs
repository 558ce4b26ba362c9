//! Tiny HTTP server that announces itself the way the Werkzeug development
//! server does. Used by the runwerk integration tests and as a demo target.

use axum::routing::get;
use axum::Router;

const DEFAULT_PORT: u16 = 5000;

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().collect();

	if args.iter().any(|a| a == "--help" || a == "-h") {
		eprintln!("runwerk-hello - demo server");
		eprintln!();
		eprintln!("usage: runwerk-hello [options]");
		eprintln!("  -p, --port PORT  port on 127.0.0.1, 0 picks a free one (default: {})", DEFAULT_PORT);
		eprintln!("  -h, --help       show this help");
		return;
	}

	let port: u16 = args
		.iter()
		.position(|a| a == "--port" || a == "-p")
		.and_then(|i| args.get(i + 1))
		.and_then(|p| p.parse().ok())
		.unwrap_or(DEFAULT_PORT);

	let app = Router::new()
		.route("/say-hi", get(|| async { "privet" }))
		.route("/say-bye", get(|| async { "poka" }))
		.route("/get-x", get(get_x));

	let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
		Ok(l) => l,
		Err(e) => {
			eprintln!("failed to bind 127.0.0.1:{}: {}", port, e);
			std::process::exit(1);
		}
	};
	let addr = match listener.local_addr() {
		Ok(a) => a,
		Err(e) => {
			eprintln!("failed to read bound address: {}", e);
			std::process::exit(1);
		}
	};

	println!("* Running on http://{}/ (Press CTRL+C to quit)", addr);

	if let Err(e) = axum::serve(listener, app).await {
		eprintln!("server error: {}", e);
		std::process::exit(1);
	}
}

async fn get_x() -> String {
	std::env::var("my_test_x_variable").unwrap_or_default()
}
