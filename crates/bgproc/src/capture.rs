use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::LineBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Stdout,
	Stderr,
}

impl fmt::Display for Stream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Stream::Stdout => write!(f, "stdout"),
			Stream::Stderr => write!(f, "stderr"),
		}
	}
}

/// Turns a byte stream into lines.
///
/// Bytes after the last `\n` stay pending until more data completes them or
/// [`LineSplitter::finish`] flushes them at end of stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
	pending: Vec<u8>,
}

impl LineSplitter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
		let mut lines = Vec::new();
		let mut rest = data;
		while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
			self.pending.extend_from_slice(&rest[..pos]);
			lines.push(decode(&self.pending));
			self.pending.clear();
			rest = &rest[pos + 1..];
		}
		self.pending.extend_from_slice(rest);
		lines
	}

	pub fn finish(&mut self) -> Option<String> {
		if self.pending.is_empty() {
			return None;
		}
		let line = decode(&self.pending);
		self.pending.clear();
		Some(line)
	}
}

fn decode(raw: &[u8]) -> String {
	let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
	String::from_utf8_lossy(raw).into_owned()
}

/// Spawns the task that copies `reader` into `buffer` line by line.
///
/// The task ends at end of stream, on a read error, or once `stop` flips to
/// `true` (or its sender is dropped).
pub fn spawn_capture<R>(
	reader: R,
	stream: Stream,
	buffer: LineBuffer,
	stop: watch::Receiver<bool>,
) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		pipe_lines(reader, stream, buffer, stop).await;
	})
}

async fn pipe_lines<R: AsyncRead + Unpin>(
	mut reader: R,
	stream: Stream,
	buffer: LineBuffer,
	mut stop: watch::Receiver<bool>,
) {
	let mut splitter = LineSplitter::new();
	let mut buf = [0u8; 4096];

	loop {
		if *stop.borrow() {
			tracing::debug!(%stream, "capture stopped");
			break;
		}

		tokio::select! {
			read = reader.read(&mut buf) => match read {
				Ok(0) => break,
				Ok(n) => {
					for line in splitter.feed(&buf[..n]) {
						tracing::trace!(%stream, "{}", line);
						buffer.push(line);
					}
				}
				Err(e) => {
					tracing::debug!(%stream, "read error: {}", e);
					break;
				}
			},
			changed = stop.changed() => {
				if changed.is_err() {
					break;
				}
			}
		}
	}

	if let Some(line) = splitter.finish() {
		tracing::trace!(%stream, "{}", line);
		buffer.push(line);
	}
}
