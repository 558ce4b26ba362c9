use std::sync::Arc;
use tokio::sync::watch;

/// Append-only, ordered record of the lines a child process has printed.
///
/// Clones share the same storage. Appends go through a `watch` channel so
/// readers can sleep until the buffer grows instead of polling it.
#[derive(Clone)]
pub struct LineBuffer {
	lines: Arc<watch::Sender<Vec<String>>>,
}

impl LineBuffer {
	pub fn new() -> Self {
		let (sender, _) = watch::channel(Vec::new());
		Self {
			lines: Arc::new(sender),
		}
	}

	/// Appends a line and wakes every reader waiting for new content.
	pub fn push(&self, line: String) {
		self.lines.send_modify(|lines| lines.push(line));
	}

	pub fn len(&self) -> usize {
		self.lines.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn get(&self, index: usize) -> Option<String> {
		self.lines.borrow().get(index).cloned()
	}

	/// Copies the lines at `start..` out of the buffer.
	pub fn lines_from(&self, start: usize) -> Vec<String> {
		let lines = self.lines.borrow();
		lines.get(start..).map(<[String]>::to_vec).unwrap_or_default()
	}

	pub fn snapshot(&self) -> Vec<String> {
		self.lines_from(0)
	}

	/// The whole output joined with newlines, for error reports.
	pub fn text(&self) -> String {
		self.lines.borrow().join("\n")
	}

	/// Resolves once the buffer holds at least `len` lines.
	pub async fn wait_for_len(&self, len: usize) {
		let mut receiver = self.lines.subscribe();
		// The sender lives as long as `self`, so this cannot fail.
		let _ = receiver.wait_for(|lines| lines.len() >= len).await;
	}
}

impl Default for LineBuffer {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for LineBuffer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LineBuffer").field("len", &self.len()).finish()
	}
}
