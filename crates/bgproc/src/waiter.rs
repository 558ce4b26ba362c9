use std::time::Duration;
use tokio::time::Instant;

use crate::buffer::LineBuffer;

/// Index of the next line a waiter has not examined yet. Only moves forward.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineCursor {
	next: usize,
}

impl LineCursor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn position(&self) -> usize {
		self.next
	}
}

/// Waits until a line accepted by `predicate` shows up in `buffer`.
///
/// Lines are examined in arrival order starting at `cursor`, and each one is
/// handed to `predicate` exactly once; the cursor ends up just past the last
/// examined line, so a later call resumes where this one stopped. When the
/// buffer runs dry the call sleeps until the next append. Returns `None` once
/// `timeout` has elapsed without a match, however many lines arrived.
pub async fn wait_for_line<P>(
	buffer: &LineBuffer,
	cursor: &mut LineCursor,
	mut predicate: P,
	timeout: Duration,
) -> Option<String>
where
	P: FnMut(&str) -> bool,
{
	// Too far out to represent means no deadline at all.
	let deadline = Instant::now().checked_add(timeout);

	loop {
		for line in buffer.lines_from(cursor.next) {
			cursor.next += 1;
			if predicate(&line) {
				return Some(line);
			}
		}

		match deadline {
			Some(deadline) => {
				if tokio::time::timeout_at(deadline, buffer.wait_for_len(cursor.next + 1))
					.await
					.is_err()
				{
					return None;
				}
			}
			None => buffer.wait_for_len(cursor.next + 1).await,
		}
	}
}

/// Predicate matching lines that begin with `prefix`.
pub fn starts_with(prefix: impl Into<String>) -> impl Fn(&str) -> bool {
	let prefix = prefix.into();
	move |line: &str| line.starts_with(prefix.as_str())
}
