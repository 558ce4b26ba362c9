use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bgproc::{starts_with, CommandSpec, Supervisor, SupervisorConfig, SupervisorError, SupervisorState};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> std::path::PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("bgproc-test-{}-{}", n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn sh(script: &str) -> CommandSpec {
	CommandSpec::new(["sh", "-c", script])
}

fn supervisor() -> Supervisor {
	Supervisor::new(SupervisorConfig::default())
}

const READY: &str = "* Running on http://127.0.0.1";

// --- Readiness ---

#[tokio::test]
async fn returns_the_readiness_line() {
	let mut sup = supervisor();
	sup.start(&sh("echo booting; echo '* Running on http://127.0.0.1:5000'; sleep 30"))
		.unwrap();
	assert_eq!(sup.state(), SupervisorState::Running);

	let line = sup
		.wait_for_line(starts_with(READY), Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(line.as_deref(), Some("* Running on http://127.0.0.1:5000"));
	assert_eq!(sup.output()[0], "booting");

	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn unbounded_timeout_returns_the_line() {
	let mut sup = supervisor();
	sup.start(&sh("echo '* Running on http://127.0.0.1:1'; sleep 30")).unwrap();

	let line = sup
		.wait_for_line(starts_with(READY), Duration::MAX)
		.await
		.unwrap();
	assert_eq!(line.as_deref(), Some("* Running on http://127.0.0.1:1"));
	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn never_matching_predicate_times_out() {
	let mut sup = supervisor();
	sup.start(&sh("echo something else; sleep 30")).unwrap();

	let timeout = Duration::from_millis(400);
	let start = Instant::now();
	let line = sup.wait_for_line(starts_with(READY), timeout).await.unwrap();
	let elapsed = start.elapsed();

	assert_eq!(line, None);
	assert!(elapsed >= timeout, "returned early: {:?}", elapsed);
	assert!(elapsed < timeout + Duration::from_secs(1), "returned late: {:?}", elapsed);

	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn each_line_is_evaluated_once() {
	let mut sup = supervisor();
	sup.start(&sh(
		"i=0; while [ $i -lt 20 ]; do echo tick-$i; i=$((i+1)); sleep 0.01; done; sleep 30",
	))
	.unwrap();

	let mut seen: Vec<String> = Vec::new();
	let line = sup
		.wait_for_line(
			|line| {
				seen.push(line.to_string());
				false
			},
			Duration::from_secs(2),
		)
		.await
		.unwrap();
	assert_eq!(line, None);

	let mut deduped = seen.clone();
	deduped.dedup();
	assert_eq!(seen, deduped, "a line was evaluated twice");
	let expected: Vec<String> = (0..seen.len()).map(|i| format!("tick-{}", i)).collect();
	assert_eq!(seen, expected);
	assert_eq!(seen.len(), 20);

	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn later_waits_resume_after_the_previous_match() {
	let mut sup = supervisor();
	sup.start(&sh("echo 'ready 1'; echo noise; echo 'ready 2'; sleep 30"))
		.unwrap();

	let first = sup
		.wait_for_line(starts_with("ready"), Duration::from_secs(5))
		.await
		.unwrap();
	let second = sup
		.wait_for_line(starts_with("ready"), Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(first.as_deref(), Some("ready 1"));
	assert_eq!(second.as_deref(), Some("ready 2"));

	sup.terminate().await.unwrap();
}

// --- Output capture ---

#[tokio::test]
async fn lines_arrive_in_emission_order() {
	let mut sup = supervisor();
	sup.start(&sh("i=0; while [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done; sleep 30"))
		.unwrap();

	let last = sup
		.wait_for_line(|l| l == "line-199", Duration::from_secs(5))
		.await
		.unwrap();
	assert!(last.is_some());

	let expected: Vec<String> = (0..200).map(|i| format!("line-{}", i)).collect();
	assert_eq!(sup.output(), expected);

	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn captures_stderr_by_default() {
	let mut sup = supervisor();
	sup.start(&sh("echo '* Running on http://127.0.0.1:5000' >&2; sleep 30"))
		.unwrap();

	let line = sup
		.wait_for_line(starts_with(READY), Duration::from_secs(5))
		.await
		.unwrap();
	assert!(line.is_some());

	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn stderr_capture_can_be_disabled() {
	let mut sup = Supervisor::new(SupervisorConfig {
		capture_stderr: false,
		..SupervisorConfig::default()
	});
	sup.start(&sh("echo hidden >&2; echo visible; sleep 30")).unwrap();

	let visible = sup
		.wait_for_line(|l| l == "visible", Duration::from_secs(5))
		.await
		.unwrap();
	assert!(visible.is_some());
	assert!(!sup.output().iter().any(|l| l == "hidden"));

	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn unterminated_last_line_is_kept() {
	let mut sup = supervisor();
	sup.start(&sh("printf 'first\\nno-newline'")).unwrap();

	let line = sup
		.wait_for_line(|l| l == "no-newline", Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(line.as_deref(), Some("no-newline"));

	sup.terminate().await.unwrap();
	assert_eq!(sup.output(), vec!["first", "no-newline"]);
}

// --- Environment and working directory ---

#[tokio::test]
async fn env_overrides_reach_the_child_only() {
	assert!(std::env::var("BGPROC_TEST_X").is_err());

	let mut sup = supervisor();
	sup.start(&sh("echo X=$BGPROC_TEST_X").env("BGPROC_TEST_X", "42"))
		.unwrap();
	let line = sup
		.wait_for_line(starts_with("X="), Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(line.as_deref(), Some("X=42"));
	sup.terminate().await.unwrap();

	assert!(std::env::var("BGPROC_TEST_X").is_err());

	let mut again = supervisor();
	again.start(&sh("echo X=$BGPROC_TEST_X")).unwrap();
	let line = again
		.wait_for_line(starts_with("X="), Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(line.as_deref(), Some("X="));
	again.terminate().await.unwrap();
}

#[tokio::test]
async fn override_wins_over_inherited_value() {
	let mut sup = supervisor();
	sup.start(&sh("echo HOME=$HOME").env("HOME", "/nowhere")).unwrap();
	let line = sup
		.wait_for_line(starts_with("HOME="), Duration::from_secs(5))
		.await
		.unwrap();
	assert_eq!(line.as_deref(), Some("HOME=/nowhere"));
	sup.terminate().await.unwrap();
}

#[tokio::test]
async fn runs_in_the_given_directory() {
	let dir = temp_dir("workdir");
	let mut sup = supervisor();
	sup.start(&sh("pwd -P").dir(&dir)).unwrap();

	let line = sup
		.wait_for_line(|l| !l.is_empty(), Duration::from_secs(5))
		.await
		.unwrap()
		.unwrap();
	assert_eq!(std::path::PathBuf::from(line), dir.canonicalize().unwrap());

	sup.terminate().await.unwrap();
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Start errors ---

#[tokio::test]
async fn second_start_is_rejected() {
	let mut sup = supervisor();
	sup.start(&sh("sleep 30")).unwrap();
	let err = sup.start(&sh("sleep 30")).unwrap_err();
	assert!(matches!(err, SupervisorError::AlreadyStarted));
	sup.terminate().await.unwrap();

	let err = sup.start(&sh("sleep 30")).unwrap_err();
	assert!(matches!(err, SupervisorError::AlreadyStarted));
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() {
	let mut sup = supervisor();
	let err = sup
		.start(&CommandSpec::new(["/definitely/not/here/server"]))
		.unwrap_err();
	match err {
		SupervisorError::Spawn { program, .. } => assert_eq!(program, "/definitely/not/here/server"),
		other => panic!("expected Spawn, got {:?}", other),
	}
	assert_eq!(sup.state(), SupervisorState::NotStarted);
	sup.terminate().await.unwrap();
}

// --- Termination ---

#[tokio::test]
async fn terminate_twice_is_harmless() {
	let mut sup = supervisor();
	sup.start(&sh("echo up; sleep 30")).unwrap();
	sup.wait_for_line(|l| l == "up", Duration::from_secs(5))
		.await
		.unwrap();

	let start = Instant::now();
	sup.terminate().await.unwrap();
	sup.terminate().await.unwrap();
	assert!(start.elapsed() < Duration::from_secs(3));
	assert_eq!(sup.state(), SupervisorState::Terminated);
	assert!(sup.exit_status().is_some());
}

#[tokio::test]
async fn terminate_after_child_exited() {
	let mut sup = supervisor();
	sup.start(&sh("echo bye; exit 3")).unwrap();
	sup.wait_for_line(|l| l == "bye", Duration::from_secs(5))
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;

	let start = Instant::now();
	sup.terminate().await.unwrap();
	assert!(start.elapsed() < Duration::from_secs(2));
	assert_eq!(sup.exit_status().and_then(|s| s.code()), Some(3));
}

#[tokio::test]
async fn poll_exit_observes_a_crash() {
	let mut sup = supervisor();
	sup.start(&sh("echo crashing; exit 1")).unwrap();
	sup.wait_for_line(|l| l == "crashing", Duration::from_secs(5))
		.await
		.unwrap();

	let mut status = None;
	for _ in 0..50 {
		status = sup.poll_exit().unwrap();
		if status.is_some() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	assert_eq!(status.and_then(|s| s.code()), Some(1));
	assert_eq!(sup.state(), SupervisorState::Terminated);

	let err = sup
		.wait_for_line(|_| true, Duration::from_millis(10))
		.await
		.unwrap_err();
	assert!(matches!(err, SupervisorError::NotRunning(SupervisorState::Terminated)));
	sup.terminate().await.unwrap();
	assert_eq!(sup.output(), vec!["crashing"]);
}

#[tokio::test]
async fn stubborn_child_is_killed_after_grace_period() {
	let mut sup = Supervisor::new(SupervisorConfig {
		grace_period: Duration::from_millis(300),
		..SupervisorConfig::default()
	});
	sup.start(&sh("trap '' TERM; echo armed; while true; do sleep 0.1; done"))
		.unwrap();
	sup.wait_for_line(|l| l == "armed", Duration::from_secs(5))
		.await
		.unwrap();

	let start = Instant::now();
	sup.terminate().await.unwrap();
	assert!(start.elapsed() >= Duration::from_millis(300));
	assert!(start.elapsed() < Duration::from_secs(3));
	assert_eq!(sup.state(), SupervisorState::Terminated);
}

#[tokio::test]
async fn terminate_kills_the_whole_process_group() {
	let mut sup = supervisor();
	// The background sleep inherits the pipe; terminate must not wait on it forever.
	sup.start(&sh("sleep 30 & echo spawned; wait")).unwrap();
	sup.wait_for_line(|l| l == "spawned", Duration::from_secs(5))
		.await
		.unwrap();

	let start = Instant::now();
	sup.terminate().await.unwrap();
	assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn terminate_stops_the_group_after_the_leader_exited() {
	let marker = temp_dir("orphan").join("touched");
	let _ = std::fs::remove_file(&marker);
	let script = format!("(sleep 1; touch '{}') & echo up; exit 0", marker.display());

	let mut sup = supervisor();
	sup.start(&sh(&script)).unwrap();
	sup.wait_for_line(|l| l == "up", Duration::from_secs(5))
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(sup.poll_exit().unwrap().is_some());

	sup.terminate().await.unwrap();
	tokio::time::sleep(Duration::from_millis(1500)).await;
	assert!(!marker.exists(), "group member outlived terminate()");
}
