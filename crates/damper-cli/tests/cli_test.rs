//! Exit-code contract tests against the real binary, with each test
//! isolated in its own state directory via DAMPER_STATE_DIR.

use std::path::Path;
use std::process::{Child, Command, Output};
use std::time::{Duration, Instant};

use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_damper");

fn damper(state_dir: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .env("DAMPER_STATE_DIR", state_dir)
        .args(args)
        .output()
        .expect("spawn damper")
}

fn damper_bg(state_dir: &Path, args: &[&str]) -> Child {
    Command::new(BIN)
        .env("DAMPER_STATE_DIR", state_dir)
        .args(args)
        .spawn()
        .expect("spawn damper")
}

fn code(out: &Output) -> i32 {
    out.status.code().expect("exit code")
}

#[test]
fn version_and_help_exit_zero() {
    let temp = TempDir::new().unwrap();
    assert_eq!(code(&damper(temp.path(), &["--version"])), 0);
    assert_eq!(code(&damper(temp.path(), &["--help"])), 0);
}

#[test]
fn missing_arguments_is_usage_error() {
    let temp = TempDir::new().unwrap();
    let out = damper(temp.path(), &[]);
    assert_eq!(code(&out), 78);
}

#[test]
fn non_numeric_delay_is_usage_error() {
    let temp = TempDir::new().unwrap();
    let out = damper(temp.path(), &["job", "soon", "true"]);
    assert_eq!(code(&out), 78);
    assert!(!out.stderr.is_empty());
}

#[test]
fn zero_delay_is_usage_error() {
    let temp = TempDir::new().unwrap();
    assert_eq!(code(&damper(temp.path(), &["job", "0", "true"])), 78);
}

#[test]
fn both_edges_false_is_usage_error() {
    let temp = TempDir::new().unwrap();
    let out = damper(
        temp.path(),
        &["--leading", "false", "--trailing", "false", "job", "100", "true"],
    );
    assert_eq!(code(&out), 78);
}

#[test]
fn conflicting_flags_are_usage_errors() {
    let temp = TempDir::new().unwrap();
    assert_eq!(
        code(&damper(
            temp.path(),
            &["--wait", "--no-wait", "job", "100", "true"]
        )),
        78
    );
    assert_eq!(
        code(&damper(
            temp.path(),
            &["--debounce", "--throttle", "job", "100", "true"]
        )),
        78
    );
}

#[test]
fn trailing_execution_exits_zero_and_runs_child() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("ran");
    let cmd = format!("touch {}", marker.display());

    let out = damper(temp.path(), &["job", "50", "sh", "-c", &cmd]);
    assert_eq!(code(&out), 0);
    assert!(marker.exists());
}

#[test]
fn leading_child_exit_code_passes_through() {
    let temp = TempDir::new().unwrap();
    let out = damper(
        temp.path(),
        &[
            "--leading", "true", "--trailing", "false", "job", "100", "sh", "-c", "exit 5",
        ],
    );
    assert_eq!(code(&out), 5);
}

#[test]
fn shell_metacharacters_reach_child_verbatim() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("payload");
    let script = format!("printf %s \"$1\" > {}", marker.display());
    let tricky = r#"a b;c "quoted" $HOME `tick`"#;

    let out = damper(
        temp.path(),
        &[
            "--leading", "true", "--trailing", "false", "job", "100", "sh", "-c", &script, "sh",
            tricky,
        ],
    );
    assert_eq!(code(&out), 0);
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), tricky);
}

#[test]
fn busy_key_queues_and_no_wait_skips() {
    let temp = TempDir::new().unwrap();

    // A runner that waits ~1.5s before executing.
    let mut runner = damper_bg(temp.path(), &["busy", "1500", "true"]);
    // Give it time to claim the slot.
    std::thread::sleep(Duration::from_millis(300));

    let queued = damper(temp.path(), &["busy", "1500", "true"]);
    assert_eq!(code(&queued), 77);

    let skipped = damper(temp.path(), &["--no-wait", "busy", "1500", "true"]);
    assert_eq!(code(&skipped), 76);

    let status = runner.wait().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn timeout_returns_79_promptly() {
    let temp = TempDir::new().unwrap();
    let started = Instant::now();
    let out = damper(
        temp.path(),
        &["--timeout", "200", "job", "10", "sleep", "10"],
    );
    assert_eq!(code(&out), 79);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn status_reports_keys() {
    let temp = TempDir::new().unwrap();
    damper(
        temp.path(),
        &["--leading", "true", "--trailing", "false", "seen", "100", "true"],
    );

    let out = damper(temp.path(), &["--status"]);
    assert_eq!(code(&out), 0);
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("debounce/seen"));

    let json_out = damper(temp.path(), &["--status", "--json"]);
    assert_eq!(code(&json_out), 0);
    let parsed: serde_json::Value = serde_json::from_slice(&json_out.stdout).unwrap();
    assert_eq!(parsed[0]["id"], "seen");
}

#[test]
fn status_filters_single_key() {
    let temp = TempDir::new().unwrap();
    damper(
        temp.path(),
        &["--leading", "true", "--trailing", "false", "one", "100", "true"],
    );

    let out = damper(temp.path(), &["--status", "debounce", "one"]);
    assert!(String::from_utf8_lossy(&out.stdout).contains("debounce/one"));

    let other = damper(temp.path(), &["--status", "throttle", "one"]);
    assert!(!String::from_utf8_lossy(&other.stdout).contains("throttle/one"));
}

#[test]
fn reset_kills_pending_runner() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("fired");
    let cmd = format!("touch {}", marker.display());

    let mut runner = damper_bg(temp.path(), &["doomed", "2000", "sh", "-c", &cmd]);
    std::thread::sleep(Duration::from_millis(300));

    let out = damper(temp.path(), &["--reset", "debounce", "doomed"]);
    assert_eq!(code(&out), 0);

    let status = runner.wait().unwrap();
    assert!(status.code().is_none(), "runner should die by signal");
    assert!(!marker.exists(), "reset schedule must not fire");

    // State is gone from the report.
    let status_out = damper(temp.path(), &["--status"]);
    assert!(!String::from_utf8_lossy(&status_out.stdout).contains("doomed"));
}

#[test]
fn reset_all_is_idempotent() {
    let temp = TempDir::new().unwrap();
    damper(
        temp.path(),
        &["--leading", "true", "--trailing", "false", "ra", "100", "true"],
    );

    assert_eq!(code(&damper(temp.path(), &["--reset-all", "ra"])), 0);
    assert_eq!(code(&damper(temp.path(), &["--reset-all", "ra"])), 0);
}

#[test]
fn reset_requires_mode_and_id() {
    let temp = TempDir::new().unwrap();
    assert_eq!(code(&damper(temp.path(), &["--reset", "doomed"])), 78);
    assert_eq!(code(&damper(temp.path(), &["--reset", "neither", "x"])), 78);
}

#[test]
fn gc_flag_sweeps_and_reports() {
    let temp = TempDir::new().unwrap();
    let out = damper(temp.path(), &["--gc"]);
    assert_eq!(code(&out), 0);
    assert!(String::from_utf8_lossy(&out.stdout).contains("Swept"));
}

#[test]
fn smart_skip_between_processes() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");

    let debounce_cmd = format!("echo D >> {}", out.display());
    let mut runner = damper_bg(
        temp.path(),
        &["shared", "1200", "sh", "-c", &debounce_cmd],
    );
    std::thread::sleep(Duration::from_millis(200));

    let throttle_cmd = format!("echo T >> {}", out.display());
    let lead = damper(
        temp.path(),
        &[
            "--throttle", "--trailing", "false", "shared", "100", "sh", "-c", &throttle_cmd,
        ],
    );
    assert_eq!(code(&lead), 0);

    let status = runner.wait().unwrap();
    assert_eq!(status.code(), Some(0));
    // The throttle execution satisfied the debounce schedule.
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "T\n");
}
