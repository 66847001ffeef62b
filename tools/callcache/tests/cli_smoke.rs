use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

fn stdout_of(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8")
}

#[test]
fn help_lists_store_and_replay_flags() {
    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.arg("--help");
    let stdout = stdout_of(cmd.assert().success());

    assert!(stdout.contains("--backend"));
    assert!(stdout.contains("--sqlite-path"));
    assert!(stdout.contains("--value"));
    assert!(stdout.contains("--replay-only"));
    assert!(stdout.contains("--operation"));
}

#[test]
fn default_demo_stores_three_samples_and_replays_them() {
    let mut cmd = cargo_bin_cmd!("callcache");
    let stdout = stdout_of(cmd.assert().success());
    let lines = stdout.lines().collect::<Vec<_>>();

    assert_eq!(lines.len(), 7, "{stdout}");
    assert!(lines[0].ends_with(" -> 'foo'"));
    assert!(lines[1].ends_with(" -> 'bar'"));
    assert!(lines[2].ends_with(" -> 42"));
    assert_eq!(lines[3], "Cache.store was called 3 times:");

    let first_key = lines[0].split(" -> ").next().expect("key");
    assert_eq!(lines[4], format!("Cache.store(*('foo',)) -> {first_key}"));
    assert!(lines[5].starts_with("Cache.store(*('bar',)) -> "));
    assert!(lines[6].starts_with("Cache.store(*(42,)) -> "));
}

#[test]
fn custom_values_are_detected_by_kind() {
    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.args(["--value", "-7", "--value", "2.5", "--value", "hello world"]);
    let stdout = stdout_of(cmd.assert().success());

    assert!(stdout.contains(" -> -7\n"));
    assert!(stdout.contains(" -> 2.5\n"));
    assert!(stdout.contains(" -> 'hello world'\n"));
    assert!(stdout.contains("Cache.store was called 3 times:"));
    assert!(stdout.contains("Cache.store(*(-7,)) -> "));
    assert!(stdout.contains("Cache.store(*('hello world',)) -> "));
}

#[test]
fn sqlite_history_survives_into_a_replay_only_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = temp.path().join("nested").join("store.sqlite");

    let mut demo = cargo_bin_cmd!("callcache");
    demo.arg("--backend").arg("sqlite").arg("--sqlite-path").arg(&db);
    demo.assert().success();
    assert!(db.exists());

    let mut replay = cargo_bin_cmd!("callcache");
    replay
        .arg("--config")
        .arg(fixture("configs/sqlite.toml"))
        .arg("--sqlite-path")
        .arg(&db)
        .arg("--replay-only");
    let stdout = stdout_of(replay.assert().success());
    let lines = stdout.lines().collect::<Vec<_>>();

    assert_eq!(lines[0], "Cache.store was called 3 times:");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("Cache.store(*('foo',)) -> "));
}

#[test]
fn replay_only_of_an_unknown_operation_reports_zero_calls() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = temp.path().join("store.sqlite");

    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.arg("--backend")
        .arg("sqlite")
        .arg("--sqlite-path")
        .arg(&db)
        .arg("--replay-only")
        .arg("--operation")
        .arg("Cache.fetch");
    let stdout = stdout_of(cmd.assert().success());
    assert_eq!(stdout, "Cache.fetch was called 0 times:\n");
}

#[test]
fn log_path_receives_jsonl_events() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log = temp.path().join("logs").join("run.jsonl");

    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.arg("--config")
        .arg(fixture("configs/memory.toml"))
        .arg("--log-path")
        .arg(&log);
    cmd.assert().success();

    let text = std::fs::read_to_string(&log).expect("log file");
    for line in text.lines() {
        serde_json::from_str::<serde_json::Value>(line).expect("jsonl line");
    }
    assert!(text.contains("\"event_type\":\"cli.start\""));
    assert!(text.contains("\"event_type\":\"recorder.call_logged\""));
    assert!(text.contains("\"event_type\":\"cli.demo.complete\""));
}

#[test]
fn invalid_config_path_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.arg("--config").arg(fixture("configs/missing.toml"));
    cmd.assert().failure();
}

#[test]
fn unknown_backend_in_config_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.arg("--config").arg(fixture("configs/unknown-backend.toml"));
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("config parse error"), "{stderr}");
}

#[test]
fn empty_operation_is_rejected() {
    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.arg("--operation").arg(" ");
    cmd.assert().failure();
}

#[cfg(not(feature = "redis-backend"))]
#[test]
fn redis_backend_requires_the_feature() {
    let mut cmd = cargo_bin_cmd!("callcache");
    cmd.arg("--backend").arg("redis");
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("redis-backend"), "{stderr}");
}
