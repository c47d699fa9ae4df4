use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

fn tiercache(workdir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tiercache"));
    cmd.current_dir(workdir.path())
        .env_remove("TIERCACHE_CONFIG_FILE")
        .env("RUST_LOG", "error");
    cmd
}

#[test]
fn stats_reports_an_empty_cache_as_json() {
    let workdir = TempDir::new().expect("tempdir");
    let assert = tiercache(&workdir)
        .args(["--durable-path", "cache/stats.sqlite3", "stats"])
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("\"fast_tier_count\": 0"));
    assert!(output.contains("\"state\": \"ready\""));
    assert!(workdir.path().join("cache/stats.sqlite3").exists());
}

#[test]
fn invalidate_and_cleanup_report_removed_counts() {
    let workdir = TempDir::new().expect("tempdir");

    tiercache(&workdir)
        .args(["invalidate", "model_usage", "--durable-path", "c.sqlite3"])
        .assert()
        .success()
        .stdout(contains("\"durable_removed\": 0"));

    tiercache(&workdir)
        .args(["cleanup", "--durable-path", "c.sqlite3"])
        .assert()
        .success()
        .stdout(contains("\"durable_purged\": 0"));
}

#[test]
fn unknown_resource_is_rejected() {
    let workdir = TempDir::new().expect("tempdir");
    tiercache(&workdir)
        .args(["invalidate", "page_views"])
        .assert()
        .failure()
        .stderr(contains("unknown resource `page_views`"));
}

#[test]
fn invalid_configuration_fails_fast() {
    let workdir = TempDir::new().expect("tempdir");
    tiercache(&workdir)
        .env("TIERCACHE__FAST_TIER__DEFAULT_MAX_ENTRIES", "0")
        .arg("stats")
        .assert()
        .failure()
        .stdout(contains("fast_tier.default_max_entries"));
}
