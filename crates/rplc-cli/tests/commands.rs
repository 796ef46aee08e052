//! End-to-end invocations of the `rplc` binary, run as a child process
//! against a throwaway in-memory-services configuration.

use assert_cmd::Command;

fn config_dir_with(toml: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("replicator.toml"), toml).unwrap();
    dir
}

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = Command::cargo_bin("rplc").unwrap();
    cmd.arg("--help");
    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["controller-chunks", "controller-replicate", "controller-purge", "job-chunks", "job-move", "database-test"] {
        assert!(stdout.contains(name), "help output missing {name:?}:\n{stdout}");
    }
}

#[test]
fn missing_required_argument_is_a_clap_usage_error() {
    let mut cmd = Command::cargo_bin("rplc").unwrap();
    cmd.arg("controller-chunks");
    let output = cmd.output().unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn database_test_configuration_reports_the_loaded_family() {
    let dir = config_dir_with(
        r#"
        [services]
        backend = "memory"

        [[families]]
        name = "demo"
        databases = ["demo_db"]
        replication_level = 2
        "#,
    );

    let mut cmd = Command::cargo_bin("rplc").unwrap();
    cmd.args(["--config-dir", dir.path().to_str().unwrap(), "database-test", "configuration"]);
    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("demo"), "expected configured family name in output:\n{stdout}");
}

#[test]
fn controller_chunks_against_an_unknown_database_is_a_runtime_error() {
    let dir = config_dir_with(
        r#"
        [services]
        backend = "memory"
        "#,
    );

    let mut cmd = Command::cargo_bin("rplc").unwrap();
    cmd.args(["--config-dir", dir.path().to_str().unwrap(), "controller-chunks", "no_such_database"]);
    let output = cmd.output().unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
}
