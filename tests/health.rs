//! Health-socket lifecycle properties that only show up across process
//! boundaries: a live supervisor answers `healthcheck` with 0 while its
//! child runs, and the well-known socket path can be bound, torn down, and
//! rebound by successive supervisor invocations without leftover state.

use std::time::Duration;

use assert_cmd::Command;
use serial_test::serial;
use tempfile::tempdir;

fn entrypoint() -> Command {
    Command::cargo_bin("entrypoint").expect("binary built")
}

#[test]
#[serial]
fn healthcheck_reports_running_while_child_is_alive() {
    let artifacts = tempdir().unwrap();
    let bundle_path = tempdir().unwrap().path().join("bundle.tar.gz");

    let mut child = entrypoint()
        .args([
            "--wait-for-probe=false",
            "--artifacts-dir",
            artifacts.path().to_str().unwrap(),
            "--artifact-path",
            bundle_path.to_str().unwrap(),
            "--",
            "sleep",
            "2",
        ])
        .spawn()
        .unwrap();

    // Give the supervisor a moment to bind the socket and spawn the child.
    std::thread::sleep(Duration::from_millis(300));

    entrypoint().arg("healthcheck").assert().success();

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
#[serial]
fn socket_path_can_be_rebound_across_successive_runs() {
    let artifacts = tempdir().unwrap();

    for _ in 0..2 {
        let bundle_path = tempdir().unwrap().path().join("bundle.tar.gz");
        entrypoint()
            .args([
                "--wait-for-probe=false",
                "--artifacts-dir",
                artifacts.path().to_str().unwrap(),
                "--artifact-path",
                bundle_path.to_str().unwrap(),
                "--",
                "echo",
                "hi",
            ])
            .assert()
            .success();
    }

    // A third run's healthcheck subcommand, issued once no supervisor is
    // left running, must fail cleanly rather than connect to a stale file.
    entrypoint().arg("healthcheck").assert().code(1000);
}
