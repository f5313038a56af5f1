//! Dropping a `run()`/`out()` future must not leak processes: cleanup
//! runs to completion in a detached task even after the caller stops
//! polling.

use std::time::Duration;

use shellpipe::cmd;

fn count_open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[tokio::test]
async fn cancelling_a_pipeline_kills_and_reaps_both_children() {
    let _ = env_logger::try_init();
    let pipeline = cmd("sleep").arg("60").pipe(cmd("sleep").arg("60"));

    let fds_before = count_open_fds();

    let result = tokio::time::timeout(Duration::from_millis(50), pipeline.run()).await;
    assert!(result.is_err(), "expected the timeout to fire first");

    // Cleanup is detached from the cancelled future, so give it a moment
    // to actually kill and reap both children before asserting on the fd
    // count below.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fds_after = count_open_fds();
    assert_eq!(fds_before, fds_after, "cancellation must not leak fds");
}

#[tokio::test]
async fn a_completed_run_leaves_the_fd_count_unchanged() {
    let fds_before = count_open_fds();
    cmd("echo").arg("hi").run().await.unwrap();
    let fds_after = count_open_fds();
    assert_eq!(fds_before, fds_after);
}

#[tokio::test]
async fn a_nonzero_exit_still_cleans_up() {
    let fds_before = count_open_fds();
    let err = cmd("sh").arg("-c").arg("exit 1").out().await.unwrap_err();
    assert!(matches!(err, shellpipe::Error::NonZeroExit { exit_code: 1, .. }));
    let fds_after = count_open_fds();
    assert_eq!(fds_before, fds_after);
}

#[tokio::test]
async fn a_spawn_failure_still_cleans_up() {
    let fds_before = count_open_fds();
    let err = cmd("/no/such/binary-shellpipe-test").run().await.unwrap_err();
    assert!(matches!(err, shellpipe::Error::Spawn { .. }));
    let fds_after = count_open_fds();
    assert_eq!(fds_before, fds_after);
}
