//! The parent's open-fd set must be identical before and after any
//! `run()`/`out()` call, across the redirect kinds that allocate pipes
//! internally (data injection, process substitution).

use shellpipe::cmd;

fn count_open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[tokio::test]
async fn feeding_data_leaves_no_pipe_behind() {
    let before = count_open_fds();
    let out = cmd("cat").feed("payload").out().await.unwrap();
    assert_eq!(out, b"payload");
    assert_eq!(before, count_open_fds());
}

#[tokio::test]
async fn repeated_runs_do_not_accumulate_open_fds() {
    let before = count_open_fds();
    for _ in 0..20 {
        cmd("echo").arg("x").run().await.unwrap();
    }
    assert_eq!(before, count_open_fds());
}

#[tokio::test]
async fn process_substitution_pipes_are_fully_closed() {
    let before = count_open_fds();
    let sub = cmd("echo").arg("a").sub_in();
    let out = cmd("cat").arg(sub).out().await.unwrap();
    assert_eq!(out, b"a\n");
    assert_eq!(before, count_open_fds());
}

#[tokio::test]
async fn a_three_stage_pipeline_closes_every_inter_stage_pipe() {
    let before = count_open_fds();
    let p = cmd("echo").arg("x").pipe(cmd("cat")).pipe(cmd("cat"));
    p.run().await.unwrap();
    assert_eq!(before, count_open_fds());
}

#[tokio::test]
async fn a_spawn_failure_past_a_data_pipe_still_closes_it() {
    // Unlike a bare spawn failure, this command has already allocated a
    // data-injection pipe by the time the exec itself fails to find the
    // binary — the read end must not be left open in the parent.
    let before = count_open_fds();
    let err = cmd("/no/such/binary-shellpipe-test")
        .feed("x")
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, shellpipe::Error::Spawn { .. }));
    assert_eq!(before, count_open_fds());
}

#[tokio::test]
async fn a_failing_middle_stage_closes_every_pipeline_pipe() {
    // The third stage's binary doesn't exist, so `spawn_command` fails
    // after the first two stages are already running and after every
    // inter-stage pipe has been eagerly allocated — including the one
    // feeding the stage that never gets to spawn.
    let before = count_open_fds();
    let p = cmd("echo")
        .arg("x")
        .pipe(cmd("cat"))
        .pipe(cmd("/no/such/binary-shellpipe-test"));
    let err = p.run().await.unwrap_err();
    assert!(matches!(err, shellpipe::Error::Spawn { .. }));
    assert_eq!(before, count_open_fds());
}
