//! Black-box process substitution: `/dev/fd/N` argument wiring, and the
//! rule that an inner substitution's exit code never affects pipefail.

use shellpipe::cmd;

#[tokio::test]
async fn input_substitutions_resolve_to_readable_dev_fd_paths() {
    let a = cmd("echo").arg("a").sub_in();
    let b = cmd("echo").arg("b").sub_in();
    let out = cmd("cat").arg(a).arg(b).out_str().await.unwrap();
    assert_eq!(out, "a\nb\n");
}

#[tokio::test]
async fn failing_substitution_does_not_affect_the_reported_exit_code() {
    let failing = cmd("sh").arg("-c").arg("exit 7").sub_in();
    let code = cmd("cat").arg(failing).run().await.unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn failing_substitution_matches_the_code_with_a_trivial_replacement() {
    let with_failure = cmd("cat").arg(cmd("sh").arg("-c").arg("exit 7").sub_in());
    let with_true = cmd("cat").arg(cmd("true").sub_in());
    assert_eq!(
        with_failure.run().await.unwrap(),
        with_true.run().await.unwrap()
    );
}

#[tokio::test]
async fn repeated_substitutions_reap_every_sub_child() {
    // A process substitution's sub-child is spawned and waited on outside
    // the root-stage wait loop; this loop is what would surface a
    // double-untrack or a stale-pid signal as a hang, a panic, or an
    // unrelated process receiving `SIGKILL`, were the sub-child's pid
    // never removed from the cleanup guard's tracked list once reaped.
    for _ in 0..20 {
        let out = cmd("cat")
            .arg(cmd("echo").arg("a").sub_in())
            .out_str()
            .await
            .unwrap();
        assert_eq!(out, "a\n");
    }
}
