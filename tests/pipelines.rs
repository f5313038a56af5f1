//! Black-box pipeline behavior: chaining, pipefail aggregation, and the
//! empty/single-stage boundary cases.

use shellpipe::{cmd, pipeline};

#[tokio::test]
async fn two_stage_pipe_transforms_output() {
    let p = cmd("echo").arg("hello").pipe(cmd("tr").args(["a-z", "A-Z"]));
    let out = p.out_str().await.unwrap();
    assert_eq!(out, "HELLO\n");
    assert_eq!(p.run().await.unwrap(), 0);
}

#[tokio::test]
async fn pipefail_reports_rightmost_nonzero_exit() {
    let p = pipeline([
        cmd("sh").arg("-c").arg("exit 1"),
        cmd("sh").arg("-c").arg("exit 0"),
        cmd("sh").arg("-c").arg("exit 2"),
    ]);
    assert_eq!(p.run().await.unwrap(), 2);
}

#[tokio::test]
async fn pipefail_is_zero_when_every_stage_succeeds() {
    let p = pipeline([
        cmd("sh").arg("-c").arg("exit 0"),
        cmd("sh").arg("-c").arg("exit 0"),
    ]);
    assert_eq!(p.run().await.unwrap(), 0);
}

#[tokio::test]
async fn empty_pipeline_exits_zero_without_spawning() {
    let p = pipeline(Vec::<shellpipe::Command>::new());
    assert_eq!(p.run().await.unwrap(), 0);
}

#[tokio::test]
async fn single_stage_pipeline_behaves_like_the_command() {
    let p = pipeline([cmd("echo").arg("solo")]);
    assert_eq!(p.out_str().await.unwrap(), "solo\n");
}

#[tokio::test]
async fn nested_pipeline_flattens_into_one_stage_list() {
    let inner = cmd("echo").arg("a").pipe(cmd("cat"));
    let outer = pipeline([
        shellpipe::Runnable::from(inner),
        shellpipe::Runnable::from(cmd("cat")),
    ]);
    assert_eq!(outer.stages().len(), 3);
}
