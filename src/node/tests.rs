//! Unit tests for the node controller.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::flags::RPC_PORT_FLAG;
use crate::test_support::{FAKE_ACCOUNT, FakeGeth, LogLevel, RecordingLogger, ScriptedRunner};

const LISTING: &str = "Account #0: {0123456789abcdef0123456789abcdef01234567} keystore:///k\n";

#[fixture]
fn fake_geth() -> FakeGeth {
    FakeGeth::install()
}

fn scripted_node(
    geth: &FakeGeth,
    options: NodeOptions,
    runner: &ScriptedRunner,
) -> (GethNode<ScriptedRunner>, RecordingLogger) {
    let logger = RecordingLogger::new();
    let node = GethNode::with_runner(options.with_geth_path(geth.path()), runner.clone())
        .expect("fake geth should resolve")
        .with_logger(Arc::new(logger.clone()));
    (node, logger)
}

fn provisioning_succeeds(runner: &ScriptedRunner) {
    runner.push_success();
    runner.push_success();
    runner.push_output(Some(0), LISTING, "");
}

#[rstest]
fn missing_executable_is_reported_at_construction() {
    let err = GethNode::new(NodeOptions::default().with_geth_path("/nonexistent/geth"))
        .expect_err("missing geth should fail");

    assert!(matches!(err, GethError::ExecutableNotFound { .. }), "got {err}");
}

#[rstest]
#[tokio::test]
async fn operations_before_start_report_not_started(fake_geth: FakeGeth) {
    let (mut node, _) = scripted_node(&fake_geth, NodeOptions::default(), &ScriptedRunner::new());

    assert_eq!(node.state(), NodeState::Stopped);
    assert!(!node.is_running());
    assert_eq!(node.pid(), None);
    assert_eq!(node.http_rpc_endpoint(), None);
    assert_eq!(node.data_dir(), None);
    assert_eq!(
        node.stop(StopOptions::default()).await,
        Err(GethError::NotStarted)
    );
    assert_eq!(node.console_exec("eth.mining").await, Err(GethError::NotStarted));
    assert_eq!(node.destroy_data(), Ok(()));
}

#[rstest]
#[tokio::test]
async fn failed_provisioning_releases_temporary_directory(fake_geth: FakeGeth) {
    let runner = ScriptedRunner::new();
    runner.push_failure(2);
    let (mut node, _) = scripted_node(&fake_geth, NodeOptions::default(), &runner);

    let err = node.start().await.expect_err("init failure should abort start");

    assert!(matches!(err, GethError::ProvisioningFailed { .. }), "got {err}");
    assert_eq!(node.state(), NodeState::Stopped);
    let data_dir = node.data_dir().expect("data dir is reported").to_path_buf();
    assert!(!data_dir.exists(), "temporary directory should be removed");
}

#[rstest]
#[tokio::test]
async fn lifecycle_with_scripted_provisioning(fake_geth: FakeGeth) {
    let runner = ScriptedRunner::new();
    provisioning_succeeds(&runner);
    let options = NodeOptions::default().with_flags(NodeFlags::new().with(RPC_PORT_FLAG, 9545_i64));
    let (mut node, logger) = scripted_node(&fake_geth, options, &runner);

    node.start().await.expect("node should start");

    assert!(node.is_running());
    assert!(node.pid().is_some());
    assert_eq!(node.account().map(Account::as_str), Some(FAKE_ACCOUNT));
    assert_eq!(
        node.http_rpc_endpoint().as_deref(),
        Some("http://localhost:9545")
    );
    assert_eq!(node.start().await, Err(GethError::AlreadyRunning));
    assert!(logger.contains(LogLevel::Info, "--genesis"));

    let outcome = node
        .stop(StopOptions::default())
        .await
        .expect("node should stop");

    assert_eq!(outcome.signal, Some(Signal::SIGTERM));
    assert_eq!(outcome.code, None);
    assert_eq!(node.state(), NodeState::Stopped);
    assert_eq!(node.http_rpc_endpoint(), None);
    let data_dir = node.data_dir().expect("data dir survives stop");
    assert!(!data_dir.exists(), "temporary directory should be removed");
}

#[rstest]
#[case(Signal::SIGTERM, ExitStatus::from_raw(15), None, Signal::SIGTERM)]
#[case(Signal::SIGKILL, ExitStatus::from_raw(9), None, Signal::SIGKILL)]
#[case(Signal::SIGTERM, ExitStatus::from_raw(0), Some(0), Signal::SIGTERM)]
#[case(Signal::SIGTERM, ExitStatus::from_raw(256), Some(1), Signal::SIGTERM)]
#[case(Signal::SIGTERM, ExitStatus::from_raw(9), None, Signal::SIGKILL)]
fn stop_outcome_reports_the_sent_signal(
    #[case] sent: Signal,
    #[case] status: ExitStatus,
    #[case] code: Option<i32>,
    #[case] signal: Signal,
) {
    assert_eq!(
        StopOutcome::delivered(sent, status),
        StopOutcome {
            code,
            signal: Some(signal),
        }
    );
}
