//! Unit tests for the mining loop against an in-memory chain.

use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use rstest::rstest;
use tokio::time::timeout;

use super::*;
use crate::console::{BALANCE_QUERY, MINING_QUERY, START_MINING, STOP_MINING};
use crate::runner::CommandOutput;
use crate::test_support::{LogLevel, RecordingLogger};

const FAST: Duration = Duration::from_millis(1);
const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Chain {
    balance: u32,
    mining: bool,
    starts: usize,
    stops: usize,
    broken: bool,
}

/// Answers console commands from shared chain state. Every balance query
/// while mining mines one ether.
#[derive(Clone, Debug, Default)]
struct ChainRunner {
    chain: Arc<Mutex<Chain>>,
}

impl ChainRunner {
    fn with<T>(&self, f: impl FnOnce(&mut Chain) -> T) -> T {
        f(&mut self.chain.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl CommandRunner for ChainRunner {
    async fn run(&self, _program: &Utf8Path, args: &[OsString]) -> Result<CommandOutput, GethError> {
        let command = args
            .get(1)
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_default();
        let reply = self.with(|chain| {
            if chain.broken {
                return Err(String::from("Fatal: Unable to attach to remote geth"));
            }
            Ok(match command.as_str() {
                BALANCE_QUERY => {
                    if chain.mining {
                        chain.balance += 1;
                    }
                    chain.balance.to_string()
                }
                MINING_QUERY => chain.mining.to_string(),
                START_MINING => {
                    chain.mining = true;
                    chain.starts += 1;
                    String::from("null")
                }
                STOP_MINING => {
                    chain.mining = false;
                    chain.stops += 1;
                    String::from("true")
                }
                other => panic!("unexpected console command {other}"),
            })
        });

        Ok(match reply {
            Ok(stdout) => CommandOutput {
                code: Some(0),
                stdout: format!("{stdout}\n"),
                stderr: String::new(),
            },
            Err(stderr) => CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr,
            },
        })
    }
}

fn mining_loop(
    runner: &ChainRunner,
    target: MiningTarget,
    logger: &RecordingLogger,
) -> MiningLoop<ChainRunner> {
    let logger: SharedLogger = Arc::new(logger.clone());
    let console = ConsoleBridge::new(
        Utf8PathBuf::from("/usr/bin/geth"),
        Utf8Path::new("/tmp/chain"),
        runner.clone(),
        Arc::clone(&logger),
    );
    MiningLoop::new(console, target, FAST, logger)
}

async fn wait_until(runner: &ChainRunner, condition: impl Fn(&Chain) -> bool) {
    timeout(DEADLINE, async {
        while !runner.with(|chain| condition(chain)) {
            sleep(FAST).await;
        }
    })
    .await
    .expect("condition should hold before the deadline");
}

#[rstest]
#[case(MiningTarget::Indefinite, 1_000.0, true)]
#[case(MiningTarget::Balance(5.0), 4.0, true)]
#[case(MiningTarget::Balance(5.0), 5.0, false)]
#[case(MiningTarget::Balance(0.0), 0.0, false)]
fn keep_going_compares_against_threshold(
    #[case] target: MiningTarget,
    #[case] balance: f64,
    #[case] expected: bool,
) {
    assert_eq!(target.keep_going(balance), expected);
}

#[rstest]
#[tokio::test]
async fn balance_target_stops_miner_once_reached() {
    let runner = ChainRunner::default();
    let logger = RecordingLogger::new();
    let (_cancel, receiver) = watch::channel(false);

    timeout(
        DEADLINE,
        mining_loop(&runner, MiningTarget::Balance(5.0), &logger).run(receiver),
    )
    .await
    .expect("loop should converge");

    runner.with(|chain| {
        assert!(!chain.mining, "miner should be stopped");
        assert!(chain.balance >= 5, "balance {}", chain.balance);
        assert_eq!(chain.starts, 1);
        assert_eq!(chain.stops, 1);
    });
    assert!(logger.contains(LogLevel::Info, "mining target reached"));
}

#[rstest]
#[tokio::test]
async fn met_target_without_miner_converges_immediately() {
    let runner = ChainRunner::default();
    runner.with(|chain| chain.balance = 10);
    let logger = RecordingLogger::new();

    let outcome = mining_loop(&runner, MiningTarget::Balance(5.0), &logger)
        .cycle()
        .await
        .expect("cycle should succeed");

    assert_eq!(outcome, CycleOutcome::Converged { balance: 10.0 });
    runner.with(|chain| assert_eq!((chain.starts, chain.stops), (0, 0)));
}

#[rstest]
#[tokio::test]
async fn indefinite_target_restarts_a_stopped_miner() {
    let runner = ChainRunner::default();
    let logger = RecordingLogger::new();
    let handle = mining_loop(&runner, MiningTarget::Indefinite, &logger).spawn();

    wait_until(&runner, |chain| chain.mining).await;
    runner.with(|chain| chain.mining = false);
    wait_until(&runner, |chain| chain.starts >= 2).await;

    assert!(!handle.is_finished());
    timeout(DEADLINE, handle.cancel())
        .await
        .expect("cancel should end the loop");
    runner.with(|chain| assert_eq!(chain.stops, 0, "indefinite mining never stops"));
}

#[rstest]
#[tokio::test]
async fn console_failure_ends_loop_with_error_log() {
    let runner = ChainRunner::default();
    runner.with(|chain| chain.broken = true);
    let logger = RecordingLogger::new();
    let (_cancel, receiver) = watch::channel(false);

    timeout(
        DEADLINE,
        mining_loop(&runner, MiningTarget::Indefinite, &logger).run(receiver),
    )
    .await
    .expect("failing loop should end");

    assert!(logger.contains(LogLevel::Error, "mining stopped"));
    runner.with(|chain| assert_eq!(chain.starts, 0));
}
