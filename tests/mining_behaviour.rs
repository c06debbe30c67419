//! Mining loop behaviour against a fake `geth` whose balance grows while
//! mining.

use std::sync::Arc;
use std::time::Duration;

use geth_private::console::{BALANCE_QUERY, MINING_QUERY, STOP_MINING};
use geth_private::test_support::{FakeGeth, RecordingLogger};
use geth_private::{GethNode, MiningTarget, NodeOptions, StopOptions};
use rstest::{fixture, rstest};
use tokio::time::{sleep, timeout};

const INTERVAL: Duration = Duration::from_millis(20);
const DEADLINE: Duration = Duration::from_secs(15);

#[fixture]
fn fake_geth() -> FakeGeth {
    FakeGeth::install()
}

fn mining_node(geth: &FakeGeth, target: MiningTarget) -> GethNode {
    let options = NodeOptions::default()
        .with_geth_path(geth.path())
        .with_mining(target)
        .with_mining_interval(INTERVAL);
    GethNode::new(options)
        .expect("fake geth should resolve")
        .with_logger(Arc::new(RecordingLogger::new()))
}

async fn is_mining(node: &GethNode) -> bool {
    node.console_exec(MINING_QUERY).await.expect("mining query") == "true"
}

#[rstest]
#[tokio::test]
async fn mining_stops_once_balance_threshold_is_reached(fake_geth: FakeGeth) {
    let mut node = mining_node(&fake_geth, MiningTarget::Balance(5.0));
    node.start().await.expect("node should start");

    // The balance only grows while mining, so reading it when idle is stable.
    let balance = timeout(DEADLINE, async {
        loop {
            if !is_mining(&node).await {
                let balance: f64 = node
                    .console_exec(BALANCE_QUERY)
                    .await
                    .expect("balance query")
                    .parse()
                    .expect("numeric balance");
                if balance >= 5.0 {
                    return balance;
                }
            }
            sleep(INTERVAL).await;
        }
    })
    .await
    .expect("threshold should be reached");

    assert!(balance >= 5.0, "balance {balance}");
    sleep(INTERVAL * 5).await;
    assert!(!is_mining(&node).await, "loop should have ended");

    node.stop(StopOptions::default()).await.expect("node should stop");
}

#[rstest]
#[tokio::test]
async fn indefinite_mining_resumes_after_external_stop(fake_geth: FakeGeth) {
    let mut node = mining_node(&fake_geth, MiningTarget::Indefinite);
    node.start().await.expect("node should start");

    timeout(DEADLINE, async {
        while !is_mining(&node).await {
            sleep(INTERVAL).await;
        }
    })
    .await
    .expect("mining should start");

    node.console_exec(STOP_MINING).await.expect("stop miner");

    timeout(DEADLINE, async {
        while !is_mining(&node).await {
            sleep(INTERVAL).await;
        }
    })
    .await
    .expect("mining should resume");

    node.stop(StopOptions::default())
        .await
        .expect("stop should cancel mining and end the node");
}
