//! Mining convergence loop.
//!
//! Once the node is running, the loop repeatedly reads the coinbase balance and
//! the miner state, starting the miner while the target is unmet and stopping
//! it once the balance reaches the threshold. An indefinite target keeps the
//! miner running, restarting it if something else stops it.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::console::ConsoleBridge;
use crate::error::GethError;
use crate::logger::SharedLogger;
use crate::runner::CommandRunner;

/// Delay between mining cycles unless overridden.
pub const DEFAULT_MINING_INTERVAL: Duration = Duration::from_millis(500);

/// What the mining loop converges towards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MiningTarget {
    /// Mine for as long as the node runs.
    Indefinite,
    /// Mine until the coinbase holds at least this many ether.
    Balance(f64),
}

impl MiningTarget {
    /// Whether mining should continue at `balance` ether.
    #[must_use]
    pub const fn keep_going(self, balance: f64) -> bool {
        match self {
            Self::Indefinite => true,
            Self::Balance(threshold) => balance < threshold,
        }
    }
}

/// Result of a single mining cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The target is unmet; the miner is running and the loop continues.
    Continue,
    /// The target is met and the miner is stopped.
    Converged {
        /// Balance observed in the final cycle.
        balance: f64,
    },
}

/// Drives the miner through console commands until the target is met.
#[derive(Clone, Debug)]
pub struct MiningLoop<R: CommandRunner> {
    console: ConsoleBridge<R>,
    target: MiningTarget,
    interval: Duration,
    logger: SharedLogger,
}

impl<R: CommandRunner> MiningLoop<R> {
    /// Creates a loop issuing commands through `console`.
    #[must_use]
    pub const fn new(
        console: ConsoleBridge<R>,
        target: MiningTarget,
        interval: Duration,
        logger: SharedLogger,
    ) -> Self {
        Self {
            console,
            target,
            interval,
            logger,
        }
    }

    /// Runs one cycle: query balance and miner state, then start or stop the
    /// miner as the target requires.
    ///
    /// # Errors
    ///
    /// Propagates any console failure.
    pub async fn cycle(&self) -> Result<CycleOutcome, GethError> {
        let (balance, mining) =
            tokio::try_join!(self.console.balance(), self.console.is_mining())?;

        if self.target.keep_going(balance) {
            if !mining {
                self.logger
                    .info(&format!("starting miner at balance {balance}"));
                self.console.start_mining().await?;
            }
            return Ok(CycleOutcome::Continue);
        }

        if mining {
            self.console.stop_mining().await?;
        }
        Ok(CycleOutcome::Converged { balance })
    }

    /// Repeats [`MiningLoop::cycle`] every interval until the target is met,
    /// a cycle fails, or `cancel` changes.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        loop {
            let outcome = tokio::select! {
                _ = cancel.changed() => return,
                outcome = self.cycle() => outcome,
            };

            match outcome {
                Ok(CycleOutcome::Continue) => {}
                Ok(CycleOutcome::Converged { balance }) => {
                    self.logger
                        .info(&format!("mining target reached at balance {balance}"));
                    return;
                }
                Err(err) => {
                    self.logger.error(&format!("mining stopped: {err}"));
                    return;
                }
            }

            tokio::select! {
                _ = cancel.changed() => return,
                () = sleep(self.interval) => {}
            }
        }
    }

    /// Runs the loop on a background task.
    #[must_use]
    pub fn spawn(self) -> MiningHandle {
        let (cancel, receiver) = watch::channel(false);
        let logger = self.logger.clone();
        let task = tokio::spawn(self.run(receiver));
        MiningHandle {
            cancel,
            task,
            logger,
        }
    }
}

/// Handle to a spawned [`MiningLoop`].
#[derive(Debug)]
pub struct MiningHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
    logger: SharedLogger,
}

impl MiningHandle {
    /// Whether the loop has ended on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the loop to end and waits for it.
    pub async fn cancel(mut self) {
        // Succeeds even when the loop already ended and dropped its receiver.
        self.cancel.send_modify(|cancelled| *cancelled = true);
        if let Err(err) = (&mut self.task).await {
            self.logger.error(&format!("mining task failed: {err}"));
        }
    }
}

impl Drop for MiningHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests;
