//! Stabilization run daemons to maintain dht.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use futures::future::FutureExt;
use futures::pin_mut;
use futures::select;
use futures_timer::Delay;
use tokio::task::JoinHandle;

use crate::config::ChordConfig;
use crate::error::Error;
use crate::error::Result;
use crate::node::LocalNode;

/// Periodic maintenance routines. Each runs on its own schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {
    /// Repair successor and predecessor pointers.
    Stabilize,
    /// Refresh the finger table.
    FixFingers,
    /// Drop a dead predecessor.
    CheckPredecessor,
}

/// The stabilization runner.
pub struct Stabilizer {
    node: Weak<LocalNode>,
    stabilize_interval: Duration,
    fix_fingers_interval: Duration,
    check_predecessor_interval: Duration,
}

impl Stabilizer {
    /// Create a new stabilization runner.
    pub fn new(node: Weak<LocalNode>, config: &ChordConfig) -> Self {
        Self {
            node,
            stabilize_interval: config.stabilize_interval(),
            fix_fingers_interval: config.fix_fingers_interval(),
            check_predecessor_interval: config.check_predecessor_interval(),
        }
    }

    pub fn interval(&self, routine: Routine) -> Duration {
        match routine {
            Routine::Stabilize => self.stabilize_interval,
            Routine::FixFingers => self.fix_fingers_interval,
            Routine::CheckPredecessor => self.check_predecessor_interval,
        }
    }

    /// Run a routine once.
    pub async fn run(&self, routine: Routine) -> Result<()> {
        let node = self.node.upgrade().ok_or(Error::NodeReleased)?;
        tracing::debug!("STABILIZATION {routine:?} start");
        let ret = match routine {
            Routine::Stabilize => node.stabilize().await,
            Routine::FixFingers => node.fix_fingers().await,
            Routine::CheckPredecessor => node.check_predecessor().await,
        };
        tracing::debug!("STABILIZATION {routine:?} end");
        ret
    }

    /// Run a routine in a loop until the node is dropped.
    /// Failures are logged and retried on the next tick.
    pub async fn wait(self: Arc<Self>, routine: Routine) {
        let interval = self.interval(routine);
        loop {
            let timeout = Delay::new(interval).fuse();
            pin_mut!(timeout);
            select! {
                _ = timeout => match self.run(routine).await {
                    Ok(()) => {}
                    Err(Error::NodeReleased) => break,
                    Err(e) => tracing::error!("failed to {:?}: {}", routine, e),
                },
            }
        }
    }

    /// Spawn one loop per routine.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        [
            Routine::Stabilize,
            Routine::FixFingers,
            Routine::CheckPredecessor,
        ]
        .into_iter()
        .map(|r| tokio::spawn(self.clone().wait(r)))
        .collect()
    }
}
