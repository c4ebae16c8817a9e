use tokio::sync::mpsc;
use tracing::warn;

use crate::cluster::{NodeId, ReplicaError};

/// Where a quorum stands after the latest reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pending,
    /// `ack` replicas succeeded.
    Reached,
    /// Too many replicas failed for `ack` successes to remain possible.
    Failed,
}

/// Success/failure countdown for one request.
///
/// With `dispatched` replicas and `ack` needed, the outcome is decided at
/// the `ack`-th success or the `(dispatched - ack + 1)`-th failure,
/// whichever comes first.
#[derive(Debug, Clone)]
pub struct Quorum {
    need_success: usize,
    max_failures: usize,
}

impl Quorum {
    pub fn new(ack: usize, dispatched: usize) -> Self {
        Quorum {
            need_success: ack,
            max_failures: (dispatched + 1).saturating_sub(ack),
        }
    }

    pub fn verdict(&self) -> Verdict {
        if self.need_success == 0 {
            Verdict::Reached
        } else if self.max_failures == 0 {
            Verdict::Failed
        } else {
            Verdict::Pending
        }
    }

    pub fn success(&mut self) -> Verdict {
        self.need_success = self.need_success.saturating_sub(1);
        self.verdict()
    }

    pub fn failure(&mut self) -> Verdict {
        self.max_failures = self.max_failures.saturating_sub(1);
        self.verdict()
    }
}

/// Replies gathered up to the moment the quorum was decided.
#[derive(Debug)]
pub struct Collected<T> {
    pub successes: Vec<(NodeId, T)>,
    pub failures: usize,
    pub verdict: Verdict,
}

/// Read replica results until the quorum is decided or every sender is gone.
/// Later results stay in the channel for the caller.
pub async fn collect<T>(
    results: &mut mpsc::Receiver<(NodeId, Result<T, ReplicaError>)>,
    ack: usize,
    dispatched: usize,
) -> Collected<T> {
    let mut quorum = Quorum::new(ack, dispatched);
    let mut collected = Collected {
        successes: Vec::with_capacity(ack),
        failures: 0,
        verdict: quorum.verdict(),
    };

    while collected.verdict == Verdict::Pending {
        let Some((node, result)) = results.recv().await else {
            collected.verdict = Verdict::Failed;
            break;
        };
        collected.verdict = match result {
            Ok(reply) => {
                collected.successes.push((node, reply));
                quorum.success()
            }
            Err(e) => {
                warn!(node = %node, "replica failed: {e}");
                collected.failures += 1;
                quorum.failure()
            }
        };
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_of_three_succeed() {
        let mut q = Quorum::new(2, 3);
        assert_eq!(q.success(), Verdict::Pending);
        assert_eq!(q.failure(), Verdict::Pending);
        assert_eq!(q.success(), Verdict::Reached);
    }

    #[test]
    fn two_failures_of_three_fail_ack_two() {
        let mut q = Quorum::new(2, 3);
        assert_eq!(q.failure(), Verdict::Pending);
        assert_eq!(q.success(), Verdict::Pending);
        assert_eq!(q.failure(), Verdict::Failed);
    }

    #[test]
    fn all_of_n_fails_on_first_failure() {
        let mut q = Quorum::new(3, 3);
        assert_eq!(q.failure(), Verdict::Failed);
    }

    #[test]
    fn fewer_dispatched_than_ack_fails_immediately() {
        assert_eq!(Quorum::new(3, 2).verdict(), Verdict::Failed);
    }
}
