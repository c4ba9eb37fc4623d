//! Backend-agnostic epoch loop with early stopping and cancellation.
//!
//! The loop only needs something that can run an epoch and snapshot/restore
//! its parameters, see [`EpochRunner`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TrainResult;
use crate::metrics::DetectionScores;

/// Cooperative cancellation flag shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EarlyStopped,
    EpochsExhausted,
    Interrupted,
}

/// Summary of one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub train: DetectionScores,
    pub valid: DetectionScores,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoppingDecision {
    NewBest,
    NoImprovement { count: usize, remaining: usize },
    Stop,
}

/// Tracks the lowest validation loss. Only strict improvements count.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_value: f64,
    best_epoch: Option<usize>,
    counter: usize,
}

impl EarlyStopping {
    /// A `patience` of zero stops at the first epoch that does not improve.
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_value: f64::INFINITY,
            best_epoch: None,
            counter: 0,
        }
    }

    pub fn check(&mut self, value: f64, epoch: usize) -> StoppingDecision {
        if value < self.best_value {
            self.best_value = value;
            self.best_epoch = Some(epoch);
            self.counter = 0;
            return StoppingDecision::NewBest;
        }
        self.counter += 1;
        if self.counter >= self.patience {
            StoppingDecision::Stop
        } else {
            StoppingDecision::NoImprovement {
                count: self.counter,
                remaining: self.patience - self.counter,
            }
        }
    }

    pub fn best(&self) -> Option<(usize, f64)> {
        self.best_epoch.map(|epoch| (epoch, self.best_value))
    }
}

/// One trainable unit driven by [`run_epochs`].
pub trait EpochRunner {
    type Snapshot;

    /// Train then validate once. `Ok(None)` means the epoch was cancelled part way.
    fn run_epoch(&mut self, epoch: usize, cancel: &CancelToken) -> TrainResult<Option<EpochReport>>;

    /// Independent copy of the current parameters.
    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: Self::Snapshot);
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSummary {
    pub stop_reason: StopReason,
    pub best_epoch: Option<usize>,
    pub best_valid_loss: Option<f64>,
    pub history: Vec<EpochReport>,
}

/// Run up to `max_epochs`, keeping the parameters of the best validation loss.
///
/// Whatever ends the loop, the runner leaves holding the best snapshot (when
/// one was taken). Cancelled epochs are dropped from the history.
pub fn run_epochs<R: EpochRunner>(
    runner: &mut R,
    max_epochs: usize,
    patience: usize,
    cancel: &CancelToken,
) -> TrainResult<LoopSummary> {
    let mut stopper = EarlyStopping::new(patience);
    let mut best: Option<R::Snapshot> = None;
    let mut history = Vec::new();
    let mut stop_reason = StopReason::EpochsExhausted;

    for epoch in 0..max_epochs {
        if cancel.is_cancelled() {
            stop_reason = StopReason::Interrupted;
            break;
        }
        let Some(report) = runner.run_epoch(epoch, cancel)? else {
            stop_reason = StopReason::Interrupted;
            break;
        };
        tracing::info!(
            "epoch {epoch}: loss {:.4}/{:.4} (train/valid), F1 {:.4}/{:.4}, ER {:.4}/{:.4}, {:.1}s",
            report.train_loss,
            report.valid_loss,
            report.train.f1,
            report.valid.f1,
            report.train.error_rate,
            report.valid.error_rate,
            report.elapsed_secs
        );
        history.push(report);

        match stopper.check(report.valid_loss, epoch) {
            StoppingDecision::NewBest => best = Some(runner.snapshot()),
            StoppingDecision::NoImprovement { count, remaining } => {
                tracing::debug!(count, remaining, "validation loss did not improve");
            }
            StoppingDecision::Stop => {
                stop_reason = StopReason::EarlyStopped;
                break;
            }
        }
    }

    let best_info = stopper.best();
    match (stop_reason, best_info) {
        (StopReason::EarlyStopped, Some((epoch, loss))) => {
            tracing::info!("Early stopping! Lowest validation loss: {loss:.4} at epoch: {epoch}");
        }
        (StopReason::Interrupted, _) => {
            tracing::info!(
                best_epoch = ?best_info.map(|b| b.0),
                "Training stopped due to cancellation; keeping best model so far"
            );
        }
        _ => {}
    }
    if let Some(snapshot) = best {
        runner.restore(snapshot);
    }

    Ok(LoopSummary {
        stop_reason,
        best_epoch: best_info.map(|b| b.0),
        best_valid_loss: best_info.map(|b| b.1),
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parameters are the epoch index that produced them.
    struct Scripted {
        losses: Vec<f64>,
        params: Option<usize>,
        cancel_at: Option<usize>,
    }

    impl Scripted {
        fn new(losses: &[f64]) -> Self {
            Self {
                losses: losses.to_vec(),
                params: None,
                cancel_at: None,
            }
        }
    }

    impl EpochRunner for Scripted {
        type Snapshot = Option<usize>;

        fn run_epoch(
            &mut self,
            epoch: usize,
            cancel: &CancelToken,
        ) -> TrainResult<Option<EpochReport>> {
            if self.cancel_at == Some(epoch) {
                cancel.cancel();
                self.params = Some(epoch);
                return Ok(None);
            }
            self.params = Some(epoch);
            Ok(Some(EpochReport {
                epoch,
                train_loss: self.losses[epoch],
                valid_loss: self.losses[epoch],
                train: DetectionScores::default(),
                valid: DetectionScores::default(),
                elapsed_secs: 0.0,
            }))
        }

        fn snapshot(&self) -> Self::Snapshot {
            self.params
        }

        fn restore(&mut self, snapshot: Self::Snapshot) {
            self.params = snapshot;
        }
    }

    #[test]
    fn stops_after_patience_and_restores_first_best() {
        let mut runner = Scripted::new(&[5.0, 4.0, 4.0, 4.0, 3.0]);
        let summary = run_epochs(&mut runner, 5, 2, &CancelToken::new()).unwrap();
        assert_eq!(summary.stop_reason, StopReason::EarlyStopped);
        assert_eq!(summary.history.len(), 4);
        assert_eq!(summary.best_epoch, Some(1));
        assert_eq!(summary.best_valid_loss, Some(4.0));
        assert_eq!(runner.params, Some(1));
    }

    #[test]
    fn exhausted_budget_returns_best_snapshot() {
        let mut runner = Scripted::new(&[3.0, 1.0, 2.0]);
        let summary = run_epochs(&mut runner, 3, 10, &CancelToken::new()).unwrap();
        assert_eq!(summary.stop_reason, StopReason::EpochsExhausted);
        assert_eq!(runner.params, Some(1));
    }

    #[test]
    fn cancellation_mid_epoch_keeps_best_and_drops_partial_epoch() {
        let mut runner = Scripted::new(&[2.0, 1.0, 0.5, 0.1]);
        runner.cancel_at = Some(2);
        let cancel = CancelToken::new();
        let summary = run_epochs(&mut runner, 4, 5, &cancel).unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert_eq!(summary.history.len(), 2);
        assert_eq!(runner.params, Some(1));
    }

    #[test]
    fn cancellation_before_any_epoch_leaves_model_untouched() {
        let mut runner = Scripted::new(&[1.0]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let summary = run_epochs(&mut runner, 1, 1, &cancel).unwrap();
        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert_eq!(summary.best_epoch, None);
        assert_eq!(runner.params, None);
    }

    #[test]
    fn equal_loss_is_not_an_improvement() {
        let mut stopper = EarlyStopping::new(3);
        assert_eq!(stopper.check(1.0, 0), StoppingDecision::NewBest);
        assert_eq!(
            stopper.check(1.0, 1),
            StoppingDecision::NoImprovement {
                count: 1,
                remaining: 2
            }
        );
        assert_eq!(stopper.check(0.5, 2), StoppingDecision::NewBest);
        assert_eq!(stopper.best(), Some((2, 0.5)));
    }

    #[test]
    fn zero_patience_stops_on_first_non_improvement() {
        let mut stopper = EarlyStopping::new(0);
        assert_eq!(stopper.check(2.0, 0), StoppingDecision::NewBest);
        assert_eq!(stopper.check(2.0, 1), StoppingDecision::Stop);

        let mut runner = Scripted::new(&[2.0, 1.0, 1.5, 0.5]);
        let summary = run_epochs(&mut runner, 4, 0, &CancelToken::new()).unwrap();
        assert_eq!(summary.stop_reason, StopReason::EarlyStopped);
        assert_eq!(summary.history.len(), 3);
        assert_eq!(runner.params, Some(1));
    }
}
