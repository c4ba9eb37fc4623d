//! Scheduled-sampling probability curve and the state that drives it.
//!
//! The curve gives the probability of feeding the ground truth back into the
//! recurrent cell. It starts at `max_prob` and decays towards `min_prob` as the
//! iteration counter grows:
//!
//! ```text
//! x    = max(iteration - apply_after, 0) / (batch_counter * mul_factor)
//! ramp = 2 / (1 + exp(-gamma_factor * x)) - 1
//! p    = min(max_prob, 1 - min(1 - min_prob, ramp))
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{ModelError, ModelResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingSchedule {
    gamma_factor: f64,
    mul_factor: f64,
    min_prob: f64,
    max_prob: f64,
    batch_counter: usize,
    apply_after: u64,
}

impl SamplingSchedule {
    pub fn new(
        gamma_factor: f64,
        mul_factor: f64,
        min_prob: f64,
        max_prob: f64,
    ) -> ModelResult<Self> {
        if !gamma_factor.is_finite() || gamma_factor < 0.0 {
            return Err(ModelError::config(format!(
                "gamma_factor must be finite and non-negative, got {gamma_factor}"
            )));
        }
        if !mul_factor.is_finite() || mul_factor <= 0.0 {
            return Err(ModelError::config(format!(
                "mul_factor must be positive, got {mul_factor}"
            )));
        }
        check_prob("max_prob", max_prob)?;
        let mut schedule = Self {
            gamma_factor,
            mul_factor,
            min_prob: 0.0,
            max_prob,
            batch_counter: 1,
            apply_after: 0,
        };
        schedule.set_min_prob(min_prob)?;
        Ok(schedule)
    }

    pub fn min_prob(&self) -> f64 {
        self.min_prob
    }

    pub fn set_min_prob(&mut self, value: f64) -> ModelResult<()> {
        check_prob("min_prob", value)?;
        if value > self.max_prob {
            return Err(ModelError::config(format!(
                "min_prob {value} exceeds max_prob {}",
                self.max_prob
            )));
        }
        self.min_prob = value;
        Ok(())
    }

    pub fn max_prob(&self) -> f64 {
        self.max_prob
    }

    pub fn gamma_factor(&self) -> f64 {
        self.gamma_factor
    }

    pub fn mul_factor(&self) -> f64 {
        self.mul_factor
    }

    pub fn batch_counter(&self) -> usize {
        self.batch_counter
    }

    /// Batches per epoch; the curve advances one unit of `x` every `mul_factor` epochs.
    pub fn with_batch_counter(mut self, batches: usize) -> Self {
        self.batch_counter = batches.max(1);
        self
    }

    pub fn apply_after(&self) -> u64 {
        self.apply_after
    }

    /// Iterations during which the curve is held at its starting value.
    pub fn with_apply_after(mut self, iterations: u64) -> Self {
        self.apply_after = iterations;
        self
    }

    pub fn ramp(&self, iteration: u64) -> f64 {
        let progress = iteration.saturating_sub(self.apply_after) as f64;
        let x = progress / (self.batch_counter as f64 * self.mul_factor);
        let d = (-self.gamma_factor * x).exp();
        (2.0 / (1.0 + d)) - 1.0
    }

    pub fn probability(&self, iteration: u64) -> f64 {
        // Same as `1 - min(1 - min_prob, ramp)` without the round trip through the complement.
        let ramp = self.ramp(iteration);
        self.max_prob.min((1.0 - ramp).max(self.min_prob))
    }
}

fn check_prob(name: &str, value: f64) -> ModelResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ModelError::config(format!(
            "{name} must lie in [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Training-progress bookkeeping for scheduled sampling.
///
/// Owned by the training loop and lent to the classifier for each forward
/// pass. The counter advances once per time step of every batch fed with
/// labels and is never reset between epochs.
#[derive(Debug, Clone)]
pub struct SamplingState {
    schedule: SamplingSchedule,
    iteration: u64,
    rng: StdRng,
}

impl SamplingState {
    pub fn new(schedule: SamplingSchedule, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            schedule,
            iteration: 0,
            rng,
        }
    }

    pub fn schedule(&self) -> &SamplingSchedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut SamplingSchedule {
        &mut self.schedule
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn probability(&self) -> f64 {
        self.schedule.probability(self.iteration)
    }

    /// One independent Bernoulli draw per example; `true` selects the ground truth.
    pub fn draw_flags(&mut self, batch: usize) -> Vec<bool> {
        let p = self.probability();
        (0..batch).map(|_| self.rng.gen::<f64>() < p).collect()
    }

    pub fn advance(&mut self) {
        self.iteration += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> SamplingSchedule {
        SamplingSchedule::new(12.0, 4.0, 0.1, 0.9)
            .unwrap()
            .with_batch_counter(50)
    }

    #[test]
    fn probability_stays_within_bounds_and_never_rises() {
        let s = schedule();
        let mut prev_ramp = -1.0;
        let mut prev_p = f64::INFINITY;
        for iteration in (0..200_000u64).step_by(97) {
            let ramp = s.ramp(iteration);
            let p = s.probability(iteration);
            assert!(ramp >= prev_ramp, "ramp fell at {iteration}");
            assert!(p <= prev_p, "probability rose at {iteration}");
            assert!((s.min_prob()..=s.max_prob()).contains(&p), "p={p} at {iteration}");
            prev_ramp = ramp;
            prev_p = p;
        }
        assert_eq!(s.probability(0), 0.9);
        assert_eq!(s.probability(u64::MAX / 2), 0.1);
    }

    #[test]
    fn apply_after_holds_the_curve() {
        let s = schedule().with_apply_after(1_000);
        assert_eq!(s.probability(999), s.probability(0));
        assert!(s.probability(5_000) < s.probability(1_000));
    }

    #[test]
    fn min_prob_round_trips() {
        let mut s = schedule();
        s.set_min_prob(0.25).unwrap();
        assert_eq!(s.min_prob(), 0.25);
        assert!(s.set_min_prob(1.5).is_err());
        assert!(s.set_min_prob(0.95).is_err());
        assert_eq!(s.min_prob(), 0.25);
    }

    #[test]
    fn invalid_factors_rejected() {
        assert!(SamplingSchedule::new(1.0, 0.0, 0.1, 0.9).is_err());
        assert!(SamplingSchedule::new(-1.0, 1.0, 0.1, 0.9).is_err());
        assert!(SamplingSchedule::new(1.0, 1.0, 0.5, 0.4).is_err());
    }

    #[test]
    fn flags_follow_probability() {
        let s = SamplingSchedule::new(0.0, 1.0, 0.5, 0.5).unwrap();
        let mut state = SamplingState::new(s, Some(11));
        assert_eq!(state.probability(), 0.5);
        let draws = 20_000;
        let hits = state.draw_flags(draws).into_iter().filter(|f| *f).count();
        let frac = hits as f64 / draws as f64;
        assert!((frac - 0.5).abs() < 0.02, "fraction {frac}");
    }

    #[test]
    fn counter_only_moves_on_advance() {
        let mut state = SamplingState::new(schedule(), Some(0));
        state.draw_flags(8);
        assert_eq!(state.iteration(), 0);
        state.advance();
        state.advance();
        assert_eq!(state.iteration(), 2);
    }
}
