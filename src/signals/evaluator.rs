//! Hypothesis evaluation: logistic composition of weighted signals over a
//! prior, with optional Monte Carlo sampling for a credible interval.

use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::error::PamError;
use crate::events::bus::EventBus;
use crate::models::{now_iso, Event};
use crate::signals::computer::SignalComputer;
use crate::store::async_store::AsyncStore;

/// Clamp for the log-odds transform; keeps `logit` finite at 0 and 1.
const LOGIT_EPSILON: f64 = 1e-9;

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPSILON, 1.0 - LOGIT_EPSILON);
    (p / (1.0 - p)).ln()
}

/// Deterministic composition: `σ(logit(prior) + Σ weight·value)`.
pub fn compose(prior: f64, observations: &[(f64, f64)]) -> f64 {
    let z = observations
        .iter()
        .fold(logit(prior), |z, (weight, value)| z + weight * value);
    sigmoid(z)
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonteCarloSummary {
    pub mean: f64,
    pub low: f64,
    pub high: f64,
}

/// Bernoulli resampling of the observed values: each trial replaces every
/// value with a draw, recomposes, and the 5th/95th nearest-rank percentiles
/// of the sorted sample bound the interval.
pub fn monte_carlo<R: Rng + ?Sized>(
    prior: f64,
    observations: &[(f64, f64)],
    trials: usize,
    rng: &mut R,
) -> MonteCarloSummary {
    let trials = trials.max(1);
    let mut samples: Vec<f64> = Vec::with_capacity(trials);
    for _ in 0..trials {
        let mut z = logit(prior);
        for (weight, value) in observations {
            if rng.gen::<f64>() < *value {
                z += weight;
            }
        }
        samples.push(sigmoid(z));
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mean = samples.iter().sum::<f64>() / trials as f64;
    let low_index = ((0.05 * trials as f64) as usize).min(trials - 1);
    let high_index = ((0.95 * trials as f64) as usize).min(trials - 1);

    MonteCarloSummary {
        mean,
        low: samples[low_index],
        high: samples[high_index],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Contribution {
    pub signal: String,
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub hypothesis: String,
    pub probability: f64,
    pub country: Option<String>,
    pub monte_carlo: Option<MonteCarloSummary>,
    pub contributions: Vec<Contribution>,
}

/// Evaluates hypotheses against freshly computed signals. Every call
/// persists one evaluation row when the store is bound.
pub struct HypothesisEvaluator {
    config: Arc<Config>,
    computer: SignalComputer,
    store: Option<AsyncStore>,
    bus: Option<Arc<EventBus>>,
}

impl HypothesisEvaluator {
    pub fn new(config: Arc<Config>, computer: SignalComputer) -> Self {
        Self {
            config,
            computer,
            store: None,
            bus: None,
        }
    }

    pub fn with_store(mut self, store: AsyncStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Evaluate with a fresh entropy-seeded RNG.
    pub async fn evaluate(
        &self,
        hypothesis_name: &str,
        country: Option<&str>,
        simulate_n: usize,
    ) -> Result<Evaluation, PamError> {
        let mut rng = ChaCha8Rng::from_entropy();
        self.evaluate_with_rng(hypothesis_name, country, simulate_n, &mut rng)
            .await
    }

    /// Seed hook: tests supply their own RNG for reproducible sampling.
    pub async fn evaluate_with_rng<R: Rng + ?Sized>(
        &self,
        hypothesis_name: &str,
        country: Option<&str>,
        simulate_n: usize,
        rng: &mut R,
    ) -> Result<Evaluation, PamError> {
        let hypothesis = self
            .config
            .hypothesis(hypothesis_name)
            .ok_or_else(|| PamError::not_found("scenario", hypothesis_name))?;

        let mut observations: Vec<(f64, f64)> = Vec::with_capacity(hypothesis.signals.len());
        let mut contributions = Vec::with_capacity(hypothesis.signals.len());

        for signal_name in &hypothesis.signals {
            let value = self.computer.compute_signal(signal_name, country).await?;
            let weight = self
                .config
                .signal(signal_name)
                .map(|s| s.weight)
                .unwrap_or(0.0);
            observations.push((weight, value));
            contributions.push(Contribution {
                signal: signal_name.clone(),
                value,
                weight,
                contribution: weight * value,
            });
        }

        let probability = compose(hypothesis.prior, &observations);
        let summary = (simulate_n > 0)
            .then(|| monte_carlo(hypothesis.prior, &observations, simulate_n, rng));

        if let Some(store) = &self.store {
            let mc = summary.map(|m| (m.mean, m.low, m.high));
            if let Err(e) = store
                .store_hypothesis_evaluation(
                    hypothesis_name.to_string(),
                    probability,
                    country.map(str::to_string),
                    mc,
                )
                .await
            {
                warn!(hypothesis = hypothesis_name, error = %e, "evaluation persist failed");
            }
        }

        if let Some(bus) = &self.bus {
            bus.publish(Event::EvaluationUpdate {
                hypothesis: hypothesis_name.to_string(),
                probability,
                country: country.map(str::to_string),
                timestamp: now_iso(),
            })
            .await;
        }

        Ok(Evaluation {
            hypothesis: hypothesis_name.to_string(),
            probability,
            country: country.map(str::to_string),
            monte_carlo: summary,
            contributions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_and_logit_are_inverses_inside_the_clamp() {
        for p in [0.01, 0.05, 0.5, 0.9, 0.999] {
            assert!((sigmoid(logit(p)) - p).abs() < 1e-9);
        }
        assert!(logit(0.0).is_finite());
        assert!(logit(1.0).is_finite());
        assert!(logit(-4.0).is_finite());
    }

    #[test]
    fn compose_matches_worked_examples() {
        // One signal at 2/sqrt(20) with weight 2 over a 5% prior.
        let v = 2.0 / 20.0_f64.sqrt();
        let p = compose(0.05, &[(2.0, v)]);
        assert!((p - 0.114).abs() < 1e-3);

        // Saturated signal: sigma(logit(0.05) + 2).
        let p = compose(0.05, &[(2.0, 1.0)]);
        assert!((p - sigmoid(logit(0.05) + 2.0)).abs() < 1e-12);
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn probability_stays_in_open_unit_interval() {
        for obs in [
            vec![],
            vec![(50.0, 1.0)],
            vec![(-50.0, 1.0)],
            vec![(2.0, 0.3), (-1.5, 0.8)],
        ] {
            let p = compose(0.5, &obs);
            assert!(p > 0.0 && p < 1.0);
        }
    }

    #[test]
    fn positive_weight_is_monotone_increasing() {
        let mut previous = 0.0;
        for step in 0..=10 {
            let v = step as f64 / 10.0;
            let p = compose(0.05, &[(2.0, v), (1.0, 0.5)]);
            assert!(p > previous);
            previous = p;
        }
    }

    #[test]
    fn negative_weight_is_monotone_decreasing() {
        let mut previous = 1.0;
        for step in 0..=10 {
            let v = step as f64 / 10.0;
            let p = compose(0.5, &[(-1.5, v)]);
            assert!(p < previous);
            previous = p;
        }
    }

    #[test]
    fn monte_carlo_mean_tracks_the_analytic_expectation() {
        // Single signal with observed 0.5 and weight +2 over a 10% prior:
        // E[p] = 0.5*sigma(logit(0.1)) + 0.5*sigma(logit(0.1)+2).
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let summary = monte_carlo(0.1, &[(2.0, 0.5)], 5000, &mut rng);

        let expected = 0.5 * sigmoid(logit(0.1)) + 0.5 * sigmoid(logit(0.1) + 2.0);
        assert!((summary.mean - expected).abs() < 0.02);
        assert!(summary.low <= summary.mean);
        assert!(summary.mean <= summary.high);
        assert!(summary.low < summary.high);
    }

    #[test]
    fn monte_carlo_is_reproducible_under_a_fixed_seed() {
        let obs = [(2.0, 0.4), (-1.0, 0.7)];
        let a = monte_carlo(0.05, &obs, 1000, &mut ChaCha8Rng::seed_from_u64(7));
        let b = monte_carlo(0.05, &obs, 1000, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a.mean, b.mean);
        assert_eq!(a.low, b.low);
        assert_eq!(a.high, b.high);
    }

    #[test]
    fn monte_carlo_handles_tiny_sample_counts() {
        let summary = monte_carlo(0.2, &[(1.0, 0.5)], 1, &mut ChaCha8Rng::seed_from_u64(0));
        assert!(summary.low <= summary.high);
        assert!((summary.mean - summary.low).abs() < 1e-12 || (summary.mean - summary.high).abs() < 1e-12);
    }
}
