//! Signal computation and hypothesis evaluation.

pub mod computer;
pub mod evaluator;

pub use computer::{score_items, SignalComputer};
pub use evaluator::{compose, logit, monte_carlo, sigmoid, Evaluation, HypothesisEvaluator};
