//! # Risk Scoring
//!
//! Base-risk rule evaluation, score explanation, and the engine that
//! orchestrates one event end to end.

pub mod engine;
pub mod explainer;
pub mod rules;

pub use engine::{RiskEngine, RiskEngineBuilder};
pub use explainer::Explainer;
pub use rules::{BaseRiskAssessment, RiskRule, RuleContext, RuleHit, RuleSet};
