pub mod engine;
pub mod fundamental;
pub mod models;
pub mod momentum;
pub mod risk;
pub mod sentiment;
pub mod technical;

pub use engine::ScoringEngine;
pub use models::*;
pub use risk::RiskAssessment;
