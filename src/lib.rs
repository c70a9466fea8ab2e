pub mod config;
pub mod dialogue;
pub mod quiz;

pub use config::{Config, ConfigError};
pub use quiz::ai_helper::HealthAdvisor;
pub use quiz::bank::QuestionBank;
pub use quiz::session::{AnalysisOutcome, QuizSession};
