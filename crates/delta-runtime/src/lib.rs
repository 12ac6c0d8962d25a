pub mod error;
pub mod load_stage;
pub mod orchestrator;

pub use error::RuntimeError;
pub use load_stage::LoadStage;
pub use orchestrator::{ConsumerOrchestrator, OrchestratorConfig, TableRuntimeConfig};
