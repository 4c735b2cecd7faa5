pub mod executor;
pub mod manager;
pub mod state;

pub use executor::{PipelineExecutor, RunObserver, DEADLINE_EXCEEDED, FINALIZE_STEP};
pub use manager::WorkflowManager;
pub use state::{PipelineState, RunStatus, StatusSnapshot};
