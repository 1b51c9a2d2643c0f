pub mod error;
pub mod registry;
pub mod runner;
pub mod task;

pub use error::{ApiError, ApiResult, CoreError};
pub use registry::{ModelRegistry, RunnerConstructor};
pub use runner::{extract_image_source, ImageSource, ModelConfig, Runner, RunnerOutput, RunnerTensor};
pub use task::{JobEnvelope, Priority, ResultEnvelope, TaskState};
pub use uuid::Uuid;
