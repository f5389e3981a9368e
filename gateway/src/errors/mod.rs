pub mod app_error;
pub mod auth_error;
pub mod pipeline_error;

pub use app_error::{AppError, AppResult};
pub use auth_error::{AuthError, AuthResult};
pub use pipeline_error::{PipelineError, PipelineResult, Stage, SynthesisWarning};
