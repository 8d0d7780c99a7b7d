pub mod config;
pub mod error;
pub mod generator;
pub mod model;
pub mod sampling;
pub mod server;

pub use config::AppConfig;
pub use error::ServiceError;
pub use generator::{PROMPT_WINDOW, generate};
pub use model::{
    CheckpointLoader, GenerationRequest, GenerationResponse, ModelHandle, ModelRegistry,
};
pub use server::build_router;
