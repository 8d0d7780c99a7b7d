mod loader;
mod registry;
mod types;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use loader::{
    ArtifactLoader, CausalLm, CheckpointLoader, MODULE_FILES, ModelHandle, TOKENIZER_FILE,
    find_module_file, load_tokenizer, resolve_eos_token_id,
};
pub use registry::ModelRegistry;
pub use types::{FinishReason, GenerationRequest, GenerationResponse, ModelMetadata, RiddleForm};
