use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings for one generation call. Bounds are enforced by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub top_k: usize,
    pub top_p: f64,
    pub seed: Option<u64>,
}

/// Body accepted by `POST /generate`. Omitted fields take the configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RiddleForm {
    pub prompt: Option<String>,
    pub max_new_tokens: Option<usize>,
    pub top_k: Option<usize>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Eos,
    Length,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub text: String,
    pub prompt_tokens: usize,
    pub prompt_truncated: bool,
    pub tokens_generated: usize,
    pub finish_reason: FinishReason,
    pub total_time_ms: u128,
    pub tokens_per_second: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub path: PathBuf,
    pub vocab_size: usize,
    pub eos_token_id: u32,
    pub backend: String,
    pub size_bytes: u64,
}
