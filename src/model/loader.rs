use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{config::AppConfig, error::ServiceError, model::ModelMetadata};

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const MODULE_FILES: [&str; 3] = ["model.pt", "model.ts", "traced_model.pt"];

const EOS_CONFIG_FILES: [&str; 2] = ["generation_config.json", "config.json"];
const EOS_TOKEN_CANDIDATES: [&str; 3] = ["</s>", "<|endoftext|>", "<eos>"];

/// A causal language model that scores the next token of a sequence.
pub trait CausalLm: Send + Sync {
    /// Logits over the vocabulary for the position following the last id.
    ///
    /// All three slices have the same length. Padding sits on the left with a
    /// zero mask. Real tokens are numbered from 0 in `position_ids`; padded
    /// slots carry position 1.
    fn next_token_logits(
        &self,
        input_ids: &[u32],
        attention_mask: &[u32],
        position_ids: &[u32],
    ) -> Result<Vec<f32>, ServiceError>;

    fn backend(&self) -> &str;
}

/// Tokenizer and model loaded from one checkpoint directory.
pub struct ModelHandle {
    path: PathBuf,
    tokenizer: Arc<Tokenizer>,
    model: Arc<dyn CausalLm>,
    eos_token_id: u32,
    size_bytes: u64,
}

impl ModelHandle {
    pub fn new(
        path: impl Into<PathBuf>,
        tokenizer: Tokenizer,
        model: Arc<dyn CausalLm>,
        eos_token_id: u32,
        size_bytes: u64,
    ) -> Self {
        Self {
            path: path.into(),
            tokenizer: Arc::new(tokenizer),
            model,
            eos_token_id,
            size_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn model(&self) -> &dyn CausalLm {
        self.model.as_ref()
    }

    pub fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    pub fn metadata(&self) -> ModelMetadata {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        ModelMetadata {
            name,
            path: self.path.clone(),
            vocab_size: self.tokenizer.get_vocab_size(true),
            eos_token_id: self.eos_token_id,
            backend: self.model.backend().to_string(),
            size_bytes: self.size_bytes,
        }
    }
}

/// Turns a checkpoint path into a [`ModelHandle`].
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ModelHandle, ServiceError>;
}

/// Loads `tokenizer.json` plus a TorchScript export from a checkpoint directory.
pub struct CheckpointLoader {
    #[cfg(feature = "tch-backend")]
    device: tch::Device,
}

impl CheckpointLoader {
    pub fn new(config: &AppConfig) -> Self {
        #[cfg(not(feature = "tch-backend"))]
        let _ = config;
        Self {
            #[cfg(feature = "tch-backend")]
            device: config.device,
        }
    }

    #[cfg(feature = "tch-backend")]
    fn load_module(&self, module_path: &Path) -> Result<Arc<dyn CausalLm>, ServiceError> {
        let model = crate::model::tch_backend::TorchCausalLm::load(module_path, self.device)?;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "tch-backend"))]
    fn load_module(&self, module_path: &Path) -> Result<Arc<dyn CausalLm>, ServiceError> {
        Err(ServiceError::Load(format!(
            "cannot run {}: built without the tch-backend feature",
            module_path.display()
        )))
    }
}

impl ArtifactLoader for CheckpointLoader {
    fn load(&self, path: &Path) -> Result<ModelHandle, ServiceError> {
        if !path.is_dir() {
            return Err(ServiceError::Load(format!(
                "checkpoint directory missing: {}",
                path.display()
            )));
        }

        let module_path = find_module_file(path)?;
        let tokenizer = load_tokenizer(path)?;
        let eos_token_id = resolve_eos_token_id(path, &tokenizer)?;
        let size_bytes = fs::metadata(&module_path)
            .map_err(|e| ServiceError::Load(format!("{}: {e}", module_path.display())))?
            .len();

        info!(
            module = %module_path.display(),
            size_bytes,
            eos_token_id,
            "deserializing model checkpoint"
        );
        let model = self.load_module(&module_path)?;

        Ok(ModelHandle::new(
            path,
            tokenizer,
            model,
            eos_token_id,
            size_bytes,
        ))
    }
}

pub fn load_tokenizer(dir: &Path) -> Result<Tokenizer, ServiceError> {
    let tokenizer_path = dir.join(TOKENIZER_FILE);
    if !tokenizer_path.is_file() {
        return Err(ServiceError::Load(format!(
            "tokenizer missing: {}",
            tokenizer_path.display()
        )));
    }
    Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| ServiceError::Load(format!("{}: {e}", tokenizer_path.display())))
}

pub fn find_module_file(dir: &Path) -> Result<PathBuf, ServiceError> {
    MODULE_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            ServiceError::Load(format!(
                "no model checkpoint in {} (expected one of {})",
                dir.display(),
                MODULE_FILES.join(", ")
            ))
        })
}

/// End-of-sequence id from the checkpoint's JSON configs, else from the vocabulary.
pub fn resolve_eos_token_id(dir: &Path, tokenizer: &Tokenizer) -> Result<u32, ServiceError> {
    for file in EOS_CONFIG_FILES {
        let path = dir.join(file);
        if !path.is_file() {
            continue;
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| ServiceError::Load(format!("{}: {e}", path.display())))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::Load(format!("invalid {}: {e}", path.display())))?;
        if let Some(id) = eos_from_config(&value) {
            debug!(file, id, "eos token id from config");
            return Ok(id);
        }
    }

    EOS_TOKEN_CANDIDATES
        .iter()
        .find_map(|token| tokenizer.token_to_id(token))
        .ok_or_else(|| {
            ServiceError::Load(format!(
                "no end-of-sequence token found for {}",
                dir.display()
            ))
        })
}

fn eos_from_config(value: &serde_json::Value) -> Option<u32> {
    let field = value.get("eos_token_id")?;
    let id = match field {
        serde_json::Value::Array(items) => items.first()?.as_u64()?,
        other => other.as_u64()?,
    };
    u32::try_from(id).ok()
}
