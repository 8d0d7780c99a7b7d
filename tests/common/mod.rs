#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use tokenizers::Tokenizer;

use numenigma::{
    ModelHandle, PROMPT_WINDOW, ServiceError,
    model::{ArtifactLoader, CausalLm, find_module_file, load_tokenizer, resolve_eos_token_id},
};

pub const TOKENIZER_JSON: &str = include_str!("../fixtures/tokenizer.json");
pub const VOCAB_SIZE: usize = 30;
pub const EOS: u32 = 0;

/// "What has keys but cannot open locks? A piano." then end-of-sequence.
pub const PIANO_RIDDLE: [u32; 10] = [3, 4, 5, 6, 7, 8, 9, 10, 11, EOS];
/// "one" .. "ten", never ending on its own.
pub const COUNTING: [u32; 10] = [16, 17, 18, 19, 20, 21, 22, 23, 24, 25];

pub fn tokenizer() -> Tokenizer {
    Tokenizer::from_str(TOKENIZER_JSON).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub len: usize,
    pub real_tokens: usize,
    pub positions: Vec<u32>,
}

/// Strongly prefers `script[step]` at each step, then cycles.
pub struct ScriptedModel {
    script: Vec<u32>,
    cycle: bool,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedModel {
    pub fn once(script: &[u32]) -> Self {
        Self {
            script: script.to_vec(),
            cycle: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn cycling(script: &[u32]) -> Self {
        Self {
            cycle: true,
            ..Self::once(script)
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl CausalLm for ScriptedModel {
    fn next_token_logits(
        &self,
        input_ids: &[u32],
        attention_mask: &[u32],
        position_ids: &[u32],
    ) -> Result<Vec<f32>, ServiceError> {
        assert_eq!(input_ids.len(), attention_mask.len());
        assert_eq!(input_ids.len(), position_ids.len());
        self.calls.lock().push(Call {
            len: input_ids.len(),
            real_tokens: attention_mask.iter().filter(|&&m| m == 1).count(),
            positions: position_ids.to_vec(),
        });

        let step = input_ids.len() - PROMPT_WINDOW;
        let target = if self.cycle {
            self.script[step % self.script.len()]
        } else {
            self.script.get(step).copied().unwrap_or(EOS)
        };

        let mut logits = vec![-4.0; VOCAB_SIZE];
        // runner-up so that top-k > 1 has something to choose from
        logits[(target as usize + 1) % VOCAB_SIZE] = 1.0;
        logits[target as usize] = 6.0;
        Ok(logits)
    }

    fn backend(&self) -> &str {
        "scripted"
    }
}

/// Equal logits for every word except the end-of-sequence token.
pub struct UniformModel;

impl CausalLm for UniformModel {
    fn next_token_logits(
        &self,
        _: &[u32],
        _: &[u32],
        _: &[u32],
    ) -> Result<Vec<f32>, ServiceError> {
        let mut logits = vec![0.0; VOCAB_SIZE];
        logits[EOS as usize] = f32::NEG_INFINITY;
        Ok(logits)
    }

    fn backend(&self) -> &str {
        "uniform"
    }
}

pub struct FailingModel;

impl CausalLm for FailingModel {
    fn next_token_logits(
        &self,
        _: &[u32],
        _: &[u32],
        _: &[u32],
    ) -> Result<Vec<f32>, ServiceError> {
        Err(ServiceError::Generation("out of memory".into()))
    }

    fn backend(&self) -> &str {
        "failing"
    }
}

pub fn handle_with(model: impl CausalLm + 'static) -> ModelHandle {
    ModelHandle::new("fixture", tokenizer(), Arc::new(model), EOS, 0)
}

pub fn shared_handle(model: &Arc<ScriptedModel>) -> ModelHandle {
    ModelHandle::new("fixture", tokenizer(), model.clone(), EOS, 0)
}

/// Writes a checkpoint directory with the fixture tokenizer and a placeholder module.
pub fn write_checkpoint(dir: &Path) {
    fs::write(dir.join("tokenizer.json"), TOKENIZER_JSON).unwrap();
    fs::write(dir.join("config.json"), r#"{"eos_token_id": 0}"#).unwrap();
    fs::write(dir.join("model.pt"), b"torchscript").unwrap();
}

/// Runs the real checkpoint checks but serves a [`ScriptedModel`] instead of TorchScript.
pub struct FakeLoader {
    script: Vec<u32>,
    loads: AtomicUsize,
}

impl FakeLoader {
    pub fn new(script: &[u32]) -> Self {
        Self {
            script: script.to_vec(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ArtifactLoader for FakeLoader {
    fn load(&self, path: &Path) -> Result<ModelHandle, ServiceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !path.is_dir() {
            return Err(ServiceError::Load(format!("missing {}", path.display())));
        }
        let module = find_module_file(path)?;
        let tokenizer = load_tokenizer(path)?;
        let eos = resolve_eos_token_id(path, &tokenizer)?;
        let size = fs::metadata(&module)
            .map_err(|e| ServiceError::Load(format!("{}: {e}", module.display())))?
            .len();
        Ok(ModelHandle::new(
            path,
            tokenizer,
            Arc::new(ScriptedModel::once(&self.script)),
            eos,
            size,
        ))
    }
}
