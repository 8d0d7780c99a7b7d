use std::time::Instant;

use tokenizers::Tokenizer;
use tracing::debug;

use crate::{
    error::ServiceError,
    model::{FinishReason, GenerationRequest, GenerationResponse, ModelHandle},
    sampling::Sampler,
};

/// Every prompt is encoded into exactly this many positions.
pub const PROMPT_WINDOW: usize = 50;

/// Position assigned to masked slots, matching HF `generate` for left padding.
pub const PAD_POSITION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPrompt {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub position_ids: Vec<u32>,
    /// Real (non-padding) tokens in the window.
    pub prompt_tokens: usize,
    pub truncated: bool,
}

/// Encodes `prompt` into a fixed window: keeps the first `window` tokens, or
/// left-pads with `pad_id` and a zero mask.
pub fn encode_prompt(
    tokenizer: &Tokenizer,
    prompt: &str,
    pad_id: u32,
    window: usize,
) -> Result<EncodedPrompt, ServiceError> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
    let mut ids = encoding.get_ids().to_vec();
    let truncated = ids.len() > window;
    ids.truncate(window);

    let prompt_tokens = ids.len();
    let padding = window - prompt_tokens;
    let mut input_ids = vec![pad_id; padding];
    input_ids.extend_from_slice(&ids);
    let mut attention_mask = vec![0; padding];
    attention_mask.resize(window, 1);
    let position_ids = position_ids(&attention_mask);

    Ok(EncodedPrompt {
        input_ids,
        attention_mask,
        position_ids,
        prompt_tokens,
        truncated,
    })
}

/// `cumsum(mask) - 1` for real tokens, [`PAD_POSITION`] for masked slots.
pub fn position_ids(attention_mask: &[u32]) -> Vec<u32> {
    let mut seen = 0u32;
    attention_mask
        .iter()
        .map(|&m| {
            if m == 0 {
                PAD_POSITION
            } else {
                seen += 1;
                seen - 1
            }
        })
        .collect()
}

pub fn decode(tokenizer: &Tokenizer, ids: &[u32]) -> Result<String, ServiceError> {
    tokenizer
        .decode(ids, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))
}

/// Samples one continuation of `request.prompt` and decodes prompt plus continuation.
///
/// Blocks until sampling ends. Bounds on the request are not checked here.
pub fn generate(
    request: &GenerationRequest,
    handle: &ModelHandle,
) -> Result<GenerationResponse, ServiceError> {
    let tokenizer = handle.tokenizer();
    let eos = handle.eos_token_id();
    let encoded = encode_prompt(tokenizer, &request.prompt, eos, PROMPT_WINDOW)?;
    if encoded.truncated {
        debug!(window = PROMPT_WINDOW, "prompt truncated to window");
    }

    let EncodedPrompt {
        mut input_ids,
        mut attention_mask,
        mut position_ids,
        prompt_tokens,
        truncated,
    } = encoded;
    let mut next_position = prompt_tokens as u32;
    let mut sampler = Sampler::new(request.top_k, request.top_p, request.seed);
    let mut finish_reason = FinishReason::Length;

    let start = Instant::now();
    for _ in 0..request.max_new_tokens {
        let logits = handle
            .model()
            .next_token_logits(&input_ids, &attention_mask, &position_ids)?;
        let next = sampler.sample(&logits)?;
        input_ids.push(next);
        attention_mask.push(1);
        position_ids.push(next_position);
        next_position += 1;
        if next == eos {
            finish_reason = FinishReason::Eos;
            break;
        }
    }
    let elapsed = start.elapsed();

    let tokens_generated = input_ids.len() - PROMPT_WINDOW;
    let text = decode(tokenizer, &input_ids)?;

    let tokens_per_second = if elapsed.as_secs_f64() > 0.0 {
        tokens_generated as f64 / elapsed.as_secs_f64()
    } else {
        tokens_generated as f64
    };

    debug!(
        prompt_tokens,
        tokens_generated,
        ?finish_reason,
        elapsed_ms = elapsed.as_millis() as u64,
        "generation finished"
    );

    Ok(GenerationResponse {
        text,
        prompt_tokens,
        prompt_truncated: truncated,
        tokens_generated,
        finish_reason,
        total_time_ms: elapsed.as_millis(),
        tokens_per_second,
    })
}
