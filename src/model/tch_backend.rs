use std::path::Path;

use parking_lot::Mutex;
use tch::{CModule, Device, IValue, Kind, Tensor, no_grad};

use crate::{error::ServiceError, model::CausalLm};

/// TorchScript export of a causal LM taking `(input_ids, attention_mask, position_ids)`.
pub struct TorchCausalLm {
    device: Device,
    backend: String,
    module: Mutex<CModule>,
}

impl TorchCausalLm {
    pub fn load(module_path: &Path, device: Device) -> Result<Self, ServiceError> {
        let mut module = CModule::load_on_device(module_path, device)
            .map_err(|e| ServiceError::Load(format!("{}: {e}", module_path.display())))?;
        module.set_eval();

        Ok(Self {
            device,
            backend: format!("torchscript/{device:?}").to_lowercase(),
            module: Mutex::new(module),
        })
    }
}

impl CausalLm for TorchCausalLm {
    fn next_token_logits(
        &self,
        input_ids: &[u32],
        attention_mask: &[u32],
        position_ids: &[u32],
    ) -> Result<Vec<f32>, ServiceError> {
        let seq_len = input_ids.len() as i64;
        let ids: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = attention_mask.iter().map(|&m| m as i64).collect();
        let positions: Vec<i64> = position_ids.iter().map(|&p| p as i64).collect();

        no_grad(|| {
            let ids = Tensor::from_slice(&ids)
                .reshape([1, seq_len])
                .to(self.device);
            let mask = Tensor::from_slice(&mask)
                .reshape([1, seq_len])
                .to(self.device);
            let positions = Tensor::from_slice(&positions)
                .reshape([1, seq_len])
                .to(self.device);

            let output = {
                let module = self.module.lock();
                module
                    .forward_is(&[
                        IValue::Tensor(ids),
                        IValue::Tensor(mask),
                        IValue::Tensor(positions),
                    ])
                    .map_err(|e| ServiceError::Generation(e.to_string()))?
            };

            // Traced HF models return either bare logits or (logits, past_key_values, ..).
            let logits = match output {
                IValue::Tensor(t) => t,
                IValue::Tuple(items) => match items.into_iter().next() {
                    Some(IValue::Tensor(t)) => t,
                    _ => {
                        return Err(ServiceError::Generation(
                            "expected logits tensor as first tuple element".into(),
                        ));
                    }
                },
                _ => {
                    return Err(ServiceError::Generation(
                        "unexpected model output format".into(),
                    ));
                }
            };

            // [1, seq, vocab] -> [vocab] at the last position
            let last = logits
                .select(0, 0)
                .select(0, -1)
                .to_kind(Kind::Float)
                .to_device(Device::Cpu);
            Vec::<f32>::try_from(&last).map_err(|e| ServiceError::Generation(e.to_string()))
        })
    }

    fn backend(&self) -> &str {
        &self.backend
    }
}
