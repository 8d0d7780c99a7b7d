//! Top-k then nucleus (top-p) sampling over raw next-token logits.

use rand::{SeedableRng, distributions::WeightedIndex, prelude::Distribution, rngs::StdRng};

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub token_id: u32,
    pub probability: f64,
}

pub struct Sampler {
    top_k: usize,
    top_p: f64,
    rng: StdRng,
}

impl Sampler {
    /// `top_k == 0` disables the top-k cut; a fixed `seed` makes draws reproducible.
    pub fn new(top_k: usize, top_p: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { top_k, top_p, rng }
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<u32, ServiceError> {
        let candidates = restrict_candidates(logits, self.top_k, self.top_p);
        match candidates.as_slice() {
            [] => Err(ServiceError::Generation(
                "no finite logits to sample from".into(),
            )),
            [only] => Ok(only.token_id),
            _ => {
                let dist = WeightedIndex::new(candidates.iter().map(|c| c.probability))
                    .map_err(|e| ServiceError::Generation(e.to_string()))?;
                Ok(candidates[dist.sample(&mut self.rng)].token_id)
            }
        }
    }
}

/// Candidates that survive the top-k and top-p cuts, most probable first, renormalized.
pub fn restrict_candidates(logits: &[f32], top_k: usize, top_p: f64) -> Vec<Candidate> {
    let mut ranked: Vec<(u32, f32)> = logits
        .iter()
        .enumerate()
        .filter(|(_, logit)| logit.is_finite())
        .map(|(id, &logit)| (id as u32, logit))
        .collect();
    if ranked.is_empty() {
        return Vec::new();
    }

    // stable sort: equal logits keep ascending id order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    if top_k > 0 && top_k < ranked.len() {
        ranked.truncate(top_k);
    }

    let max = f64::from(ranked[0].1);
    let weights: Vec<f64> = ranked
        .iter()
        .map(|(_, logit)| (f64::from(*logit) - max).exp())
        .collect();
    let total: f64 = weights.iter().sum();

    let mut kept = Vec::with_capacity(ranked.len());
    let mut cumulative = 0.0;
    for ((token_id, _), weight) in ranked.iter().zip(&weights) {
        let probability = weight / total;
        kept.push(Candidate {
            token_id: *token_id,
            probability,
        });
        cumulative += probability;
        if cumulative >= top_p {
            break;
        }
    }

    let kept_mass: f64 = kept.iter().map(|c| c.probability).sum();
    for candidate in &mut kept {
        candidate.probability /= kept_mass;
    }
    kept
}
