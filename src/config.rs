use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::Context;
use serde::Serialize;
#[cfg(feature = "tch-backend")]
use tch::Device;

pub const DEFAULT_MODEL_PATH: &str = "./fine_tuned_tinyllama";
pub const DEFAULT_PROMPT: &str = "Riddle:";

/// Inclusive range enforced by one of the sidebar controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
    pub step: T,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }
}

pub const MAX_NEW_TOKENS_BOUNDS: Bounds<usize> = Bounds {
    min: 20,
    max: 100,
    step: 1,
};
pub const TOP_K_BOUNDS: Bounds<usize> = Bounds {
    min: 10,
    max: 100,
    step: 1,
};
pub const TOP_P_BOUNDS: Bounds<f64> = Bounds {
    min: 0.5,
    max: 1.0,
    step: 0.01,
};

#[derive(Debug, Clone, Serialize)]
pub struct ControlBounds {
    pub max_new_tokens: Bounds<usize>,
    pub top_k: Bounds<usize>,
    pub top_p: Bounds<f64>,
}

impl ControlBounds {
    pub const fn standard() -> Self {
        Self {
            max_new_tokens: MAX_NEW_TOKENS_BOUNDS,
            top_k: TOP_K_BOUNDS,
            top_p: TOP_P_BOUNDS,
        }
    }
}

/// Initial values of the sidebar controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationDefaults {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub top_k: usize,
    pub top_p: f64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            max_new_tokens: 50,
            top_k: 50,
            top_p: 0.95,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_path: PathBuf,
    pub defaults: GenerationDefaults,
    pub seed: Option<u64>,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8501".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8501));

        let model_path = PathBuf::from(
            lookup("MODEL_PATH")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
        );

        let fallback = GenerationDefaults::default();
        let prompt = lookup("DEFAULT_PROMPT").unwrap_or(fallback.prompt);
        let max_new_tokens = lookup("MAX_NEW_TOKENS")
            .and_then(|v| v.parse().ok())
            .filter(|v| MAX_NEW_TOKENS_BOUNDS.contains(*v))
            .unwrap_or(fallback.max_new_tokens);
        let top_k = lookup("TOP_K")
            .and_then(|v| v.parse().ok())
            .filter(|v| TOP_K_BOUNDS.contains(*v))
            .unwrap_or(fallback.top_k);
        let top_p = lookup("TOP_P")
            .and_then(|v| v.parse().ok())
            .filter(|v| TOP_P_BOUNDS.contains(*v))
            .unwrap_or(fallback.top_p);

        // Unlike the sliders, a malformed SEED is an error rather than a fallback.
        let seed = lookup("SEED")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("SEED must be an unsigned integer, got {raw:?}"))
            })
            .transpose()?;

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = lookup("DEVICE").unwrap_or_else(|| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_path,
            defaults: GenerationDefaults {
                prompt,
                max_new_tokens,
                top_k,
                top_p,
            },
            seed,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

#[cfg(feature = "tch-backend")]
pub fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_sidebar_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(config.defaults, GenerationDefaults::default());
        assert_eq!(config.defaults.prompt, "Riddle:");
        assert_eq!(config.listen_addr.port(), 8501);
        assert!(config.seed.is_none());
    }

    #[test]
    fn out_of_bounds_defaults_fall_back() {
        let config = config_from(&[
            ("MAX_NEW_TOKENS", "500"),
            ("TOP_K", "abc"),
            ("TOP_P", "0.2"),
        ])
        .unwrap();
        assert_eq!(config.defaults.max_new_tokens, 50);
        assert_eq!(config.defaults.top_k, 50);
        assert_eq!(config.defaults.top_p, 0.95);
    }

    #[test]
    fn in_bounds_overrides_are_kept() {
        let config = config_from(&[
            ("MAX_NEW_TOKENS", "20"),
            ("TOP_K", "100"),
            ("TOP_P", "1.0"),
            ("MODEL_PATH", "/srv/models/riddler"),
            ("SERVER_ADDR", "0.0.0.0:9000"),
            ("SEED", "7"),
        ])
        .unwrap();
        assert_eq!(config.defaults.max_new_tokens, 20);
        assert_eq!(config.defaults.top_k, 100);
        assert_eq!(config.defaults.top_p, 1.0);
        assert_eq!(config.model_path, PathBuf::from("/srv/models/riddler"));
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn malformed_seed_is_rejected() {
        let err = config_from(&[("SEED", "forty-two")]).unwrap_err();
        assert!(err.to_string().contains("SEED"));
    }

    #[test]
    fn bounds_are_inclusive() {
        assert!(TOP_P_BOUNDS.contains(0.5));
        assert!(TOP_P_BOUNDS.contains(1.0));
        assert!(!TOP_P_BOUNDS.contains(1.01));
        assert!(MAX_NEW_TOKENS_BOUNDS.contains(100));
        assert!(!TOP_K_BOUNDS.contains(9));
    }
}
