//! Shared fixtures: a tiny Kokoro with randomly initialised weights.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use kokoro_onnx::{KokoroConfig, KokoroModel};

/// Small enough to run in milliseconds, with every sub-module present.
pub const TINY_CONFIG: &str = r#"{
    "vocab": { "a": 5, "b": 12, "h": 3, "ə": 7, "ˈ": 9, " ": 1 },
    "n_token": 16,
    "hidden_dim": 8,
    "style_dim": 4,
    "n_layer": 2,
    "max_dur": 8,
    "text_encoder_kernel_size": 3,
    "plbert": {
        "hidden_size": 16,
        "num_attention_heads": 2,
        "intermediate_size": 32,
        "max_position_embeddings": 32,
        "num_hidden_layers": 2,
        "embedding_size": 8
    },
    "istftnet": {
        "upsample_rates": [2, 2],
        "upsample_kernel_sizes": [4, 4],
        "upsample_initial_channel": 16,
        "resblock_kernel_sizes": [3],
        "resblock_dilation_sizes": [[1, 3]],
        "gen_istft_n_fft": 8,
        "gen_istft_hop_size": 2
    }
}"#;

pub fn tiny_config() -> KokoroConfig {
    KokoroConfig::from_json(TINY_CONFIG).unwrap()
}

/// Build a model whose weights live in the returned `VarMap`.
pub fn tiny_model() -> (VarMap, KokoroModel) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = KokoroModel::new(tiny_config(), vb).unwrap();
    (varmap, model)
}

/// The tiny model with the published 256-wide style, for voice-pack tests.
pub fn voice_sized_model() -> (VarMap, KokoroModel) {
    let mut json: serde_json::Value = serde_json::from_str(TINY_CONFIG).unwrap();
    json["style_dim"] = serde_json::json!(128);
    let config = KokoroConfig::from_json(&json.to_string()).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = KokoroModel::new(config, vb).unwrap();
    (varmap, model)
}

pub fn zero_style() -> Vec<f32> {
    vec![0.0; tiny_config().style_len()]
}

pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .fold(0.0f32, |acc, (x, y)| acc.max((x - y).abs()))
}
