//! Checkpoint loading
//!
//! A Kokoro checkpoint is a flat safetensors map keyed `<submodule>.<param>`.
//! Parameters are grouped per sub-module; every sub-module must be present.
//! Weight-normalized convolutions (`weight_g` / `weight_v`) are folded into a
//! plain `weight` on load.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Sub-modules a checkpoint must provide.
pub const SUBMODULES: [&str; 5] = ["bert", "bert_encoder", "predictor", "text_encoder", "decoder"];

/// Prefix added by `DataParallel` checkpoints.
const DATA_PARALLEL_PREFIX: &str = "module.";

/// Fold `weight_g * weight_v / ||weight_v||` (norm over all but dim 0).
fn fold_weight_norm(g: &Tensor, v: &Tensor) -> Result<Tensor> {
    let v = v.to_dtype(DType::F32)?;
    let rank = v.rank();
    let mut norm = v.sqr()?;
    for dim in (1..rank).rev() {
        norm = norm.sum_keepdim(dim)?;
    }
    let norm = norm.sqrt()?;
    let scale = g.to_dtype(DType::F32)?.broadcast_div(&norm)?;
    Ok(v.broadcast_mul(&scale)?)
}

fn fold_all_weight_norms(params: &mut HashMap<String, Tensor>) -> Result<usize> {
    let stems: Vec<String> = params
        .keys()
        .filter_map(|k| k.strip_suffix(".weight_g").map(str::to_string))
        .filter(|stem| params.contains_key(&format!("{}.weight_v", stem)))
        .collect();
    for stem in &stems {
        let g = params.remove(&format!("{}.weight_g", stem));
        let v = params.remove(&format!("{}.weight_v", stem));
        if let (Some(g), Some(v)) = (g, v) {
            params.insert(format!("{}.weight", stem), fold_weight_norm(&g, &v)?);
        }
    }
    Ok(stems.len())
}

/// Parameters grouped by sub-module.
pub struct WeightBundle {
    groups: BTreeMap<String, HashMap<String, Tensor>>,
    device: Device,
}

impl WeightBundle {
    /// Read a safetensors checkpoint.
    pub fn from_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::load(format!(
                "checkpoint not found: {}",
                path.display()
            )));
        }
        tracing::info!("Loading weights from {}", path.display());
        let tensors = candle_core::safetensors::load(path, device)
            .map_err(|e| Error::load(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_tensors(tensors, device)
    }

    /// Group a flat tensor map by its first key segment.
    pub fn from_tensors(tensors: HashMap<String, Tensor>, device: &Device) -> Result<Self> {
        let mut groups: BTreeMap<String, HashMap<String, Tensor>> = BTreeMap::new();
        for (key, tensor) in tensors {
            let (module, param) = key
                .split_once('.')
                .ok_or_else(|| Error::load(format!("weight key '{}' has no sub-module", key)))?;
            if !SUBMODULES.contains(&module) {
                return Err(Error::load(format!(
                    "unknown sub-module '{}' in checkpoint",
                    module
                )));
            }
            groups
                .entry(module.to_string())
                .or_default()
                .insert(param.to_string(), tensor);
        }

        if let Some(missing) = SUBMODULES.iter().find(|m| !groups.contains_key(**m)) {
            return Err(Error::load(format!(
                "checkpoint is missing sub-module '{}'",
                missing
            )));
        }

        for (module, params) in groups.iter_mut() {
            let folded = fold_all_weight_norms(params)?;
            if folded > 0 {
                tracing::debug!("Folded {} weight-normalized tensors in {}", folded, module);
            }
        }
        Ok(Self {
            groups,
            device: device.clone(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of parameters stored for a sub-module.
    pub fn num_params(&self, module: &str) -> usize {
        self.groups.get(module).map_or(0, HashMap::len)
    }

    fn var_builder(&self, module: &str, params: HashMap<String, Tensor>) -> VarBuilder<'static> {
        let keyed = params
            .into_iter()
            .map(|(k, v)| (format!("{}.{}", module, k), v))
            .collect();
        VarBuilder::from_tensors(keyed, DType::F32, &self.device).pp(module)
    }

    /// Build a sub-module, retrying once with the `module.` prefix stripped.
    pub fn load<T>(&self, module: &str, build: impl Fn(VarBuilder<'static>) -> Result<T>) -> Result<T> {
        let params = self
            .groups
            .get(module)
            .ok_or_else(|| Error::load(format!("checkpoint is missing sub-module '{}'", module)))?;

        match build(self.var_builder(module, params.clone())) {
            Ok(built) => Ok(built),
            Err(first) => {
                tracing::warn!(
                    "Did not load {} as stored ({}); retrying without '{}' prefix",
                    module,
                    first,
                    DATA_PARALLEL_PREFIX
                );
                let stripped = params
                    .iter()
                    .map(|(k, v)| {
                        let key = k.strip_prefix(DATA_PARALLEL_PREFIX).unwrap_or(k);
                        (key.to_string(), v.clone())
                    })
                    .collect();
                build(self.var_builder(module, stripped)).map_err(|e| {
                    Error::load(format!("failed to load sub-module '{}': {}", module, e))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::layers::Linear;

    fn tensors(keys: &[&str]) -> HashMap<String, Tensor> {
        keys.iter()
            .map(|k| {
                let t = Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap();
                (k.to_string(), t)
            })
            .collect()
    }

    const ALL: [&str; 5] = [
        "bert.x",
        "bert_encoder.weight",
        "predictor.x",
        "text_encoder.x",
        "decoder.x",
    ];

    #[test]
    fn test_missing_submodule_is_named() {
        let err = WeightBundle::from_tensors(tensors(&ALL[..4]), &Device::Cpu)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Load(_)));
        assert!(err.to_string().contains("decoder"));
    }

    #[test]
    fn test_unknown_submodule_rejected() {
        let mut keys = ALL.to_vec();
        keys.push("vocoder.x");
        let err = WeightBundle::from_tensors(tensors(&keys), &Device::Cpu)
            .err()
            .unwrap();
        assert!(err.to_string().contains("vocoder"));
    }

    #[test]
    fn test_data_parallel_prefix_is_stripped() {
        let keys = [
            "bert.x",
            "bert_encoder.module.weight",
            "bert_encoder.module.bias",
            "predictor.x",
            "text_encoder.x",
            "decoder.x",
        ];
        let mut map = tensors(&keys);
        map.insert(
            "bert_encoder.module.bias".into(),
            Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap(),
        );
        let bundle = WeightBundle::from_tensors(map, &Device::Cpu).unwrap();
        let linear = bundle
            .load("bert_encoder", |vb| Linear::new(2, 2, vb))
            .unwrap();
        let x = Tensor::ones((1, 1, 2), DType::F32, &Device::Cpu).unwrap();
        let y: Vec<f32> = linear.forward(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(y, vec![2.0, 2.0]);
    }

    #[test]
    fn test_failed_retry_is_load_error() {
        let bundle = WeightBundle::from_tensors(tensors(&ALL), &Device::Cpu).unwrap();
        let err = bundle
            .load("predictor", |vb| Linear::new(3, 3, vb.pp("proj")))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Load(_)));
    }

    #[test]
    fn test_weight_norm_is_folded() {
        let mut keys = ALL.to_vec();
        keys.retain(|k| *k != "decoder.x");
        let mut map = tensors(&keys);
        // v rows have norms 5 and 1; g rescales them to 10 and 3
        map.insert(
            "decoder.conv.weight_v".into(),
            Tensor::new(&[[[3f32, 4.0]], [[0.0, 1.0]]], &Device::Cpu).unwrap(),
        );
        map.insert(
            "decoder.conv.weight_g".into(),
            Tensor::new(&[[[10f32]], [[3.0]]], &Device::Cpu).unwrap(),
        );
        let bundle = WeightBundle::from_tensors(map, &Device::Cpu).unwrap();
        assert_eq!(bundle.num_params("decoder"), 1);
        let w = bundle
            .load("decoder", |vb| Ok(vb.get((2, 1, 2), "conv.weight")?))
            .unwrap();
        let values: Vec<f32> = w.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![6.0, 8.0, 0.0, 3.0]);
    }
}
