//! Voice packs: style vectors keyed by phoneme count.
//!
//! A Kokoro voice stores one 256-float style per utterance length. Row
//! `n - 1` is used for an utterance of `n` phonemes.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use std::path::Path;

/// Width of a full style vector.
pub const STYLE_LEN: usize = 256;

/// Timbre half followed by prosody half.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleVector(Vec<f32>);

impl StyleVector {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != STYLE_LEN {
            return Err(Error::config(format!(
                "style vector has {} values, expected {}",
                values.len(),
                STYLE_LEN
            )));
        }
        Ok(Self(values))
    }

    /// All-zero style, mostly useful for smoke tests.
    pub fn zeros() -> Self {
        Self(vec![0.0; STYLE_LEN])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Decoder half (indices `< 128`).
    pub fn timbre(&self) -> &[f32] {
        &self.0[..STYLE_LEN / 2]
    }

    /// Predictor half (indices `>= 128`).
    pub fn prosody(&self) -> &[f32] {
        &self.0[STYLE_LEN / 2..]
    }
}

/// Source of style vectors.
pub trait VoicePack: Send + Sync {
    /// Style for an utterance of `phoneme_count` phonemes (boundary markers excluded).
    fn style(&self, voice: &str, phoneme_count: usize) -> Result<StyleVector>;
}

/// One voice stored as a safetensors tensor of shape `[N, 1, 256]` or `[N, 256]`.
pub struct VoicePackFile {
    name: String,
    rows: Tensor,
}

impl VoicePackFile {
    /// Load the first tensor of a voice file. The voice name is the file stem.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::load(format!(
                "voice pack not found: {}",
                path.display()
            )));
        }
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(|e| Error::load(format!("failed to read {}: {}", path.display(), e)))?;
        // Kokoro voice files hold a single tensor; take the lexically first key otherwise
        let mut keys: Vec<&String> = tensors.keys().collect();
        keys.sort();
        let key = keys
            .first()
            .ok_or_else(|| Error::load(format!("voice pack {} is empty", path.display())))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_tensor(name, &tensors[*key])
    }

    pub fn from_tensor(name: impl Into<String>, tensor: &Tensor) -> Result<Self> {
        let rows = match tensor.dims() {
            [n, 1, STYLE_LEN] => tensor.reshape((*n, STYLE_LEN))?,
            [_, STYLE_LEN] => tensor.clone(),
            dims => {
                return Err(Error::load(format!(
                    "voice pack tensor has shape {:?}, expected [N, 1, {}] or [N, {}]",
                    dims, STYLE_LEN, STYLE_LEN
                )))
            }
        };
        let name = name.into();
        tracing::debug!("Loaded voice '{}' with {} styles", name, rows.dim(0)?);
        Ok(Self {
            name,
            rows: rows.to_dtype(DType::F32)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored lengths.
    pub fn len(&self) -> usize {
        self.rows.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Style for `phoneme_count` phonemes: row `phoneme_count - 1`.
    pub fn style_for(&self, phoneme_count: usize) -> Result<StyleVector> {
        if phoneme_count == 0 || phoneme_count > self.len() {
            return Err(Error::length(format!(
                "no style for {} phonemes in voice '{}' ({} rows)",
                phoneme_count,
                self.name,
                self.len()
            )));
        }
        let row = self.rows.get(phoneme_count - 1)?.to_vec1::<f32>()?;
        StyleVector::new(row)
    }
}

impl VoicePack for VoicePackFile {
    fn style(&self, voice: &str, phoneme_count: usize) -> Result<StyleVector> {
        if voice != self.name {
            return Err(Error::load(format!(
                "voice '{}' is not in this pack (has '{}')",
                voice, self.name
            )));
        }
        self.style_for(phoneme_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(rows: usize) -> VoicePackFile {
        let values: Vec<f32> = (0..rows * STYLE_LEN).map(|i| (i / STYLE_LEN) as f32).collect();
        let tensor = Tensor::from_vec(values, (rows, 1, STYLE_LEN), &Device::Cpu).unwrap();
        VoicePackFile::from_tensor("af", &tensor).unwrap()
    }

    #[test]
    fn test_row_is_count_minus_one() {
        let voice = pack(4);
        let style = voice.style("af", 3).unwrap();
        assert!(style.as_slice().iter().all(|&v| v == 2.0));
        assert_eq!(style.timbre().len(), 128);
        assert_eq!(style.prosody().len(), 128);
    }

    #[test]
    fn test_out_of_range_is_length_error() {
        let voice = pack(2);
        assert!(matches!(voice.style_for(3), Err(Error::Length(_))));
        assert!(matches!(voice.style_for(0), Err(Error::Length(_))));
    }

    #[test]
    fn test_bad_shape_rejected() {
        let tensor = Tensor::zeros((2, 128), DType::F32, &Device::Cpu).unwrap();
        assert!(VoicePackFile::from_tensor("x", &tensor).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bf_emma.safetensors");
        let tensor = Tensor::ones((3, STYLE_LEN), DType::F32, &Device::Cpu).unwrap();
        candle_core::safetensors::save(
            &std::collections::HashMap::from([("style".to_string(), tensor)]),
            &path,
        )
        .unwrap();
        let voice = VoicePackFile::load(&path).unwrap();
        assert_eq!(voice.name(), "bf_emma");
        assert_eq!(voice.len(), 3);
        assert!(voice.style("af", 1).is_err());
    }
}
