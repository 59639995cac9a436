//! # Kokoro ONNX
//!
//! Export a [Kokoro](https://huggingface.co/hexgrad/Kokoro-82M)-shaped
//! text-to-speech network to a portable ONNX graph, and run it either
//! directly on candle or through ONNX Runtime.
//!
//! [`KokoroModel`] keeps Kokoro's external contract: the `config.json`
//! layout, the five checkpoint sub-modules, token ids, the 256-wide style
//! vector, the duration policy and the graph signature. Its ALBERT encoder
//! and projection use Kokoro's parameter names; the acoustic text encoder
//! reads Kokoro's embedding and conv stack but not its trailing LSTM. The prosody
//! predictor and the decoder are compact convolutional stand-ins rather than
//! Kokoro's LSTM predictor and source-filter generator, so the published
//! Kokoro-82M checkpoint does not load into them: `from_files` reports a
//! [`Error::Load`] naming the `predictor` sub-module. Other networks can be
//! plugged in through [`ComputeBackend`] and [`ExportGraph`].
//!
//! ## Features
//!
//! - **Direct inference** on candle (CPU, optional CUDA/Metal/MKL/Accelerate)
//! - **ONNX export** of the whole network, duration policy and alignment
//!   included, with dynamic input and output lengths
//! - **Graph checking** of exported models before they reach a runtime
//! - **ONNX Runtime** execution of the exported graph (feature `ort`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kokoro_onnx::{auto_device, Kokoro, SynthesisOptions, VoicePackFile};
//!
//! // A checkpoint laid out for `KokoroModel` (see the crate docs above)
//! let kokoro = Kokoro::from_files("config.json", "kokoro.safetensors", auto_device()?)?;
//! let voice = VoicePackFile::load("voices/af_heart.safetensors")?;
//!
//! let phonemes = "hˈɛloʊ wˈɜːld";
//! let style = voice.style_for(phonemes.chars().count())?;
//! let output = kokoro.synthesize_phonemes(phonemes, style.as_slice(), &SynthesisOptions::default())?;
//! output.audio.save("output.wav")?;
//!
//! // Export kokoro.onnx for other runtimes
//! kokoro.export_onnx("outputs")?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Context encoding**: a PL-BERT (ALBERT) encoder produces prosody
//!    features; a conv text encoder produces acoustic features.
//! 2. **Prosody**: durations per token, expanded to frames by an alignment
//!    matrix, then F0 and energy curves per frame.
//! 3. **Decoding**: an iSTFTNet-style generator predicts magnitude and phase,
//!    inverted by a fixed transposed convolution.
//! 4. **Post-filter**: an STFT low-pass with gain, applied to the raw waveform.
//!
//! ## Sample Rate
//!
//! Output audio is always 24kHz mono.

pub mod audio;
pub mod error;
pub mod generation;
pub mod models;
pub mod onnx;
pub mod tokenizer;
pub mod voice;

use candle_core::Device;
use std::path::{Path, PathBuf};

pub use audio::{AudioBuffer, SpectralPostProcessor, SAMPLE_RATE};
pub use error::{Error, Result};
pub use generation::{Durations, SynthesisOutput, SynthesisTiming};
pub use models::{ComputeBackend, KokoroConfig, KokoroModel, WeightBundle};
#[cfg(feature = "ort")]
pub use onnx::InferenceGraphRunner;
pub use onnx::{ExportGraph, GraphChecker};
pub use tokenizer::{PhonemeTokenizer, TokenSequence};
pub use voice::{StyleVector, VoicePack, VoicePackFile};

/// Options for a synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    /// Duration divisor; values above 1 speak faster
    pub speed: f32,
    /// Apply the spectral post-filter to the raw waveform
    pub postprocess: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            postprocess: true,
        }
    }
}

/// Loaded Kokoro model plus its tokenizer.
///
/// Holds no per-request state; share it by reference across threads.
pub struct Kokoro {
    model: KokoroModel,
    tokenizer: PhonemeTokenizer,
    postprocessor: SpectralPostProcessor,
}

impl Kokoro {
    pub fn new(model: KokoroModel) -> Self {
        let config = model.config();
        let tokenizer = PhonemeTokenizer::new(config.vocab.clone(), config.context_length());
        Self {
            model,
            tokenizer,
            postprocessor: SpectralPostProcessor::default(),
        }
    }

    /// Load `config.json` and a safetensors checkpoint.
    pub fn from_files(
        config_path: impl AsRef<Path>,
        checkpoint_path: impl AsRef<Path>,
        device: Device,
    ) -> Result<Self> {
        let config = KokoroConfig::from_file(config_path)?;
        tracing::info!("Loading Kokoro on {}", device_info(&device));
        let model = KokoroModel::from_safetensors(config, checkpoint_path, &device)?;
        Ok(Self::new(model))
    }

    pub fn model(&self) -> &KokoroModel {
        &self.model
    }

    pub fn config(&self) -> &KokoroConfig {
        self.model.config()
    }

    pub fn tokenizer(&self) -> &PhonemeTokenizer {
        &self.tokenizer
    }

    /// Tokenize a phoneme string and synthesize it.
    pub fn synthesize_phonemes(
        &self,
        phonemes: &str,
        style: &[f32],
        options: &SynthesisOptions,
    ) -> Result<SynthesisOutput> {
        let tokens = self.tokenizer.encode(phonemes)?;
        self.synthesize_ids(tokens.ids(), style, options)
    }

    /// Synthesize a phoneme string with a style looked up from a voice pack.
    pub fn synthesize_with_voice(
        &self,
        phonemes: &str,
        voices: &dyn VoicePack,
        voice: &str,
        options: &SynthesisOptions,
    ) -> Result<SynthesisOutput> {
        let tokens = self.tokenizer.encode(phonemes)?;
        let style = voices.style(voice, tokens.phoneme_count())?;
        self.synthesize_ids(tokens.ids(), style.as_slice(), options)
    }

    /// Synthesize from boundary-wrapped ids.
    pub fn synthesize_ids(
        &self,
        ids: &[i64],
        style: &[f32],
        options: &SynthesisOptions,
    ) -> Result<SynthesisOutput> {
        let mut output = generation::synthesize(&self.model, ids, style, options.speed)?;
        if options.postprocess {
            output.audio = self.postprocess(&output.audio);
        }
        Ok(output)
    }

    /// Apply the spectral post-filter.
    pub fn postprocess(&self, audio: &AudioBuffer) -> AudioBuffer {
        AudioBuffer::new(self.postprocessor.process(&audio.samples), audio.sample_rate)
    }

    /// Write `out_dir/kokoro.onnx` and check it.
    pub fn export_onnx(&self, out_dir: impl AsRef<Path>) -> Result<PathBuf> {
        onnx::export(&self.model, out_dir)
    }
}

/// Select the best available device.
///
/// Priority: CUDA → Metal → CPU
pub fn auto_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse a device string into a [`Device`].
///
/// Supported formats:
/// - `"auto"`: select best available via [`auto_device`]
/// - `"cpu"`: force CPU
/// - `"cuda"` or `"cuda:N"`: CUDA device N (default 0)
/// - `"metal"`: Apple Silicon GPU
pub fn parse_device(device_str: &str) -> Result<Device> {
    match device_str.to_lowercase().as_str() {
        "auto" => auto_device(),
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = match s.strip_prefix("cuda:") {
                    Some(idx) => idx
                        .parse()
                        .map_err(|e| Error::Config(format!("invalid CUDA device index: {e}")))?,
                    None => 0,
                };
                Ok(Device::cuda_if_available(ordinal)?)
            }
            #[cfg(not(feature = "cuda"))]
            Err(Error::Config(
                "CUDA support not compiled in. Rebuild with: cargo build --features cuda".into(),
            ))
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Ok(Device::new_metal(0)?)
            }
            #[cfg(not(feature = "metal"))]
            Err(Error::Config(
                "Metal support not compiled in. Rebuild with: cargo build --features metal".into(),
            ))
        }
        other => Err(Error::Config(format!(
            "unknown device '{other}'. Expected: auto, cpu, cuda, cuda:N, metal"
        ))),
    }
}

/// Human-readable device name.
pub fn device_info(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA".to_string(),
        Device::Metal(_) => "Metal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_options_default() {
        let options = SynthesisOptions::default();
        assert!((options.speed - 1.0).abs() < 1e-6);
        assert!(options.postprocess);
    }

    #[test]
    fn test_parse_device_cpu() {
        assert!(matches!(parse_device("cpu").unwrap(), Device::Cpu));
        assert!(matches!(parse_device("CPU").unwrap(), Device::Cpu));
    }

    #[test]
    fn test_parse_device_unknown() {
        let err = parse_device("tpu").unwrap_err();
        assert!(err.to_string().contains("unknown device"));
    }

    #[test]
    fn test_device_info_cpu() {
        assert_eq!(device_info(&Device::Cpu), "CPU");
    }
}
