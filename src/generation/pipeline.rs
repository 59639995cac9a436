//! End-to-end synthesis over a [`ComputeBackend`].

use super::alignment::AlignmentMatrix;
use super::duration::{durations_from_logits, validate_speed, Durations};
use crate::audio::{AudioBuffer, SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::models::ComputeBackend;
use candle_core::{Device, Tensor};
use serde::Serialize;
use std::time::Instant;

/// Per-stage timing breakdown from a synthesis run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesisTiming {
    /// Context and acoustic encoding (ms).
    pub encode_ms: f64,
    /// Duration prediction, alignment and F0/N prediction (ms).
    pub prosody_ms: f64,
    /// Number of acoustic frames after expansion.
    pub frames: usize,
    /// Waveform decoding (ms).
    pub decode_ms: f64,
}

/// Raw waveform plus the alignment it was rendered with.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub audio: AudioBuffer,
    pub durations: Durations,
    pub timing: SynthesisTiming,
}

/// Wait for queued device work so stage timings are accurate on GPUs.
fn sync_device(device: &Device) -> Result<()> {
    match device {
        Device::Cpu => Ok(()),
        _ => {
            let _: Vec<f32> = Tensor::zeros(1, candle_core::DType::F32, device)?.to_vec1()?;
            Ok(())
        }
    }
}

/// Check a raw id sequence and style vector against the model config.
pub fn validate_request<B: ComputeBackend + ?Sized>(
    backend: &B,
    ids: &[i64],
    style: &[f32],
) -> Result<()> {
    let config = backend.config();
    if ids.is_empty() {
        return Err(Error::length("input id sequence is empty"));
    }
    if ids.len() > config.context_length() {
        return Err(Error::length(format!(
            "{} ids exceed the context length {}",
            ids.len(),
            config.context_length()
        )));
    }
    if let Some(&bad) = ids
        .iter()
        .find(|&&id| id < 0 || id as usize >= config.n_token)
    {
        return Err(Error::config(format!(
            "token id {} is outside n_token={}",
            bad, config.n_token
        )));
    }
    if style.len() != config.style_len() {
        return Err(Error::config(format!(
            "style vector has {} values, expected {}",
            style.len(),
            config.style_len()
        )));
    }
    Ok(())
}

/// Synthesize a raw waveform from boundary-wrapped ids.
///
/// `style` holds the timbre half followed by the prosody half. `speed`
/// divides the predicted durations before rounding.
pub fn synthesize<B: ComputeBackend + ?Sized>(
    backend: &B,
    ids: &[i64],
    style: &[f32],
    speed: f32,
) -> Result<SynthesisOutput> {
    validate_request(backend, ids, style)?;
    validate_speed(speed)?;

    let device = backend.device();
    let style_dim = backend.config().style_dim;
    let mut timing = SynthesisTiming::default();

    let ids_t = Tensor::from_slice(ids, (1, ids.len()), device)?;
    let style_t = Tensor::from_slice(style, (1, style.len()), device)?;
    let timbre = style_t.narrow(1, 0, style_dim)?;
    let prosody_style = style_t.narrow(1, style_dim, style_dim)?;

    let start = Instant::now();
    let encoded = backend.encode(&ids_t)?;
    sync_device(device)?;
    timing.encode_ms = start.elapsed().as_secs_f64() * 1000.0;

    let start = Instant::now();
    let duration = backend.predict_durations(&encoded.prosody, &prosody_style)?;
    let durations = durations_from_logits(&duration.logits, speed)?;
    let alignment = AlignmentMatrix::from_durations_boundaries(&durations);
    timing.frames = alignment.frames();

    // [1, L, H + S] -> [1, H + S, F]
    let expanded = alignment.expand(&duration.features.transpose(1, 2)?)?;
    let (f0, n) = backend.predict_prosody(&expanded, &prosody_style)?;
    let asr = alignment.expand(&encoded.acoustic)?;
    sync_device(device)?;
    timing.prosody_ms = start.elapsed().as_secs_f64() * 1000.0;

    let start = Instant::now();
    let waveform = backend.decode(&asr, &f0, &n, &timbre)?;
    let audio = AudioBuffer::from_tensor(&waveform, SAMPLE_RATE)?;
    timing.decode_ms = start.elapsed().as_secs_f64() * 1000.0;

    tracing::debug!(
        "Synthesized {} samples from {} tokens / {} frames",
        audio.len(),
        ids.len(),
        timing.frames
    );
    Ok(SynthesisOutput {
        audio,
        durations,
        timing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DurationOutput, EncodedText, KokoroConfig};
    use candle_core::DType;

    /// Zero logits with `max_dur = 4` give two frames per token at speed 1.
    struct StubBackend {
        config: KokoroConfig,
        device: Device,
    }

    impl StubBackend {
        fn new() -> Self {
            let config = KokoroConfig::from_json(
                r#"{"vocab": {"a": 1, "b": 2}, "n_token": 8, "hidden_dim": 3, "style_dim": 2, "max_dur": 4}"#,
            )
            .unwrap();
            Self {
                config,
                device: Device::Cpu,
            }
        }
    }

    impl ComputeBackend for StubBackend {
        fn device(&self) -> &Device {
            &self.device
        }

        fn config(&self) -> &KokoroConfig {
            &self.config
        }

        fn encode(&self, ids: &Tensor) -> Result<EncodedText> {
            let len = ids.dim(1)?;
            let h = self.config.hidden_dim;
            Ok(EncodedText {
                prosody: Tensor::zeros((1, len, h), DType::F32, &self.device)?,
                acoustic: Tensor::ones((1, h, len), DType::F32, &self.device)?,
            })
        }

        fn predict_durations(&self, prosody: &Tensor, _style: &Tensor) -> Result<DurationOutput> {
            let len = prosody.dim(1)?;
            let width = self.config.hidden_dim + self.config.style_dim;
            Ok(DurationOutput {
                features: Tensor::zeros((1, len, width), DType::F32, &self.device)?,
                logits: Tensor::zeros((1, len, self.config.max_dur), DType::F32, &self.device)?,
            })
        }

        fn predict_prosody(&self, expanded: &Tensor, _style: &Tensor) -> Result<(Tensor, Tensor)> {
            let frames = expanded.dim(2)?;
            let curve = Tensor::zeros((1, 1, frames), DType::F32, &self.device)?;
            Ok((curve.clone(), curve))
        }

        fn decode(&self, asr: &Tensor, _f0: &Tensor, _n: &Tensor, _timbre: &Tensor) -> Result<Tensor> {
            Ok(asr.sum(1)?)
        }
    }

    #[test]
    fn test_pipeline_frames_follow_durations() {
        let backend = StubBackend::new();
        let out = synthesize(&backend, &[0, 1, 2, 0], &[0.0; 4], 1.0).unwrap();
        assert_eq!(out.durations.as_slice(), &[2, 2, 2, 2]);
        assert_eq!(out.timing.frames, 8);
        // every frame is owned by exactly one token with all-ones features
        assert!(out.audio.samples.iter().all(|&s| s == 3.0));
        assert_eq!(out.audio.sample_rate, SAMPLE_RATE);
    }

    #[test]
    fn test_pipeline_speed_shortens_output() {
        let backend = StubBackend::new();
        let slow = synthesize(&backend, &[0, 1, 0], &[0.0; 4], 0.5).unwrap();
        let fast = synthesize(&backend, &[0, 1, 0], &[0.0; 4], 2.0).unwrap();
        assert_eq!(slow.durations.as_slice(), &[4, 4, 4]);
        assert_eq!(fast.durations.as_slice(), &[1, 1, 1]);
        assert!(fast.audio.len() < slow.audio.len());
    }

    #[test]
    fn test_pipeline_rejects_bad_requests() {
        let backend = StubBackend::new();
        let too_long = vec![0i64; backend.config.context_length() + 1];
        assert!(matches!(
            synthesize(&backend, &too_long, &[0.0; 4], 1.0),
            Err(Error::Length(_))
        ));
        assert!(matches!(
            synthesize(&backend, &[], &[0.0; 4], 1.0),
            Err(Error::Length(_))
        ));
        assert!(matches!(
            synthesize(&backend, &[0, 1, 0], &[0.0; 3], 1.0),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            synthesize(&backend, &[0, 9, 0], &[0.0; 4], 1.0),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            synthesize(&backend, &[0, 1, 0], &[0.0; 4], 0.0),
            Err(Error::Config(_))
        ));
    }
}
