//! WAV input/output for synthesized waveforms.

use crate::error::Result;
use candle_core::Tensor;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

/// Mono waveform produced by synthesis.
///
/// ```rust,ignore
/// let output = kokoro.synthesize_ids(&ids, &style, &SynthesisOptions::default())?;
/// output.audio.save("output.wav")?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Raw decoder output; not clipped or normalised
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Flatten a `[S]` or `[1, S]` tensor into a buffer.
    pub fn from_tensor(tensor: &Tensor, sample_rate: u32) -> Result<Self> {
        let samples = tensor.flatten_all()?.to_vec1::<f32>()?;
        Ok(Self::new(samples, sample_rate))
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Write a 32-bit float WAV, keeping the raw dynamic range.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        tracing::debug!(
            "Wrote {} samples ({:.2}s) to {}",
            self.len(),
            self.duration(),
            path.display()
        );
        Ok(())
    }

    /// Read a WAV file, downmixing to mono.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let samples = if channels > 1 {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        } else {
            interleaved
        };
        Ok(Self::new(samples, spec.sample_rate))
    }
}
