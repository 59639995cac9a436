//! Spectral post-filter applied to decoder output
//!
//! STFT → magnitude gain → low-pass bin mask → inverse STFT. The phase of
//! every bin is kept; only magnitudes change.

use super::stft::{Spectrogram, Stft};
use crate::error::{Error, Result};
use num_complex::Complex;

/// Default analysis window length.
pub const POST_N_FFT: usize = 100;
/// Default magnitude gain.
pub const POST_GAIN: f32 = 3.0;
/// Default first masked bin (`bin * 24000 / 100` = 4.32 kHz).
pub const POST_CUTOFF_BIN: usize = 18;

/// Zeroes every frequency bin at or above `cutoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowPassMask {
    cutoff: usize,
}

impl LowPassMask {
    pub fn new(cutoff: usize) -> Self {
        Self { cutoff }
    }

    pub fn cutoff(&self) -> usize {
        self.cutoff
    }

    /// Apply to a magnitude spectrogram in place (`frames[t][bin]`).
    pub fn apply(&self, magnitudes: &mut [Vec<f32>]) {
        for frame in magnitudes.iter_mut() {
            for m in frame.iter_mut().skip(self.cutoff) {
                *m = 0.0;
            }
        }
    }
}

/// Configurable post-filter. Defaults: `n_fft = 100`, hop 25, gain 3.0,
/// cutoff bin 18.
pub struct SpectralPostProcessor {
    stft: Stft,
    gain: f32,
    mask: LowPassMask,
}

impl Default for SpectralPostProcessor {
    fn default() -> Self {
        Self {
            stft: Stft::with_default_hop(POST_N_FFT),
            gain: POST_GAIN,
            mask: LowPassMask::new(POST_CUTOFF_BIN),
        }
    }
}

impl SpectralPostProcessor {
    /// `n_fft` must be at least 4 so the `n_fft / 4` hop is non-zero.
    pub fn new(n_fft: usize, gain: f32, cutoff_bin: usize) -> Result<Self> {
        if n_fft < 4 {
            return Err(Error::config(format!(
                "post-filter n_fft must be at least 4, got {}",
                n_fft
            )));
        }
        if !gain.is_finite() {
            return Err(Error::config(format!("post-filter gain must be finite, got {}", gain)));
        }
        Ok(Self {
            stft: Stft::with_default_hop(n_fft),
            gain,
            mask: LowPassMask::new(cutoff_bin),
        })
    }

    pub fn mask(&self) -> LowPassMask {
        self.mask
    }

    pub fn hop_length(&self) -> usize {
        self.stft.hop_length()
    }

    /// Length of the filtered output for `n_samples` input samples.
    pub fn output_len(&self, n_samples: usize) -> usize {
        self.stft.hop_length() * (self.stft.n_frames(n_samples) - 1)
    }

    /// Filter a waveform. Output length is `hop * (frames - 1)`, i.e. the
    /// input length rounded down to a multiple of the hop.
    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let spec = self.stft.forward(samples);

        let mut magnitudes: Vec<Vec<f32>> = spec
            .frames
            .iter()
            .map(|frame| frame.iter().map(|c| c.norm() * self.gain).collect())
            .collect();
        self.mask.apply(&mut magnitudes);

        let frames = spec
            .frames
            .iter()
            .zip(magnitudes.iter())
            .map(|(frame, mags)| {
                frame
                    .iter()
                    .zip(mags.iter())
                    .map(|(c, &m)| Complex::from_polar(m, c.arg()))
                    .collect()
            })
            .collect();

        self.stft.inverse(&Spectrogram { frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.3 * (2.0 * PI * freq * i as f32 / 24000.0).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_mask_is_idempotent() {
        let mask = LowPassMask::new(18);
        let mut once: Vec<Vec<f32>> = (0..4)
            .map(|t| (0..51).map(|b| (t * 51 + b) as f32 + 1.0).collect())
            .collect();
        mask.apply(&mut once);
        let mut twice = once.clone();
        mask.apply(&mut twice);
        assert_eq!(once, twice);
        assert!(once.iter().all(|f| f[..18].iter().all(|&m| m > 0.0)));
        assert!(once.iter().all(|f| f[18..].iter().all(|&m| m == 0.0)));
    }

    #[test]
    fn test_output_length() {
        let post = SpectralPostProcessor::default();
        assert_eq!(post.hop_length(), 25);
        assert_eq!(post.process(&vec![0.0; 1000]).len(), 1000);
        assert_eq!(post.process(&vec![0.0; 1013]).len(), 1000);
        assert_eq!(post.output_len(1013), 1000);
    }

    #[test]
    fn test_low_tone_gets_gain() {
        // 960 Hz sits on bin 4
        let post = SpectralPostProcessor::default();
        let input = tone(960.0, 4800);
        let output = post.process(&input);
        let ratio = rms(&output[200..4600]) / rms(&input[200..4600]);
        assert!((ratio - POST_GAIN).abs() < 0.1, "ratio {}", ratio);
    }

    #[test]
    fn test_high_tone_is_removed() {
        // 7.2 kHz sits on bin 30, well above the cutoff
        let post = SpectralPostProcessor::default();
        let input = tone(7200.0, 4800);
        let output = post.process(&input);
        assert!(rms(&output[200..4600]) < 1e-2 * rms(&input));
    }

    #[test]
    fn test_tiny_window_is_rejected() {
        for n_fft in [0, 1, 3] {
            assert!(matches!(
                SpectralPostProcessor::new(n_fft, POST_GAIN, POST_CUTOFF_BIN),
                Err(Error::Config(_))
            ));
        }
        let post = SpectralPostProcessor::new(4, 1.0, 2).unwrap();
        assert_eq!(post.hop_length(), 1);
        assert_eq!(post.process(&[0.0; 10]).len(), post.output_len(10));
    }

    #[test]
    fn test_custom_matches_default() {
        let custom = SpectralPostProcessor::new(POST_N_FFT, POST_GAIN, POST_CUTOFF_BIN).unwrap();
        let input = tone(960.0, 1200);
        assert_eq!(custom.process(&input), SpectralPostProcessor::default().process(&input));
    }

    #[test]
    fn test_silence_stays_silent() {
        let post = SpectralPostProcessor::default();
        let output = post.process(&vec![0.0; 500]);
        assert!(output.iter().all(|&s| s == 0.0));
    }
}
