//! Short-time Fourier transform helpers
//!
//! Follows the `torch.stft` / `torch.istft` conventions the Kokoro reference
//! relies on: periodic Hann window, `center=True` with reflect padding,
//! one-sided spectra, and window-envelope normalisation on the way back.

use num_complex::Complex;
use rustfft::{num_complex::Complex as FftComplex, FftPlanner};
use std::f32::consts::PI;

/// Smallest window envelope value treated as covered by a frame.
const ENVELOPE_FLOOR: f32 = 1e-11;

/// Periodic Hann window (`scipy.signal.get_window('hann', n, fftbins=True)`).
pub fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / length as f32).cos()))
        .collect()
}

/// Reflect-pad `samples` by `pad` on both sides, excluding the edge sample.
///
/// Signals shorter than the padding clamp to the nearest valid index instead
/// of failing.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    let mut padded = Vec::with_capacity(n + 2 * pad);
    if n == 0 {
        padded.resize(2 * pad, 0.0);
        return padded;
    }
    for i in (1..=pad).rev() {
        padded.push(samples[i.min(n - 1)]);
    }
    padded.extend_from_slice(samples);
    for i in 0..pad {
        padded.push(samples[n.saturating_sub(2 + i)]);
    }
    padded
}

/// A one-sided complex spectrogram, stored frame-major: `frames[t][bin]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    pub frames: Vec<Vec<Complex<f32>>>,
}

impl Spectrogram {
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn n_bins(&self) -> usize {
        self.frames.first().map_or(0, Vec::len)
    }
}

/// Centered STFT/iSTFT pair with a Hann analysis/synthesis window.
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
}

impl Stft {
    /// Create a transform with `win_length = n_fft`. The hop is at least 1.
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        Self {
            n_fft,
            hop_length: hop_length.max(1),
            window: hann_window(n_fft),
        }
    }

    /// `torch.stft` default hop of `n_fft / 4`.
    pub fn with_default_hop(n_fft: usize) -> Self {
        Self::new(n_fft, n_fft / 4)
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of centered frames produced for `n_samples` input samples.
    pub fn n_frames(&self, n_samples: usize) -> usize {
        1 + n_samples / self.hop_length
    }

    /// Forward transform of a mono signal.
    pub fn forward(&self, samples: &[f32]) -> Spectrogram {
        let n_fft = self.n_fft;
        let padded = reflect_pad(samples, n_fft / 2);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        let n_frames = (padded.len() - n_fft) / self.hop_length + 1;
        let mut frames = Vec::with_capacity(n_frames);
        for t in 0..n_frames {
            let start = t * self.hop_length;
            let mut buffer: Vec<FftComplex<f32>> = (0..n_fft)
                .map(|j| FftComplex::new(padded[start + j] * self.window[j], 0.0))
                .collect();
            fft.process(&mut buffer);
            frames.push(
                buffer
                    .iter()
                    .take(self.n_bins())
                    .map(|c| Complex::new(c.re, c.im))
                    .collect(),
            );
        }
        Spectrogram { frames }
    }

    /// Inverse transform with overlap-add and window-envelope normalisation.
    ///
    /// Output length is `hop * (frames - 1)`, matching `torch.istft` with
    /// `center=True` and no explicit length.
    pub fn inverse(&self, spec: &Spectrogram) -> Vec<f32> {
        let n_fft = self.n_fft;
        let n_frames = spec.n_frames();
        if n_frames == 0 {
            return Vec::new();
        }

        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(n_fft);

        let full_len = n_fft + self.hop_length * (n_frames - 1);
        let mut signal = vec![0.0f32; full_len];
        let mut envelope = vec![0.0f32; full_len];
        let scale = 1.0 / n_fft as f32;

        for (t, frame) in spec.frames.iter().enumerate() {
            // Hermitian extension of the one-sided spectrum
            let mut buffer = vec![FftComplex::new(0.0f32, 0.0); n_fft];
            for (k, c) in frame.iter().enumerate().take(n_fft / 2 + 1) {
                buffer[k] = FftComplex::new(c.re, c.im);
                if k > 0 && k < n_fft - k {
                    buffer[n_fft - k] = FftComplex::new(c.re, -c.im);
                }
            }
            ifft.process(&mut buffer);

            let start = t * self.hop_length;
            for (j, c) in buffer.iter().enumerate() {
                let w = self.window[j];
                signal[start + j] += c.re * scale * w;
                envelope[start + j] += w * w;
            }
        }

        for (s, &env) in signal.iter_mut().zip(envelope.iter()) {
            if env > ENVELOPE_FLOOR {
                *s /= env;
            }
        }

        let pad = n_fft / 2;
        let out_len = self.hop_length * (n_frames - 1);
        signal[pad..pad + out_len].to_vec()
    }
}

/// Transposed-convolution kernel realising a one-sided inverse DFT times the
/// synthesis window.
///
/// Shape `[2 * n_bins, 1, n_fft]`: the first `n_bins` input channels take the
/// real parts, the remaining `n_bins` take the imaginary parts. Running it with
/// stride `hop` overlap-adds windowed frames, which is the inverse STFT before
/// envelope normalisation.
pub fn inverse_dft_kernel(n_fft: usize) -> Vec<f32> {
    let n_bins = n_fft / 2 + 1;
    let window = hann_window(n_fft);
    let mut kernel = vec![0.0f32; 2 * n_bins * n_fft];
    for k in 0..n_bins {
        let weight = if k == 0 || 2 * k == n_fft { 1.0 } else { 2.0 } / n_fft as f32;
        for n in 0..n_fft {
            let angle = 2.0 * PI * (k * n % n_fft) as f32 / n_fft as f32;
            kernel[k * n_fft + n] = weight * angle.cos() * window[n];
            kernel[(n_bins + k) * n_fft + n] = -weight * angle.sin() * window[n];
        }
    }
    kernel
}

/// Squared synthesis window, the per-frame contribution to the envelope.
pub fn window_square(n_fft: usize) -> Vec<f32> {
    hann_window(n_fft).into_iter().map(|w| w * w).collect()
}
