//! Audio processing for Kokoro
//!
//! This module provides:
//! - WAV file I/O
//! - Centered STFT / iSTFT and the decoder's inverse-DFT kernel
//! - The spectral post-filter applied to synthesized audio

mod io;
pub mod postprocess;
pub mod stft;

pub use io::AudioBuffer;
pub use postprocess::{LowPassMask, SpectralPostProcessor};
pub use stft::{hann_window, Spectrogram, Stft};

/// Output sample rate of Kokoro
pub const SAMPLE_RATE: u32 = 24000;
