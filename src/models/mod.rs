//! Neural network models for Kokoro
//!
//! This module contains:
//! - `layers`, `norm`: Parameterised layers and style-conditioned normalization
//! - `albert`: PL-BERT context encoder (one shared ALBERT layer)
//! - `text_encoder`: Acoustic text encoder
//! - `prosody`: Duration, F0 and energy predictor
//! - `decoder`: iSTFTNet-style waveform decoder
//! - `weights`: Checkpoint loading per sub-module
//! - `kokoro`: The assembled model, a [`ComputeBackend`]
//! - `config`: Model configuration

pub mod albert;
pub mod backend;
pub mod config;
pub mod decoder;
pub mod kokoro;
pub mod layers;
pub mod norm;
pub mod prosody;
pub mod text_encoder;
pub mod weights;

pub use backend::{ComputeBackend, EncodedText};
pub use config::{IstftNetConfig, KokoroConfig, PlBertConfig};
pub use kokoro::KokoroModel;
pub use prosody::DurationOutput;
pub use weights::{WeightBundle, SUBMODULES};
