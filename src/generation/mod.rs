//! Inference control flow for Kokoro
//!
//! This module provides:
//! - The duration policy (logits → frame counts, speed scaling)
//! - Token → frame alignment with two equivalent constructions
//! - The end-to-end synthesis pipeline over any [`ComputeBackend`](crate::models::ComputeBackend)

pub mod alignment;
pub mod duration;
pub mod pipeline;

pub use alignment::AlignmentMatrix;
pub use duration::{durations_from_logits, round_durations, validate_speed, Durations};
pub use pipeline::{synthesize, SynthesisOutput, SynthesisTiming};
