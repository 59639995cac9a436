//! ONNX export, validation and execution
//!
//! This module contains:
//! - `proto`: prost declarations of the ONNX messages we read and write
//! - `builder`: Incremental graph construction
//! - `export`: Emits the whole inference graph and writes `kokoro.onnx`
//! - `checker`: Structural validation of a decoded model
//! - `runner`: ONNX Runtime execution (feature `ort`)

pub mod builder;
pub mod checker;
pub mod export;
pub mod proto;
#[cfg(feature = "ort")]
pub mod runner;

use crate::error::{Error, Result};
use crate::models::KokoroConfig;
use builder::GraphBuilder;
use prost::Message;
use proto::ModelProto;
use std::path::Path;

pub use checker::GraphChecker;
pub use export::{build_model, export, MODEL_FILE_NAME};
#[cfg(feature = "ort")]
pub use runner::InferenceGraphRunner;

/// IR version written into exported models.
pub const IR_VERSION: i64 = 8;
/// Default-domain opset the graph is emitted against.
pub const OPSET_VERSION: i64 = 17;
/// `producer_name` of exported models.
pub const PRODUCER_NAME: &str = "kokoro-onnx";

/// Graph-emitting twin of [`ComputeBackend`](crate::models::ComputeBackend).
///
/// Each method appends the nodes for one stage and returns the names of the
/// values it produced.
pub trait ExportGraph {
    fn config(&self) -> &KokoroConfig;

    /// `ids` → `(prosody [1, L, H], acoustic [1, H, L])`
    fn emit_encode(&self, g: &mut GraphBuilder, ids: &str) -> Result<(String, String)>;

    /// → `(features [1, L, H + S], logits [1, L, max_dur])`
    fn emit_durations(
        &self,
        g: &mut GraphBuilder,
        prosody: &str,
        style: &str,
    ) -> Result<(String, String)>;

    /// → `(F0 [1, 1, F], N [1, 1, F])`
    fn emit_prosody(
        &self,
        g: &mut GraphBuilder,
        expanded: &str,
        style: &str,
    ) -> Result<(String, String)>;

    /// → waveform `[1, samples]`
    fn emit_decode(
        &self,
        g: &mut GraphBuilder,
        asr: &str,
        f0: &str,
        n: &str,
        timbre: &str,
    ) -> Result<String>;
}

/// Decode a serialized model.
pub fn decode_model(bytes: &[u8]) -> Result<ModelProto> {
    ModelProto::decode(bytes).map_err(|e| Error::load(format!("malformed ONNX model: {}", e)))
}

/// Read and decode a `.onnx` file.
pub fn read_model(path: impl AsRef<Path>) -> Result<ModelProto> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| Error::load(format!("failed to read {}: {}", path.display(), e)))?;
    decode_model(&bytes)
}
