//! Whole-model graph export
//!
//! Inputs `input_ids` (int64 `[1, input_ids_len]`), `style` (float
//! `[1, 2 * style_dim]`) and `speed` (int32 `[1]`); output `audio` (float
//! `[1, num_samples]`). The duration policy and the token → frame alignment
//! are emitted as graph ops so the sequence length stays dynamic.

use super::builder::{attr_int, GraphBuilder};
use super::checker::GraphChecker;
use super::proto::{data_type, Dim, ModelProto, OperatorSetIdProto};
use super::{read_model, ExportGraph, IR_VERSION, OPSET_VERSION, PRODUCER_NAME};
use crate::error::{Error, Result};
use prost::Message;
use std::path::{Path, PathBuf};

/// File written into the export directory.
pub const MODEL_FILE_NAME: &str = "kokoro.onnx";

pub const INPUT_IDS: &str = "input_ids";
pub const STYLE: &str = "style";
pub const SPEED: &str = "speed";
pub const AUDIO: &str = "audio";

/// Symbolic dims of the dynamic axes.
pub const INPUT_IDS_LEN: &str = "input_ids_len";
pub const NUM_SAMPLES: &str = "num_samples";

/// `Σ sigmoid(logits) / speed`, rounded half-to-even, at least 1. Returns int64 `[L]`.
fn emit_duration_policy(g: &mut GraphBuilder, logits: &str, speed: &str) -> String {
    let probs = g.unary("Sigmoid", logits);
    let axes = g.const_i64(&[-1]);
    let summed = g.node("ReduceSum", &[&probs, &axes], vec![attr_int("keepdims", 0)]);
    let speed = g.cast(speed, data_type::FLOAT);
    let scaled = g.div(&summed, &speed);
    let rounded = g.unary("Round", &scaled);
    let one = g.scalar_f32(1.0);
    let clamped = g.node("Max", &[&rounded, &one], vec![]);
    let frames = g.cast(&clamped, data_type::INT64);
    g.reshape(&frames, &[-1])
}

/// Boundary-comparison alignment `[1, L, F]` from int64 durations `[L]`.
fn emit_alignment(g: &mut GraphBuilder, durations: &str) -> String {
    let axis = g.scalar_i64(0);
    let ends = g.node("CumSum", &[durations, &axis], vec![]);
    let starts = g.sub(&ends, durations);
    let total = g.node("ReduceSum", &[durations], vec![attr_int("keepdims", 0)]);

    let zero = g.scalar_i64(0);
    let step = g.scalar_i64(1);
    let frames = g.node("Range", &[&zero, &total, &step], vec![]);
    let frames = g.unsqueeze(&frames, &[0]);
    let starts = g.unsqueeze(&starts, &[1]);
    let ends = g.unsqueeze(&ends, &[1]);

    let after_start = g.node("GreaterOrEqual", &[&frames, &starts], vec![]);
    let before_end = g.node("Less", &[&frames, &ends], vec![]);
    let inside = g.node("And", &[&after_start, &before_end], vec![]);
    let aln = g.cast(&inside, data_type::FLOAT);
    g.unsqueeze(&aln, &[0])
}

/// Emit the full inference graph for `model`.
pub fn build_model<M: ExportGraph + ?Sized>(model: &M) -> Result<ModelProto> {
    let config = model.config();
    let style_dim = config.style_dim as i64;
    let mut g = GraphBuilder::new();

    let ids = g.input(
        INPUT_IDS,
        data_type::INT64,
        &[Dim::Fixed(1), Dim::Param(INPUT_IDS_LEN.into())],
    );
    let style = g.input(STYLE, data_type::FLOAT, &[Dim::Fixed(1), Dim::Fixed(2 * style_dim)]);
    let speed = g.input(SPEED, data_type::INT32, &[Dim::Fixed(1)]);

    let timbre = g.slice(&style, &[0], &[style_dim], &[1]);
    let prosody_style = g.slice(&style, &[style_dim], &[2 * style_dim], &[1]);

    let (prosody, acoustic) = model.emit_encode(&mut g, &ids)?;
    let (features, logits) = model.emit_durations(&mut g, &prosody, &prosody_style)?;
    let durations = emit_duration_policy(&mut g, &logits, &speed);
    let aln = emit_alignment(&mut g, &durations);

    let features = g.transpose(&features, &[0, 2, 1]);
    let expanded = g.matmul(&features, &aln);
    let (f0, n) = model.emit_prosody(&mut g, &expanded, &prosody_style)?;
    let asr = g.matmul(&acoustic, &aln);
    let audio = model.emit_decode(&mut g, &asr, &f0, &n, &timbre)?;
    g.output(
        &audio,
        AUDIO,
        data_type::FLOAT,
        &[Dim::Fixed(1), Dim::Param(NUM_SAMPLES.into())],
    );

    tracing::debug!(
        "Emitted {} nodes, {} initializers",
        g.num_nodes(),
        g.num_initializers()
    );
    Ok(ModelProto {
        ir_version: IR_VERSION,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: OPSET_VERSION,
        }],
        producer_name: PRODUCER_NAME.to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        graph: Some(g.build("kokoro")),
        ..Default::default()
    })
}

/// Write `out_dir/kokoro.onnx`, then read it back and check it.
pub fn export<M: ExportGraph + ?Sized>(model: &M, out_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(MODEL_FILE_NAME);

    let proto = build_model(model)?;
    std::fs::write(&path, proto.encode_to_vec())?;
    tracing::info!("export {} ok", MODEL_FILE_NAME);

    let written = read_model(&path)?;
    if written != proto {
        return Err(Error::validation(format!(
            "{} does not decode to the exported graph",
            path.display()
        )));
    }
    GraphChecker::for_config(model.config()).check(&written)?;
    tracing::info!("onnx check ok");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_policy_ops() {
        let mut g = GraphBuilder::new();
        let durations = emit_duration_policy(&mut g, "logits", "speed");
        let graph = g.build("t");
        let ops: Vec<&str> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(
            ops,
            ["Sigmoid", "ReduceSum", "Cast", "Div", "Round", "Max", "Cast", "Reshape"]
        );
        assert_eq!(graph.node.last().unwrap().output[0], durations);
    }

    #[test]
    fn test_alignment_uses_boundary_comparison() {
        let mut g = GraphBuilder::new();
        emit_alignment(&mut g, "durations");
        let graph = g.build("t");
        let has = |op: &str| graph.node.iter().any(|n| n.op_type == op);
        assert!(has("CumSum") && has("Range") && has("GreaterOrEqual") && has("Less"));
        assert!(!has("ScatterElements"));
    }
}
