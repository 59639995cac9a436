//! ONNX Runtime execution of an exported Kokoro graph.

use super::checker::GraphChecker;
use super::export::{INPUT_IDS, SPEED, STYLE};
use super::proto::{Dim, GraphProto};
use super::read_model;
use crate::error::{Error, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use std::sync::Mutex;

fn runtime_err(context: &str) -> impl FnOnce(ort::Error) -> Error + '_ {
    move |e| Error::Runtime(format!("{}: {}", context, e))
}

/// Rows of the embedding table whose initializer name ends in `suffix`.
fn embedding_rows(graph: &GraphProto, suffix: &str) -> Result<usize> {
    graph
        .initializer
        .iter()
        .find(|t| t.name.ends_with(suffix))
        .and_then(|t| t.dims.first())
        .map(|&rows| rows as usize)
        .ok_or_else(|| Error::validation(format!("graph has no '*{}' initializer", suffix)))
}

/// Runs `kokoro.onnx`; shareable across threads.
pub struct InferenceGraphRunner {
    session: Mutex<Session>,
    style_len: usize,
    context_length: usize,
    n_token: usize,
}

impl InferenceGraphRunner {
    /// Check the graph structure, then open an ONNX Runtime session on it.
    ///
    /// A graph that fails the check is never handed to the runtime.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let model = read_model(path)?;
        let style_len = model
            .graph
            .as_ref()
            .and_then(|g| g.input.iter().find(|i| i.name == STYLE))
            .and_then(|i| i.tensor_signature())
            .and_then(|(_, dims)| match dims.as_slice() {
                [_, Dim::Fixed(n)] => Some(*n as usize),
                _ => None,
            })
            .ok_or_else(|| Error::validation("graph has no [1, N] 'style' input"))?;
        GraphChecker::kokoro(style_len).check(&model)?;
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| Error::validation("model has no graph"))?;
        let context_length = embedding_rows(graph, "position_embeddings.weight")?;
        let n_token = embedding_rows(graph, "word_embeddings.weight")?;

        let session = Session::builder()
            .map_err(runtime_err("failed to create session"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime_err("failed to set optimization level"))?
            .commit_from_file(path)
            .map_err(runtime_err("failed to load model"))?;
        tracing::info!("Loaded {} into ONNX Runtime", path.display());
        Ok(Self {
            session: Mutex::new(session),
            style_len,
            context_length,
            n_token,
        })
    }

    pub fn style_len(&self) -> usize {
        self.style_len
    }

    /// Longest id sequence the graph accepts, boundary markers included.
    pub fn context_length(&self) -> usize {
        self.context_length
    }

    pub fn n_token(&self) -> usize {
        self.n_token
    }

    /// Run one request and return the raw waveform.
    pub fn run(&self, ids: &[i64], style: &[f32], speed: i32) -> Result<Vec<f32>> {
        if ids.is_empty() {
            return Err(Error::length("input id sequence is empty"));
        }
        if ids.len() > self.context_length {
            return Err(Error::length(format!(
                "{} ids exceed the context length {}",
                ids.len(),
                self.context_length
            )));
        }
        if let Some(&bad) = ids
            .iter()
            .find(|&&id| id < 0 || id as usize >= self.n_token)
        {
            return Err(Error::config(format!(
                "token id {} is outside n_token={}",
                bad, self.n_token
            )));
        }
        if style.len() != self.style_len {
            return Err(Error::config(format!(
                "style vector has {} values, expected {}",
                style.len(),
                self.style_len
            )));
        }
        if speed < 1 {
            return Err(Error::config(format!(
                "graph speed must be a positive integer, got {}",
                speed
            )));
        }

        let input_ids = ort::value::Tensor::from_array(([1usize, ids.len()], ids.to_vec()))
            .map_err(runtime_err("failed to create input_ids tensor"))?;
        let style = ort::value::Tensor::from_array(([1usize, style.len()], style.to_vec()))
            .map_err(runtime_err("failed to create style tensor"))?;
        let speed = ort::value::Tensor::from_array(([1usize], vec![speed]))
            .map_err(runtime_err("failed to create speed tensor"))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::Runtime("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![
                INPUT_IDS => input_ids,
                STYLE => style,
                SPEED => speed
            ])
            .map_err(runtime_err("inference failed"))?;
        let (_, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(runtime_err("failed to extract audio"))?;
        Ok(audio.to_vec())
    }
}
