//! Kokoro model assembled from its five checkpoint sub-modules.

use super::albert::Albert;
use super::backend::{ComputeBackend, EncodedText};
use super::config::KokoroConfig;
use super::decoder::Decoder;
use super::layers::Linear;
use super::prosody::{DurationOutput, ProsodyPredictor};
use super::text_encoder::TextEncoder;
use super::weights::WeightBundle;
use crate::error::Result;
use crate::onnx::builder::GraphBuilder;
use crate::onnx::ExportGraph;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use std::path::Path;

/// Candle implementation of the Kokoro network.
pub struct KokoroModel {
    config: KokoroConfig,
    bert: Albert,
    bert_encoder: Linear,
    predictor: ProsodyPredictor,
    text_encoder: TextEncoder,
    decoder: Decoder,
    device: Device,
}

impl KokoroModel {
    /// Build from a single `VarBuilder` rooted above the sub-module names.
    pub fn new(config: KokoroConfig, vb: VarBuilder) -> Result<Self> {
        let device = vb.device().clone();
        let bert = Albert::new(&config.plbert, config.n_token, vb.pp("bert"))?;
        let bert_encoder = Linear::new(
            config.plbert.hidden_size,
            config.hidden_dim,
            vb.pp("bert_encoder"),
        )?;
        let predictor = ProsodyPredictor::new(
            config.hidden_dim,
            config.style_dim,
            config.max_dur,
            vb.pp("predictor"),
        )?;
        let text_encoder = TextEncoder::new(
            config.hidden_dim,
            config.text_encoder_kernel_size,
            config.n_layer,
            config.n_token,
            vb.pp("text_encoder"),
        )?;
        let decoder = Decoder::new(
            config.hidden_dim,
            config.style_dim,
            &config.istftnet,
            vb.pp("decoder"),
        )?;
        Ok(Self {
            config,
            bert,
            bert_encoder,
            predictor,
            text_encoder,
            decoder,
            device,
        })
    }

    /// Build each sub-module from its own parameter group.
    pub fn from_bundle(config: KokoroConfig, bundle: &WeightBundle) -> Result<Self> {
        let bert = bundle.load("bert", |vb| Albert::new(&config.plbert, config.n_token, vb))?;
        let bert_encoder = bundle.load("bert_encoder", |vb| {
            Linear::new(config.plbert.hidden_size, config.hidden_dim, vb)
        })?;
        let predictor = bundle.load("predictor", |vb| {
            ProsodyPredictor::new(config.hidden_dim, config.style_dim, config.max_dur, vb)
        })?;
        let text_encoder = bundle.load("text_encoder", |vb| {
            TextEncoder::new(
                config.hidden_dim,
                config.text_encoder_kernel_size,
                config.n_layer,
                config.n_token,
                vb,
            )
        })?;
        let decoder = bundle.load("decoder", |vb| {
            Decoder::new(config.hidden_dim, config.style_dim, &config.istftnet, vb)
        })?;
        tracing::info!("Kokoro model loaded ({} tokens)", config.n_token);
        Ok(Self {
            device: bundle.device().clone(),
            config,
            bert,
            bert_encoder,
            predictor,
            text_encoder,
            decoder,
        })
    }

    pub fn from_safetensors(
        config: KokoroConfig,
        path: impl AsRef<Path>,
        device: &Device,
    ) -> Result<Self> {
        let bundle = WeightBundle::from_safetensors(path, device)?;
        Self::from_bundle(config, &bundle)
    }

    pub fn config(&self) -> &KokoroConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl ComputeBackend for KokoroModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn config(&self) -> &KokoroConfig {
        &self.config
    }

    fn encode(&self, ids: &Tensor) -> Result<EncodedText> {
        let bert = self.bert.forward(ids)?;
        let prosody = self.bert_encoder.forward(&bert)?;
        let acoustic = self.text_encoder.forward(ids)?;
        Ok(EncodedText { prosody, acoustic })
    }

    fn predict_durations(&self, prosody: &Tensor, style: &Tensor) -> Result<DurationOutput> {
        self.predictor.predict_durations(prosody, style)
    }

    fn predict_prosody(&self, expanded: &Tensor, style: &Tensor) -> Result<(Tensor, Tensor)> {
        self.predictor.predict_curves(expanded, style)
    }

    fn decode(&self, asr: &Tensor, f0: &Tensor, n: &Tensor, timbre: &Tensor) -> Result<Tensor> {
        self.decoder.forward(asr, f0, n, timbre)
    }
}

impl ExportGraph for KokoroModel {
    fn config(&self) -> &KokoroConfig {
        &self.config
    }

    fn emit_encode(&self, g: &mut GraphBuilder, ids: &str) -> Result<(String, String)> {
        let bert = self.bert.emit(g, ids)?;
        let prosody = self.bert_encoder.emit(g, &bert)?;
        let acoustic = self.text_encoder.emit(g, ids)?;
        Ok((prosody, acoustic))
    }

    fn emit_durations(
        &self,
        g: &mut GraphBuilder,
        prosody: &str,
        style: &str,
    ) -> Result<(String, String)> {
        self.predictor.emit_durations(g, prosody, style)
    }

    fn emit_prosody(
        &self,
        g: &mut GraphBuilder,
        expanded: &str,
        style: &str,
    ) -> Result<(String, String)> {
        self.predictor.emit_curves(g, expanded, style)
    }

    fn emit_decode(
        &self,
        g: &mut GraphBuilder,
        asr: &str,
        f0: &str,
        n: &str,
        timbre: &str,
    ) -> Result<String> {
        self.decoder.emit(g, asr, f0, n, timbre)
    }
}
