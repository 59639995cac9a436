//! iSTFTNet-style waveform decoder
//!
//! Conv encoder over `[asr; F0; N]`, transposed-conv upsampling stages with
//! AdaIN residual blocks, a magnitude/phase head, and an inverse STFT carried
//! out as a fixed transposed convolution followed by window-envelope
//! normalization.
//!
//! Parameters live under `encode`, `ups`, `resblocks` and `conv_post`, not
//! under Kokoro's `generator` with its harmonic source.

use super::config::IstftNetConfig;
use super::layers::{Conv1d, ConvTranspose1d};
use super::norm::AdaIN1d;
use crate::audio::stft::{inverse_dft_kernel, window_square};
use crate::error::Result;
use crate::onnx::builder::{attr_int, attr_ints, attr_tensor, GraphBuilder};
use crate::onnx::proto::{data_type, TensorProto};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;

const ENCODE_SLOPE: f64 = 0.2;
const UPSAMPLE_SLOPE: f64 = 0.1;
const POST_SLOPE: f64 = 0.01;

/// Residual stack of dilated convolutions, each preceded by AdaIN.
struct AdaResBlock {
    norms: Vec<AdaIN1d>,
    convs: Vec<Conv1d>,
}

impl AdaResBlock {
    fn new(
        channels: usize,
        kernel_size: usize,
        dilations: &[usize],
        style_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut norms = Vec::with_capacity(dilations.len());
        let mut convs = Vec::with_capacity(dilations.len());
        for (j, &dilation) in dilations.iter().enumerate() {
            norms.push(AdaIN1d::new(style_dim, channels, vb.pp("adain1").pp(j))?);
            convs.push(Conv1d::new(
                channels,
                channels,
                kernel_size,
                dilation,
                vb.pp("convs1").pp(j),
            )?);
        }
        Ok(Self { norms, convs })
    }

    fn forward(&self, x: &Tensor, style: &Tensor) -> Result<Tensor> {
        let mut x = x.clone();
        for (norm, conv) in self.norms.iter().zip(&self.convs) {
            let y = norm.forward(&x, style)?;
            let y = candle_nn::ops::leaky_relu(&y, UPSAMPLE_SLOPE)?;
            x = (conv.forward(&y)? + x)?;
        }
        Ok(x)
    }

    fn emit(&self, g: &mut GraphBuilder, x: &str, style: &str) -> Result<String> {
        let mut x = x.to_string();
        for (norm, conv) in self.norms.iter().zip(&self.convs) {
            let y = norm.emit(g, &x, style)?;
            let y = g.leaky_relu(&y, UPSAMPLE_SLOPE as f32);
            let y = conv.emit(g, &y)?;
            x = g.add(&y, &x);
        }
        Ok(x)
    }
}

struct UpsampleStage {
    up: ConvTranspose1d,
    block: AdaResBlock,
}

/// Fixed inverse-STFT operator.
struct InverseStft {
    name: String,
    n_fft: usize,
    hop: usize,
    /// `[2 * n_bins, 1, n_fft]`
    kernel: Tensor,
    /// `[1, 1, n_fft]`
    window_sq: Tensor,
}

impl InverseStft {
    fn new(name: String, n_fft: usize, hop: usize, device: &Device) -> Result<Self> {
        let n_bins = n_fft / 2 + 1;
        Ok(Self {
            name,
            n_fft,
            hop,
            kernel: Tensor::from_vec(inverse_dft_kernel(n_fft), (2 * n_bins, 1, n_fft), device)?,
            window_sq: Tensor::from_vec(window_square(n_fft), (1, 1, n_fft), device)?,
        })
    }

    /// `[1, 2 * n_bins, T]` real/imag spectra → `[1, hop * (T - 1)]`.
    fn forward(&self, spectrum: &Tensor) -> Result<Tensor> {
        let frames = spectrum.dim(D::Minus1)?;
        let signal = spectrum.conv_transpose1d(&self.kernel, 0, 0, self.hop, 1, 1)?;
        let ones = Tensor::ones((1, 1, frames), DType::F32, spectrum.device())?;
        let envelope = ones.conv_transpose1d(&self.window_sq, 0, 0, self.hop, 1, 1)?;
        let signal = (signal / envelope)?;
        let trimmed = signal.narrow(D::Minus1, self.n_fft / 2, self.hop * (frames - 1))?;
        Ok(trimmed.squeeze(1)?)
    }

    fn emit(&self, g: &mut GraphBuilder, spectrum: &str) -> Result<String> {
        let kernel = g.weight(&format!("{}.kernel", self.name), &self.kernel)?;
        let window_sq = g.weight(&format!("{}.window_sq", self.name), &self.window_sq)?;
        let attrs = |n_fft: usize, hop: usize| {
            vec![
                attr_ints("kernel_shape", &[n_fft as i64]),
                attr_ints("strides", &[hop as i64]),
                attr_int("group", 1),
            ]
        };
        let signal = g.node(
            "ConvTranspose",
            &[spectrum, &kernel],
            attrs(self.n_fft, self.hop),
        );

        // ones [1, 1, T] shaped after the spectrum's frame axis
        let shape = g.unary("Shape", spectrum);
        let frames = g.slice(&shape, &[2], &[3], &[0]);
        let one = g.const_i64(&[1]);
        let ones_shape = g.concat(&[&one, &one, &frames], 0);
        let one_value = TensorProto {
            dims: vec![1],
            data_type: data_type::FLOAT,
            float_data: vec![1.0],
            ..Default::default()
        };
        let ones = g.node(
            "ConstantOfShape",
            &[&ones_shape],
            vec![attr_tensor("value", one_value)],
        );
        let envelope = g.node(
            "ConvTranspose",
            &[&ones, &window_sq],
            attrs(self.n_fft, self.hop),
        );

        let signal = g.div(&signal, &envelope);
        let half = (self.n_fft / 2) as i64;
        let trimmed = g.slice(&signal, &[half], &[-half], &[2]);
        Ok(g.squeeze(&trimmed, &[1]))
    }
}

/// `(asr [1, H, F], F0 [1, 1, F], N [1, 1, F], timbre [1, S])` → `[1, samples]`.
pub struct Decoder {
    encode: Conv1d,
    encode_norm: AdaIN1d,
    stages: Vec<UpsampleStage>,
    conv_post: Conv1d,
    istft: InverseStft,
    n_bins: usize,
}

impl Decoder {
    pub fn new(
        hidden: usize,
        style_dim: usize,
        config: &IstftNetConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut channels = config.upsample_initial_channel;
        let encode = Conv1d::new(hidden + 2, channels, 3, 1, vb.pp("encode"))?;
        let encode_norm = AdaIN1d::new(style_dim, channels, vb.pp("encode_norm"))?;

        let kernel = config.resblock_kernel_sizes[0];
        let dilations = &config.resblock_dilation_sizes[0];
        let mut stages = Vec::with_capacity(config.upsample_rates.len());
        for (i, (&rate, &k)) in config
            .upsample_rates
            .iter()
            .zip(&config.upsample_kernel_sizes)
            .enumerate()
        {
            let out = channels / 2;
            stages.push(UpsampleStage {
                up: ConvTranspose1d::new(channels, out, k, rate, vb.pp("ups").pp(i))?,
                block: AdaResBlock::new(out, kernel, dilations, style_dim, vb.pp("resblocks").pp(i))?,
            });
            channels = out;
        }

        let n_bins = config.n_bins();
        let conv_post = Conv1d::new(channels, 2 * n_bins, 7, 1, vb.pp("conv_post"))?;
        let istft = InverseStft::new(
            format!("{}.istft", vb.prefix()),
            config.gen_istft_n_fft,
            config.gen_istft_hop_size,
            vb.device(),
        )?;
        Ok(Self {
            encode,
            encode_norm,
            stages,
            conv_post,
            istft,
            n_bins,
        })
    }

    pub fn forward(&self, asr: &Tensor, f0: &Tensor, n: &Tensor, timbre: &Tensor) -> Result<Tensor> {
        let x = Tensor::cat(&[asr, f0, n], 1)?;
        let x = self.encode_norm.forward(&self.encode.forward(&x)?, timbre)?;
        let mut x = candle_nn::ops::leaky_relu(&x, ENCODE_SLOPE)?;

        for stage in &self.stages {
            let y = candle_nn::ops::leaky_relu(&x, UPSAMPLE_SLOPE)?;
            let y = stage.up.forward(&y)?;
            x = stage.block.forward(&y, timbre)?;
        }

        let x = candle_nn::ops::leaky_relu(&x, POST_SLOPE)?;
        let head = self.conv_post.forward(&x)?;
        let magnitude = head.narrow(1, 0, self.n_bins)?.exp()?;
        let phase = head.narrow(1, self.n_bins, self.n_bins)?.sin()?;
        let real = (&magnitude * phase.cos()?)?;
        let imag = (&magnitude * phase.sin()?)?;
        let spectrum = Tensor::cat(&[real, imag], 1)?;
        self.istft.forward(&spectrum)
    }

    pub fn emit(
        &self,
        g: &mut GraphBuilder,
        asr: &str,
        f0: &str,
        n: &str,
        timbre: &str,
    ) -> Result<String> {
        let x = g.concat(&[asr, f0, n], 1);
        let x = self.encode.emit(g, &x)?;
        let x = self.encode_norm.emit(g, &x, timbre)?;
        let mut x = g.leaky_relu(&x, ENCODE_SLOPE as f32);

        for stage in &self.stages {
            let y = g.leaky_relu(&x, UPSAMPLE_SLOPE as f32);
            let y = stage.up.emit(g, &y)?;
            x = stage.block.emit(g, &y, timbre)?;
        }

        let x = g.leaky_relu(&x, POST_SLOPE as f32);
        let head = self.conv_post.emit(g, &x)?;
        let nb = self.n_bins as i64;
        let magnitude = g.slice(&head, &[0], &[nb], &[1]);
        let magnitude = g.unary("Exp", &magnitude);
        let phase = g.slice(&head, &[nb], &[2 * nb], &[1]);
        let phase = g.unary("Sin", &phase);
        let cos = g.unary("Cos", &phase);
        let sin = g.unary("Sin", &phase);
        let real = g.mul(&magnitude, &cos);
        let imag = g.mul(&magnitude, &sin);
        let spectrum = g.concat(&[&real, &imag], 1);
        self.istft.emit(g, &spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stft::{Spectrogram, Stft};
    use candle_nn::VarMap;
    use num_complex::Complex;

    fn tiny_config() -> IstftNetConfig {
        IstftNetConfig {
            upsample_rates: vec![2, 2],
            upsample_kernel_sizes: vec![4, 4],
            upsample_initial_channel: 16,
            resblock_kernel_sizes: vec![3],
            resblock_dilation_sizes: vec![vec![1, 3]],
            gen_istft_n_fft: 8,
            gen_istft_hop_size: 2,
        }
    }

    #[test]
    fn test_decoder_output_length() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = tiny_config();
        let decoder = Decoder::new(6, 4, &config, vb.pp("decoder")).unwrap();
        let frames = 5;
        let asr = Tensor::randn(0f32, 1.0, (1, 6, frames), &Device::Cpu).unwrap();
        let curve = Tensor::randn(0f32, 1.0, (1, 1, frames), &Device::Cpu).unwrap();
        let timbre = Tensor::zeros((1, 4), DType::F32, &Device::Cpu).unwrap();
        let audio = decoder.forward(&asr, &curve, &curve, &timbre).unwrap();
        assert_eq!(audio.dims(), &[1, config.samples_for_frames(frames)]);
    }

    #[test]
    fn test_inverse_stft_matches_host_istft() {
        let n_fft = 16;
        let hop = 4;
        let frames = 6;
        let n_bins = n_fft / 2 + 1;
        let istft = InverseStft::new("istft".into(), n_fft, hop, &Device::Cpu).unwrap();

        // Deterministic spectrum with zero imaginary DC / Nyquist parts
        let mut real = vec![0f32; n_bins * frames];
        let mut imag = vec![0f32; n_bins * frames];
        for k in 0..n_bins {
            for t in 0..frames {
                real[k * frames + t] = ((k * 3 + t) % 5) as f32 * 0.1;
                if k != 0 && k != n_bins - 1 {
                    imag[k * frames + t] = ((k + 2 * t) % 7) as f32 * 0.05 - 0.1;
                }
            }
        }
        let mut data = real.clone();
        data.extend_from_slice(&imag);
        let spectrum = Tensor::from_vec(data, (1, 2 * n_bins, frames), &Device::Cpu).unwrap();
        let via_conv: Vec<f32> = istft
            .forward(&spectrum)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        let spec = Spectrogram {
            frames: (0..frames)
                .map(|t| {
                    (0..n_bins)
                        .map(|k| Complex::new(real[k * frames + t], imag[k * frames + t]))
                        .collect()
                })
                .collect(),
        };
        let via_fft = Stft::new(n_fft, hop).inverse(&spec);

        assert_eq!(via_conv.len(), via_fft.len());
        for (a, b) in via_conv.iter().zip(&via_fft) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }
}
