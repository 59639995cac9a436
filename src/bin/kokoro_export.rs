//! Export Kokoro to ONNX, or synthesize a sample with either path
//!
//! Usage:
//!     cargo run --features cli --bin kokoro-export -- -c config.json -p kokoro.safetensors -o outputs
//!     cargo run --features cli --bin kokoro-export -- -c config.json -p kokoro.safetensors -o outputs -t --voice af_heart.safetensors
//!     cargo run --features cli --bin kokoro-export -- -c config.json -p kokoro.safetensors -o outputs -m --speed 2

use anyhow::{Context, Result};
use clap::Parser;
use kokoro_onnx::{
    device_info, parse_device, AudioBuffer, Kokoro, KokoroConfig, PhonemeTokenizer,
    SynthesisOptions, TokenSequence, VoicePackFile, SAMPLE_RATE,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Export the Kokoro model to ONNX
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config.json
    #[arg(short, long)]
    config_file: PathBuf,

    /// Path to the safetensors checkpoint
    #[arg(short = 'p', long)]
    checkpoint_path: PathBuf,

    /// Output directory for kokoro.onnx and output.wav
    #[arg(short, long, default_value = "outputs")]
    output_dir: PathBuf,

    /// Run the exported kokoro.onnx through ONNX Runtime
    #[arg(short = 't', long)]
    inference: bool,

    /// Run the numeric model directly
    #[arg(short = 'm', long)]
    check: bool,

    /// Phoneme string to synthesize
    #[arg(long, default_value = "ɪn tədˈeɪz fˈæst pˈeɪst tˈɛk wˈɜːld")]
    phonemes: String,

    /// Voice pack (safetensors). A zero style is used when omitted.
    #[arg(long)]
    voice: Option<PathBuf>,

    /// Speed factor; the exported graph takes whole numbers only
    #[arg(long, default_value_t = 1)]
    speed: i32,

    /// Device for the direct path (auto, cpu, cuda, cuda:N, metal)
    #[arg(long, default_value = "cpu")]
    device: String,
}

fn load_style(voice: Option<&Path>, tokens: &TokenSequence, style_len: usize) -> Result<Vec<f32>> {
    match voice {
        Some(path) => {
            let pack = VoicePackFile::load(path)
                .with_context(|| format!("failed to load voice {}", path.display()))?;
            Ok(pack.style_for(tokens.phoneme_count())?.as_slice().to_vec())
        }
        None => Ok(vec![0.0; style_len]),
    }
}

fn save(audio: &AudioBuffer, output_dir: &Path) -> Result<()> {
    let path = output_dir.join("output.wav");
    audio.save(&path)?;
    println!(
        "Wrote {} ({:.2}s, peak {:.3})",
        path.display(),
        audio.duration(),
        audio.peak()
    );
    Ok(())
}

#[cfg(feature = "ort")]
fn run_inference(args: &Args) -> Result<()> {
    use kokoro_onnx::{InferenceGraphRunner, SpectralPostProcessor};

    let config = KokoroConfig::from_file(&args.config_file)?;
    let tokenizer = PhonemeTokenizer::new(config.vocab.clone(), config.context_length());
    let tokens = tokenizer.encode(&args.phonemes)?;
    let style = load_style(args.voice.as_deref(), &tokens, config.style_len())?;

    let model_path = args.output_dir.join(kokoro_onnx::onnx::MODEL_FILE_NAME);
    let runner = InferenceGraphRunner::load(&model_path)
        .with_context(|| format!("failed to load {}", model_path.display()))?;
    let raw = runner.run(tokens.ids(), &style, args.speed)?;
    println!("output: [1, {}]", raw.len());

    let samples = SpectralPostProcessor::default().process(&raw);
    save(&AudioBuffer::new(samples, SAMPLE_RATE), &args.output_dir)
}

#[cfg(not(feature = "ort"))]
fn run_inference(_args: &Args) -> Result<()> {
    anyhow::bail!("ONNX Runtime support not compiled in. Rebuild with: cargo build --features ort")
}

fn run_check(kokoro: &Kokoro, args: &Args) -> Result<()> {
    let tokens = kokoro.tokenizer().encode(&args.phonemes)?;
    let style = load_style(args.voice.as_deref(), &tokens, kokoro.config().style_len())?;
    let options = SynthesisOptions {
        speed: args.speed as f32,
        ..Default::default()
    };
    let output = kokoro.synthesize_ids(tokens.ids(), &style, &options)?;
    println!(
        "output: {} frames, encode {:.1}ms, prosody {:.1}ms, decode {:.1}ms",
        output.timing.frames,
        output.timing.encode_ms,
        output.timing.prosody_ms,
        output.timing.decode_ms
    );
    save(&output.audio, &args.output_dir)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    if args.inference {
        return run_inference(&args);
    }

    let device = parse_device(&args.device)?;
    println!("Device: {}", device_info(&device));
    let kokoro = Kokoro::from_files(&args.config_file, &args.checkpoint_path, device)
        .context("failed to load Kokoro")?;

    if args.check {
        return run_check(&kokoro, &args);
    }

    let path = kokoro.export_onnx(&args.output_dir)?;
    println!("Exported {}", path.display());
    Ok(())
}
