//! Print the token ids Kokoro sees for a phoneme string
//!
//! Usage:
//!     cargo run --features cli --bin phoneme-ids -- -c config.json "hˈɛloʊ"

use anyhow::Result;
use clap::Parser;
use kokoro_onnx::{KokoroConfig, PhonemeTokenizer};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config.json
    #[arg(short, long)]
    config_file: PathBuf,

    /// Phoneme string (one symbol per character)
    phonemes: String,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();
    let config = KokoroConfig::from_file(&args.config_file)?;
    let context_length = config.context_length();
    let tokenizer = PhonemeTokenizer::new(config.vocab, context_length);
    let tokens = tokenizer.encode(&args.phonemes)?;

    if args.json {
        println!("{}", serde_json::to_string(tokens.ids())?);
    } else {
        let ids: Vec<String> = tokens.ids().iter().map(i64::to_string).collect();
        println!("{}", ids.join(" "));
    }
    Ok(())
}
