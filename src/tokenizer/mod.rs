//! Phoneme tokenization for Kokoro
//!
//! Grapheme-to-phoneme conversion happens upstream; this module only maps
//! phoneme symbols to vocabulary ids.

mod phoneme;

pub use phoneme::{PhonemeTokenizer, TokenSequence, BOUNDARY_ID, MAX_PHONEMES};
