//! Phoneme string → token id mapping

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Longest phoneme string passed to the model; longer input is truncated.
pub const MAX_PHONEMES: usize = 510;

/// Boundary marker id placed at both ends of every sequence.
pub const BOUNDARY_ID: i64 = 0;

/// Token ids wrapped in boundary markers: `[0, ids..., 0]`.
///
/// Also remembers how many phoneme symbols survived truncation, counted
/// before vocabulary misses were dropped. Voice packs are indexed by that
/// count, not by the number of ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    ids: Vec<i64>,
    phoneme_count: usize,
}

impl TokenSequence {
    /// Wrap raw (unbounded) ids with boundary markers.
    pub fn from_inner(inner: &[i64]) -> Self {
        Self::with_phoneme_count(inner, inner.len())
    }

    fn with_phoneme_count(inner: &[i64], phoneme_count: usize) -> Self {
        let mut ids = Vec::with_capacity(inner.len() + 2);
        ids.push(BOUNDARY_ID);
        ids.extend_from_slice(inner);
        ids.push(BOUNDARY_ID);
        Self { ids, phoneme_count }
    }

    /// Full sequence including boundary markers.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Ids between the boundary markers.
    pub fn inner(&self) -> &[i64] {
        &self.ids[1..self.ids.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false: a sequence holds at least the two boundary markers.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Symbols kept after truncation, misses included.
    pub fn phoneme_count(&self) -> usize {
        self.phoneme_count
    }
}

/// Vocabulary lookup from phoneme symbols to token ids.
#[derive(Debug, Clone)]
pub struct PhonemeTokenizer {
    vocab: HashMap<String, u32>,
    context_length: usize,
}

impl PhonemeTokenizer {
    pub fn new(vocab: HashMap<String, u32>, context_length: usize) -> Self {
        Self {
            vocab,
            context_length,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }

    /// Id of a single symbol, `None` when the vocabulary lacks it.
    pub fn lookup(&self, symbol: &str) -> Option<u32> {
        self.vocab.get(symbol).copied()
    }

    /// Encode a phoneme string; every `char` is one symbol.
    pub fn encode(&self, phonemes: &str) -> Result<TokenSequence> {
        let symbols: Vec<String> = phonemes.chars().map(String::from).collect();
        self.encode_iter(symbols.iter().map(String::as_str))
    }

    /// Encode pre-split symbols.
    pub fn encode_symbols<S: AsRef<str>>(&self, symbols: &[S]) -> Result<TokenSequence> {
        self.encode_iter(symbols.iter().map(AsRef::as_ref))
    }

    fn encode_iter<'a>(&self, symbols: impl Iterator<Item = &'a str>) -> Result<TokenSequence> {
        let symbols: Vec<&str> = symbols.collect();
        let kept = if symbols.len() > MAX_PHONEMES {
            tracing::warn!(
                "Truncating {} phonemes to the first {}",
                symbols.len(),
                MAX_PHONEMES
            );
            &symbols[..MAX_PHONEMES]
        } else {
            &symbols[..]
        };

        let ids: Vec<i64> = kept
            .iter()
            .filter_map(|s| self.lookup(s))
            .map(i64::from)
            .collect();

        if ids.len() + 2 > self.context_length {
            return Err(Error::config(format!(
                "{} tokens plus boundary markers exceed context length {}",
                ids.len(),
                self.context_length
            )));
        }

        tracing::debug!("phonemes -> input_ids: {:?}", ids);
        Ok(TokenSequence::with_phoneme_count(&ids, kept.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(context_length: usize) -> PhonemeTokenizer {
        let vocab = [("h", 50u32), ("ə", 83), ("l", 54), ("ˈ", 156), ("O", 31)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        PhonemeTokenizer::new(vocab, context_length)
    }

    #[test]
    fn test_encode_wraps_with_boundaries() {
        let seq = tokenizer(512).encode("həlˈO").unwrap();
        assert_eq!(seq.ids(), &[0, 50, 83, 54, 156, 31, 0]);
        assert_eq!(seq.inner(), &[50, 83, 54, 156, 31]);
        assert_eq!(seq.len(), 7);
    }

    #[test]
    fn test_missing_symbols_are_dropped() {
        let seq = tokenizer(512).encode("h?l!").unwrap();
        assert_eq!(seq.ids(), &[0, 50, 54, 0]);
    }

    #[test]
    fn test_all_absent_yields_markers_only() {
        let seq = tokenizer(512).encode("xyz").unwrap();
        assert_eq!(seq.ids(), &[0, 0]);
        assert!(seq.inner().is_empty());
    }

    #[test]
    fn test_phoneme_count_includes_misses() {
        let seq = tokenizer(512).encode("h?l").unwrap();
        assert_eq!(seq.inner().len(), 2);
        assert_eq!(seq.phoneme_count(), 3);

        let seq = tokenizer(512).encode("xyz").unwrap();
        assert_eq!(seq.ids(), &[0, 0]);
        assert_eq!(seq.phoneme_count(), 3);

        assert_eq!(TokenSequence::from_inner(&[50, 54]).phoneme_count(), 2);
    }

    #[test]
    fn test_truncates_to_max_phonemes() {
        let long = "h?".repeat(400);
        let seq = tokenizer(512).encode(&long).unwrap();
        assert_eq!(seq.phoneme_count(), MAX_PHONEMES);
        assert_eq!(seq.inner().len(), MAX_PHONEMES / 2);

        let long = "h".repeat(600);
        let seq = tokenizer(512).encode(&long).unwrap();
        assert_eq!(seq.len(), MAX_PHONEMES + 2);
        assert_eq!(seq.ids()[0], 0);
        assert_eq!(seq.ids()[MAX_PHONEMES + 1], 0);
    }

    #[test]
    fn test_small_context_is_config_error() {
        let err = tokenizer(4).encode("həl").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(tokenizer(5).encode("həl").is_ok());
    }

    #[test]
    fn test_encode_symbols_and_lookup() {
        let tok = tokenizer(512);
        let seq = tok.encode_symbols(&["h", "ˈ", "missing"]).unwrap();
        assert_eq!(seq.ids(), &[0, 50, 156, 0]);
        assert_eq!(tok.lookup("ə"), Some(83));
        assert_eq!(tok.lookup("?"), None);
        assert_eq!(tok.vocab_size(), 5);
    }
}
