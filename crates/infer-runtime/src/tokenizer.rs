//! Whitespace word tokenizer over a fixed vocabulary.
//!
//! Id 0 is the end-of-sequence marker and id 1 stands for any word outside the
//! vocabulary. The vocabulary never changes after construction, so arbitrary client
//! text cannot grow it.

use std::collections::HashMap;

use infer_engine::{EngineError, Result, TokenId, Tokenizer};

/// End-of-sequence token.
pub const EOS_TOKEN: TokenId = 0;
const EOS_WORD: &str = "</s>";

/// Out-of-vocabulary token.
pub const UNK_TOKEN: TokenId = 1;
const UNK_WORD: &str = "<unk>";

/// Base vocabulary used when a model config does not provide one.
pub const DEFAULT_VOCABULARY: &[&str] = &[
    "hello", "world", "the", "a", "model", "session", "is", "and", "of", "to", "in", "that",
    "it", "was", "for", "on", "are", "with", "as", "they", "be", "at", "one", "have", "this",
    "from", "by", "word", "but", "what", "some", "we", "can", "out", "other", "were", "all",
    "there", "when", "up", "use", "your", "how", "said", "an", "each", "she", "which", "do",
    "their", "time", "if", "will", "way", "about", "many", "then", "them", "write", "would",
    "like", "so", "these", "her", "long", "make", "thing", "see", "him", "two", "has", "look",
];

#[derive(Debug)]
pub struct WordTokenizer {
    vocab: Vec<String>,
    reverse_vocab: HashMap<String, TokenId>,
}

impl WordTokenizer {
    /// Build a tokenizer over `words`. Duplicates and the reserved markers are skipped.
    pub fn new<S: AsRef<str>>(words: &[S]) -> Self {
        let mut tokenizer = Self {
            vocab: Vec::new(),
            reverse_vocab: HashMap::new(),
        };
        for word in [EOS_WORD, UNK_WORD]
            .into_iter()
            .chain(words.iter().map(AsRef::as_ref))
        {
            if tokenizer.reverse_vocab.contains_key(word) {
                continue;
            }
            let Ok(id) = TokenId::try_from(tokenizer.vocab.len()) else {
                tracing::warn!(kept = tokenizer.vocab.len(), "vocabulary truncated to the token id range");
                break;
            };
            tokenizer.vocab.push(word.to_string());
            tokenizer.reverse_vocab.insert(word.to_string(), id);
        }
        tokenizer
    }

    /// Size of the vocabulary, reserved markers included. Models generate ids below it.
    pub fn base_len(&self) -> usize {
        self.vocab.len()
    }
}

impl Default for WordTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_VOCABULARY)
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text
            .split_whitespace()
            .map(|word| self.reverse_vocab.get(word).copied().unwrap_or(UNK_TOKEN))
            .collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        let words = tokens
            .iter()
            .filter(|&&id| id != EOS_TOKEN)
            .map(|&id| {
                usize::try_from(id)
                    .ok()
                    .and_then(|idx| self.vocab.get(idx))
                    .map(String::as_str)
                    .ok_or_else(|| EngineError::Tokenization(format!("invalid token id {id}")))
            })
            .collect::<Result<Vec<&str>>>()?;
        Ok(words.join(" "))
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}
