//! Whitespace tokenizer with a fixed special-token block.
//!
//! Id layout:
//!
//! ```text
//! 0..=6                      special tokens (pad, bos, eos, sep, cls, mask, unk)
//! 7..FIRST_WORD_ID           reserved
//! FIRST_WORD_ID..hashed      vocabulary words
//! hashed..vocab_size         buckets for words outside the vocabulary
//! ```
//!
//! Words outside the vocabulary are hashed into the bucket range, so distinct unknown words may
//! share an id and render back as a `<w{id}>` placeholder. The number of tokens always matches the
//! number of whitespace-delimited words.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{CoreError, CoreResult};

pub const PAD_ID: u32 = 0;
pub const BOS_ID: u32 = 1;
pub const EOS_ID: u32 = 2;
pub const SEP_ID: u32 = 3;
pub const CLS_ID: u32 = 4;
pub const MASK_ID: u32 = 5;
pub const UNK_ID: u32 = 6;

/// Highest special id; detokenization drops everything at or below it.
pub const MAX_SPECIAL_ID: u32 = UNK_ID;

/// First id handed to vocabulary words.
pub const FIRST_WORD_ID: u32 = 100;

const BUILTIN_VOCABULARY: &[&str] = &[
    "the", "of", "and", "to", "in", "a", "is", "that", "for", "it", "with", "as", "was", "on",
    "be", "at", "by", "this", "from", "an", "are", "or", "not", "have", "had", "but", "what",
    "all", "were", "when", "we", "there", "can", "been", "has", "more", "if", "no", "so", "like",
    "who", "would", "make", "about", "which", "their", "they", "you", "he", "she", "will",
    // programming
    "int", "char", "void", "main", "return", "include", "const", "static", "struct", "while",
    "else", "break", "continue", "def", "class", "import", "self", "None", "True", "False",
    "fn", "let", "mut", "pub", "impl", "function", "var", "public", "private", "new", "null",
    "code", "value", "error", "memory", "buffer", "string", "file", "data",
    "result", "loop", "print", "input", "output", "{", "}", "(", ")", ";", "=", "==", "+",
    "-", "*", "/", "<", ">",
];

/// Special-token ids in one place, for callers that report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub pad: u32,
    pub bos: u32,
    pub eos: u32,
    pub sep: u32,
    pub cls: u32,
    pub mask: u32,
    pub unk: u32,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            pad: PAD_ID,
            bos: BOS_ID,
            eos: EOS_ID,
            sep: SEP_ID,
            cls: CLS_ID,
            mask: MASK_ID,
            unk: UNK_ID,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab_size: u32,
    max_length: usize,
    /// Indexed by `id - FIRST_WORD_ID`. `None` marks a blank or duplicate vocabulary line.
    words: Vec<Option<String>>,
    ids: HashMap<String, u32>,
}

impl Tokenizer {
    /// Tokenizer over the built-in vocabulary.
    pub fn builtin(vocab_size: u32, max_length: usize) -> CoreResult<Self> {
        Self::from_words(
            BUILTIN_VOCABULARY.iter().map(|w| (*w).to_string()),
            vocab_size,
            max_length,
        )
    }

    /// Loads a vocabulary file with one word per line. Line `n` gets id `FIRST_WORD_ID + n`.
    pub fn from_file(path: &Path, vocab_size: u32, max_length: usize) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ModelLoad(format!("cannot read vocabulary {}: {}", path.display(), e))
        })?;
        Self::from_words(
            content.lines().map(|l| l.trim().to_string()),
            vocab_size,
            max_length,
        )
    }

    fn from_words<I>(words: I, vocab_size: u32, max_length: usize) -> CoreResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut ordered = Vec::new();
        let mut ids = HashMap::new();
        for word in words {
            // Skipped lines still consume their id.
            let id = FIRST_WORD_ID as u64 + ordered.len() as u64;
            if word.is_empty() || word.chars().any(char::is_whitespace) || ids.contains_key(&word)
            {
                ordered.push(None);
                continue;
            }
            ids.insert(word.clone(), id as u32);
            ordered.push(Some(word));
        }

        let first_bucket = FIRST_WORD_ID as u64 + ordered.len() as u64;
        if u64::from(vocab_size) <= first_bucket {
            return Err(CoreError::ModelLoad(format!(
                "vocabulary size {} leaves no room for {} words above id {}",
                vocab_size,
                ordered.len(),
                FIRST_WORD_ID
            )));
        }
        if max_length < 2 {
            return Err(CoreError::ModelLoad(
                "max sequence length must hold at least the BOS and EOS markers".to_string(),
            ));
        }

        Ok(Self {
            vocab_size,
            max_length,
            words: ordered,
            ids,
        })
    }

    pub fn vocab_size(&self) -> u32 {
        self.vocab_size
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens::default()
    }

    /// Number of ids held by the vocabulary, unused lines included.
    pub fn known_words(&self) -> usize {
        self.words.len()
    }

    fn first_bucket(&self) -> u32 {
        FIRST_WORD_ID + self.words.len() as u32
    }

    /// Whether `id` is a hash bucket rather than a vocabulary word or special token.
    pub fn is_hashed(&self, id: u32) -> bool {
        id >= self.first_bucket() && id < self.vocab_size
    }

    /// Id of a single word: its vocabulary id, or its hash bucket.
    pub fn word_id(&self, word: &str) -> u32 {
        if let Some(id) = self.ids.get(word) {
            return *id;
        }
        let hash = word
            .bytes()
            .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
        let first = self.first_bucket();
        first + hash % (self.vocab_size - first)
    }

    /// BOS followed by one id per word. This is the prompt form used by generation.
    pub fn encode(&self, text: &str) -> CoreResult<Vec<u32>> {
        let mut ids = Vec::with_capacity(text.len() / 4 + 2);
        ids.push(BOS_ID);
        for word in text.split_whitespace() {
            if ids.len() >= self.max_length {
                return Err(CoreError::TokenizeFailed(format!(
                    "input exceeds {} tokens",
                    self.max_length
                )));
            }
            ids.push(self.word_id(word));
        }
        Ok(ids)
    }

    /// BOS, one id per word, EOS.
    pub fn tokenize(&self, text: &str) -> CoreResult<Vec<u32>> {
        let mut ids = self.encode(text)?;
        if ids.len() >= self.max_length {
            return Err(CoreError::TokenizeFailed(format!(
                "input exceeds {} tokens",
                self.max_length
            )));
        }
        ids.push(EOS_ID);
        Ok(ids)
    }

    /// Text for a single id, `None` for special tokens.
    pub fn token_text(&self, id: u32) -> Option<String> {
        if id <= MAX_SPECIAL_ID {
            return None;
        }
        if id < FIRST_WORD_ID {
            return Some(format!("<special{}>", id));
        }
        match self.words.get((id - FIRST_WORD_ID) as usize) {
            Some(Some(word)) => Some(word.clone()),
            _ => Some(format!("<w{}>", id)),
        }
    }

    pub fn detokenize(&self, ids: &[u32]) -> String {
        let mut text = String::new();
        for id in ids {
            if let Some(piece) = self.token_text(*id) {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&piece);
            }
        }
        text
    }
}
