//! # Segmenter
//!
//! Turns raw document text into an ordered sequence of size-bounded
//! [`Chunk`]s. Latin text is packed sentence by sentence against a word
//! budget; East-Asian and other scripts, where whitespace does not delimit
//! words, are wrapped by character count. With a [`Tokenizer`] attached the
//! budget is counted in model tokens instead.

use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;

use crate::{
    error::SegmentationError,
    tokenizer::Tokenizer,
    types::{Chunk, Document, LanguageFamily, SizeUnit},
};

/// How far a Latin chunk may overshoot `chunk_size` (in words) before it is
/// hard-split into fixed windows.
pub const HARD_SPLIT_SLACK: usize = 25;

/// Below this many letters a script guess is not trusted.
pub const MIN_DETECTION_CHARS: usize = 12;

static SENTENCE_BOUNDARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?。，、！？·]\s+").unwrap());

/// Splits `text` after every sentence terminator that is followed by
/// whitespace. Terminators stay attached to their sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY_RE.find_iter(text) {
        let terminator_len = text[boundary.start()..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(1);
        sentences.push(text[start..boundary.start() + terminator_len].trim());
        start = boundary.end();
    }
    sentences.push(text[start..].trim());

    sentences.retain(|s| !s.is_empty());
    sentences
}

fn is_east_asian(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF     // Hiragana, Katakana
        | 0x31F0..=0x31FF   // Katakana phonetic extensions
        | 0x3130..=0x318F   // Hangul compatibility jamo
        | 0x1100..=0x11FF   // Hangul jamo
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
        | 0x20000..=0x2FA1F // CJK extensions B..F, compatibility supplement
    )
}

fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c as u32, 0x00C0..=0x024F | 0x1E00..=0x1EFF)
}

/// Guesses the script family of `text` from the letters it contains.
///
/// Short or mixed input without a clear majority script is `Other`.
pub fn detect_language_family(text: &str) -> LanguageFamily {
    let (mut letters, mut latin, mut east_asian) = (0usize, 0usize, 0usize);

    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if is_latin(c) {
            latin += 1;
        } else if is_east_asian(c) {
            east_asian += 1;
        }
    }

    if letters < MIN_DETECTION_CHARS {
        return LanguageFamily::Other;
    }
    if east_asian * 2 > letters {
        LanguageFamily::EastAsian
    } else if latin * 2 > letters {
        LanguageFamily::Latin
    } else {
        LanguageFamily::Other
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Greedily packs consecutive sentences while their combined size stays
/// within `budget`. A sentence larger than the budget ends up alone.
fn pack_sentences<F>(sentences: &[&str], budget: usize, measure: F) -> Vec<(String, usize)>
where
    F: Fn(&str) -> usize,
{
    let mut packed = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0;

    for sentence in sentences {
        let size = measure(sentence);
        if !current.is_empty() && current_size + size > budget {
            packed.push((current.join(" "), current_size));
            current.clear();
            current_size = 0;
        }
        current.push(sentence);
        current_size += size;
    }
    if !current.is_empty() {
        packed.push((current.join(" "), current_size));
    }

    packed
}

/// Splits an oversized chunk into windows of exactly `budget` words (the
/// last window may be shorter).
fn word_windows(text: &str, budget: usize) -> Vec<(String, usize)> {
    let words = text.split_whitespace().collect::<Vec<_>>();
    words
        .chunks(budget)
        .map(|window| (window.join(" "), window.len()))
        .collect()
}

/// Wraps `text` into lines of at most `width` characters, breaking at
/// whitespace where possible and inside words otherwise. Whitespace runs are
/// collapsed to single spaces.
fn wrap_characters(text: &str, width: usize) -> Vec<(String, usize)> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_len = 0;

    for word in text.split_whitespace() {
        let chars = word.chars().collect::<Vec<_>>();

        if chars.len() > width {
            if !line.is_empty() {
                lines.push((std::mem::take(&mut line), line_len));
            }
            let mut pieces = chars.chunks(width).peekable();
            while let Some(piece) = pieces.next() {
                let piece_text = piece.iter().collect::<String>();
                if pieces.peek().is_some() {
                    lines.push((piece_text, piece.len()));
                } else {
                    line = piece_text;
                    line_len = piece.len();
                }
            }
            continue;
        }

        let needed = if line.is_empty() {
            chars.len()
        } else {
            line_len + 1 + chars.len()
        };
        if needed <= width {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
            line_len = needed;
        } else {
            lines.push((std::mem::replace(&mut line, word.to_string()), line_len));
            line_len = chars.len();
        }
    }
    if !line.is_empty() {
        lines.push((line, line_len));
    }

    lines
}

/// Splits an oversized sentence into word groups that each fit the token
/// budget. A single word above the budget is kept whole.
fn token_windows(text: &str, budget: usize, tokenizer: &dyn Tokenizer) -> Vec<(String, usize)> {
    let mut windows = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        let candidate_tokens = tokenizer.count_tokens(&candidate);

        if candidate_tokens <= budget || current.is_empty() {
            current = candidate;
            current_tokens = candidate_tokens;
        } else {
            windows.push((std::mem::take(&mut current), current_tokens));
            current_tokens = tokenizer.count_tokens(word);
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        windows.push((current, current_tokens));
    }

    windows
}

/// Splits documents into chunks.
#[derive(Clone, Copy)]
pub struct Segmenter<'a> {
    chunk_size: usize,
    language_family: Option<LanguageFamily>,
    tokenizer: Option<&'a dyn Tokenizer>,
    by_tokens: bool,
}

impl std::fmt::Debug for Segmenter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("chunk_size", &self.chunk_size)
            .field("language_family", &self.language_family)
            .field("by_tokens", &self.by_tokens)
            .finish()
    }
}

impl<'a> Segmenter<'a> {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            language_family: None,
            tokenizer: None,
            by_tokens: false,
        }
    }

    /// Skips detection and segments as `family`.
    pub fn language_family(mut self, family: Option<LanguageFamily>) -> Self {
        self.language_family = family;
        self
    }

    /// Measures the budget in model tokens.
    pub fn by_tokens(mut self, tokenizer: &'a dyn Tokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self.by_tokens = true;
        self
    }

    /// Segments one document. Chunk ids start at 0.
    #[tracing::instrument(skip(self, text), fields(len = text.len()))]
    pub fn segment(&self, text: &str, source_id: usize) -> Result<Vec<Chunk>, SegmentationError> {
        if self.chunk_size == 0 {
            return Err(SegmentationError::InvalidChunkSize);
        }
        if text.contains('\0') {
            return Err(SegmentationError::BinaryContent);
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let family = self
            .language_family
            .unwrap_or_else(|| detect_language_family(text));

        let (pieces, unit) = if self.by_tokens {
            let tokenizer = self.tokenizer.ok_or(SegmentationError::MissingTokenizer)?;
            (self.pack_tokens(text, tokenizer), SizeUnit::Tokens)
        } else {
            match family {
                LanguageFamily::Latin => (self.pack_words(text), SizeUnit::Words),
                LanguageFamily::EastAsian | LanguageFamily::Other => {
                    (wrap_characters(text, self.chunk_size), SizeUnit::Characters)
                }
            }
        };

        let chunks = pieces
            .into_iter()
            .filter(|(content, _)| !content.trim().is_empty())
            .enumerate()
            .map(|(id, (content, size))| Chunk::new(id, source_id, content, size, unit, family))
            .collect::<Vec<_>>();

        tracing::debug!(count = chunks.len(), ?family, ?unit, "Segmented document");
        Ok(chunks)
    }

    fn pack_words(&self, text: &str) -> Vec<(String, usize)> {
        let sentences = split_sentences(text);
        pack_sentences(&sentences, self.chunk_size, word_count)
            .into_iter()
            .flat_map(|(content, size)| {
                if size > self.chunk_size + HARD_SPLIT_SLACK {
                    word_windows(&content, self.chunk_size)
                } else {
                    vec![(content, size)]
                }
            })
            .collect()
    }

    fn pack_tokens(&self, text: &str, tokenizer: &dyn Tokenizer) -> Vec<(String, usize)> {
        let sentences = split_sentences(text);
        pack_sentences(&sentences, self.chunk_size, |s| tokenizer.count_tokens(s))
            .into_iter()
            .flat_map(|(content, size)| {
                if size > self.chunk_size + HARD_SPLIT_SLACK {
                    token_windows(&content, self.chunk_size, tokenizer)
                } else {
                    let size = tokenizer.count_tokens(&content);
                    vec![(content, size)]
                }
            })
            .collect()
    }
}

/// Segments `text` as document 0 in word mode.
pub fn segment(
    text: &str,
    chunk_size: usize,
    language_family: Option<LanguageFamily>,
) -> Result<Vec<Chunk>, SegmentationError> {
    Segmenter::new(chunk_size)
        .language_family(language_family)
        .segment(text, 0)
}

/// A document that could not be segmented. Other documents of the same run
/// are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub source_id: usize,
    pub filename: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: SegmentationError,
}

fn serialize_display<S: serde::Serializer>(
    error: &SegmentationError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Default)]
pub struct SegmentedDocuments {
    pub chunks: Vec<Chunk>,
    pub failures: Vec<DocumentFailure>,
}

/// Segments every document in parallel. Chunk ids are renumbered so they
/// are unique across the whole run, ordered by `(source_id, position)`.
#[tracing::instrument(skip_all, fields(documents = documents.len()))]
pub fn segment_documents(documents: &[Document], segmenter: &Segmenter<'_>) -> SegmentedDocuments {
    let results = documents
        .par_iter()
        .enumerate()
        .map(|(source_id, doc)| (source_id, segmenter.segment(&doc.text, source_id)))
        .collect::<Vec<_>>();

    let mut segmented = SegmentedDocuments::default();
    for (source_id, result) in results {
        match result {
            Ok(chunks) => segmented.chunks.extend(chunks),
            Err(error) => {
                tracing::warn!(source_id, filename = %documents[source_id].filename, %error, "Failed to segment document");
                segmented.failures.push(DocumentFailure {
                    source_id,
                    filename: documents[source_id].filename.clone(),
                    error,
                });
            }
        }
    }

    segmented.chunks = std::mem::take(&mut segmented.chunks)
        .into_iter()
        .enumerate()
        .map(|(id, chunk)| chunk.renumbered(id))
        .collect();

    segmented
}
