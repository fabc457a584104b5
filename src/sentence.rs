use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

/// Sentence terminators: latin, full-width CJK, Arabic and Devanagari.
const SENTENCE_END: &str = r"[.!?…。！？؟।॥]";

/// A terminator run counts as a boundary only once the next word (an upper-case,
/// title-case or caseless letter) or an enumerated list item is already buffered.
static SENTENCE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s)(.*?{SENTENCE_END}+)(?:\s+[\p{{Lu}}\p{{Lt}}\p{{Lo}}]|\s+\d+\.\s+)"
    ))
    .expect("sentence boundary regex")
});

static ABBREVIATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\p{L}{1,3}\.$").expect("abbreviation regex"));

static WORD_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*+([^*]+)\*+").expect("word marker regex"));

static LINE_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\*+").expect("line marker regex"));

/// How many trailing characters of a candidate are checked for an abbreviation.
const ABBREVIATION_WINDOW: usize = 5;

/// Online sentence segmenter for text that arrives in arbitrary pieces.
///
/// `carry` holds a sentence candidate that ended on a suspected abbreviation,
/// `pending` holds text not yet known to end a sentence. `carry + pending` is always
/// everything added since the last reset minus what has been emitted.
#[derive(Debug, Default)]
pub struct SentenceBoundaryDetector {
    carry: String,
    pending: String,
}

impl SentenceBoundaryDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` and return the sentences it completes.
    ///
    /// The returned iterator is lazy: each `next()` performs one boundary search.
    /// Dropping it early is harmless, unconsumed text stays buffered for the next call.
    pub fn add_chunk(&mut self, fragment: &str) -> Sentences<'_> {
        self.pending.push_str(fragment);
        Sentences { detector: self }
    }

    /// Flush whatever is left as the final sentence and reset the detector.
    pub fn finish(&mut self) -> String {
        let mut combined = std::mem::take(&mut self.carry);
        combined.push_str(&self.pending);
        self.pending.clear();

        let combined = combined.trim();
        if combined.is_empty() {
            return String::new();
        }
        remove_markup(combined).trim().to_string()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.carry.is_empty() && self.pending.is_empty()
    }

    fn next_sentence(&mut self) -> Option<String> {
        loop {
            let end = SENTENCE_BOUNDARY.captures(&self.pending)?.get(1)?.end();
            self.carry.push_str(&self.pending[..end]);

            if ABBREVIATION.is_match(tail_chars(&self.carry, ABBREVIATION_WINDOW)) {
                trace!(candidate = %self.carry, "boundary looks like an abbreviation");
                // Keep the separating whitespace so the abbreviation joins the next words.
                self.pending.drain(..end);
                continue;
            }

            let rest = self.pending[end..].trim_start().len();
            let consumed = self.pending.len() - rest;
            self.pending.drain(..consumed);

            let candidate = std::mem::take(&mut self.carry);
            return Some(remove_markup(candidate.trim()).trim().to_string());
        }
    }
}

/// Lazy sequence of completed sentences produced by [`SentenceBoundaryDetector::add_chunk`].
pub struct Sentences<'a> {
    detector: &'a mut SentenceBoundaryDetector,
}

impl Iterator for Sentences<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.detector.next_sentence()
    }
}

fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

/// Remove `*emphasis*` markers around spans and list bullets at line starts.
pub fn remove_markup(text: &str) -> String {
    let text = WORD_MARKERS.replace_all(text, "$1");
    LINE_MARKERS.replace_all(&text, "").into_owned()
}

/// Split a complete text into sentences. Used for one-shot requests where the whole
/// text is already available.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut detector = SentenceBoundaryDetector::new();
    let mut sentences: Vec<String> = detector.add_chunk(text).collect();
    let rest = detector.finish();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Prepare one-shot text: strip markup, fold lines into one, and append the first
/// terminator from `auto_punctuation` when the text does not already end with one.
pub fn prepare_text(raw: &str, auto_punctuation: &str) -> String {
    let stripped = remove_markup(raw);
    let mut text = stripped
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(first) = auto_punctuation.chars().next() {
        if !text.is_empty() && !text.ends_with(|c: char| auto_punctuation.contains(c)) {
            text.push(first);
        }
    }
    text
}
