use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// Splits running text into sentences.
///
/// Implementations return ordered, non-overlapping half-open spans measured in
/// chars (not bytes). A span must not start or end on whitespace.
pub trait SentenceDetector: Send + Sync {
    fn detect(&self, text: &str) -> Vec<Range<usize>>;
}

/// Punctuation-driven sentence detector.
///
/// A sentence ends at a run of `.`, `!`, `?` or `…`, optionally followed by
/// closing quotes or brackets, when whitespace or the end of the text comes
/// next. A run made only of periods does not end a sentence if the next word
/// starts in lowercase, which keeps trailing-off speech (`in 2010..." "...it
/// won't`) and abbreviations (`approx. five`) together.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexSentenceDetector;

const OPENERS: &[char] = &['"', '\'', '“', '‘', '(', '[', '«'];

fn boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?P<end>(?P<terminators>[.!?…]+)["'”’)\]»]*)(?:\s|$)"#)
            .expect("sentence boundary pattern is a valid regex")
    })
}

impl RegexSentenceDetector {
    pub fn new() -> Self {
        Self
    }

    fn continues_sentence(terminators: &str, rest: &str) -> bool {
        if terminators.contains(['!', '?']) {
            return false;
        }

        rest.trim_start()
            .chars()
            .find(|c| !OPENERS.contains(c) && *c != '.' && *c != '…')
            .is_some_and(char::is_lowercase)
    }
}

impl SentenceDetector for RegexSentenceDetector {
    fn detect(&self, text: &str) -> Vec<Range<usize>> {
        let mut cursor = CharCursor::new(text);
        let mut spans = Vec::new();
        let mut sentence_start = 0;

        for captures in boundary_pattern().captures_iter(text) {
            let (Some(end), Some(terminators)) = (captures.name("end"), captures.name("terminators"))
            else {
                continue;
            };

            if Self::continues_sentence(terminators.as_str(), &text[end.end()..]) {
                continue;
            }

            if let Some(span) = trimmed_span(text, sentence_start..end.end(), &mut cursor) {
                spans.push(span);
            }
            sentence_start = end.end();
        }

        if let Some(span) = trimmed_span(text, sentence_start..text.len(), &mut cursor) {
            spans.push(span);
        }

        spans
    }
}

/// Trim a byte range and convert it into a char span
fn trimmed_span(
    text: &str,
    bytes: Range<usize>,
    cursor: &mut CharCursor<'_>,
) -> Option<Range<usize>> {
    let slice = &text[bytes.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }

    let start = bytes.start + (slice.len() - slice.trim_start().len());
    let end = start + trimmed.len();
    Some(cursor.char_offset(start)..cursor.char_offset(end))
}

/// Converts increasing byte offsets into char offsets without rescanning
struct CharCursor<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> CharCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            byte: 0,
            chars: 0,
        }
    }

    fn char_offset(&mut self, byte: usize) -> usize {
        if byte < self.byte {
            return self.text[..byte].chars().count();
        }
        self.chars += self.text[self.byte..byte].chars().count();
        self.byte = byte;
        self.chars
    }
}
