use std::sync::Arc;
use tracing::debug;

use super::detector::{RegexSentenceDetector, SentenceDetector};
use super::range_map::RangeMap;
use super::srt::parse_srt;
use crate::models::{SubtitleEntry, SubtitleSentence};
use crate::Result;

/// Turns subtitle entries into sentences that remember their source entries
#[derive(Clone)]
pub struct SentenceExtractor {
    detector: Arc<dyn SentenceDetector>,
}

impl Default for SentenceExtractor {
    fn default() -> Self {
        Self::new(Arc::new(RegexSentenceDetector::new()))
    }
}

/// All entries joined into one running string
struct Transcript {
    text: String,
    /// char offset -> entry index; the joining space belongs to the entry after it
    entry_ranges: RangeMap<usize>,
    /// char offset where each non-blank entry's own text begins
    text_starts: Vec<Option<usize>>,
}

impl Transcript {
    fn join(entries: &[SubtitleEntry]) -> Self {
        let mut text = String::new();
        let mut length = 0;
        let mut entry_ranges = RangeMap::new();
        let mut text_starts = vec![None; entries.len()];

        for (index, entry) in entries.iter().enumerate() {
            // blank cues add neither text nor a separator
            if entry.is_blank() {
                continue;
            }

            let range_start = length;
            if !text.is_empty() {
                text.push(' ');
                length += 1;
            }
            text_starts[index] = Some(length);

            let entry_text = entry.text();
            length += entry_text.chars().count();
            text.push_str(&entry_text);

            entry_ranges.insert(range_start..length, index);
        }

        Self {
            text,
            entry_ranges,
            text_starts,
        }
    }
}

impl SentenceExtractor {
    pub fn new(detector: Arc<dyn SentenceDetector>) -> Self {
        Self { detector }
    }

    /// Parse raw SRT text and extract its sentences
    pub fn extract_srt(&self, raw: &str) -> Result<Vec<SubtitleSentence>> {
        let entries = parse_srt(raw)?;
        Ok(self.extract(&entries))
    }

    pub fn extract(&self, entries: &[SubtitleEntry]) -> Vec<SubtitleSentence> {
        let transcript = Transcript::join(entries);

        let byte_offsets: Vec<usize> = transcript
            .text
            .char_indices()
            .map(|(byte, _)| byte)
            .chain(std::iter::once(transcript.text.len()))
            .collect();
        let length = byte_offsets.len() - 1;

        let sentences: Vec<SubtitleSentence> = self
            .detector
            .detect(&transcript.text)
            .into_iter()
            .filter(|span| span.start < span.end && span.end <= length)
            .map(|span| {
                let position = transcript
                    .entry_ranges
                    .get(span.start)
                    .and_then(|index| transcript.text_starts[*index])
                    .map(|text_start| span.start.saturating_sub(text_start))
                    .unwrap_or_default();

                SubtitleSentence {
                    text: transcript.text[byte_offsets[span.start]..byte_offsets[span.end]]
                        .to_string(),
                    entry_range_map: transcript.entry_ranges.sub_map(span),
                    position,
                }
            })
            .collect();

        debug!(
            "📝 Extracted {} sentences from {} subtitle entries",
            sentences.len(),
            entries.len()
        );

        sentences
    }
}
