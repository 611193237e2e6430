use crate::models::SubtitleEntry;
use crate::{ContextSearchError, Result};

const HIGHLIGHT_START: &str = "<em>";
const HIGHLIGHT_END: &str = "</em>";

/// Split a highlighted sentence into alternating plain/highlighted parts.
///
/// The first and last parts are always plain, possibly empty, so a sentence
/// ending in a highlight still closes it with an empty plain part.
pub fn split_highlight(highlighted: &str) -> Vec<String> {
    highlighted
        .split(HIGHLIGHT_START)
        .flat_map(|chunk| chunk.split(HIGHLIGHT_END))
        .map(str::to_string)
        .collect()
}

/// Re-split entry texts along highlight boundaries.
///
/// `parts` alternate plain and highlighted runs of one sentence, starting with
/// a plain run. `sentence_position` is the char offset where the sentence
/// starts inside the first non-blank entry. Every touched entry gets its lines
/// replaced by segments whose odd indices are highlighted. Blank entries and
/// entries outside the match come back unchanged.
pub fn highlight(
    parts: &[String],
    sentence_position: usize,
    entries: &[SubtitleEntry],
) -> Result<Vec<SubtitleEntry>> {
    let mut highlighted = entries.to_vec();
    if parts.len() < 2 {
        return Ok(highlighted);
    }

    let last_part = parts.len() - 1;
    let mut part_index = 0;
    let mut end = sentence_position + char_len(&parts[0]);

    for (entry_index, entry) in entries.iter().enumerate() {
        if entry.is_blank() {
            continue;
        }

        let text: Vec<char> = entry.text().chars().collect();

        // the match has not reached this entry yet
        if end >= text.len() {
            end = end.checked_sub(text.len() + 1).ok_or_else(|| {
                ContextSearchError::Highlighting(format!(
                    "highlight boundary falls on the space after entry {}",
                    entry.id
                ))
            })?;
            continue;
        }

        let mut segments = Vec::new();
        let mut start = 0;
        while part_index < last_part && end <= text.len() {
            segments.push(text[start..end].iter().collect::<String>());
            start = end;
            end += char_len(&parts[part_index + 1]);
            part_index += 1;
        }

        let tail: String = text[start..].iter().collect();
        if !tail.trim().is_empty() {
            segments.push(tail);
        }
        highlighted[entry_index].lines = segments;

        if part_index == last_part {
            return Ok(highlighted);
        }

        end = end.checked_sub(text.len() + 1).ok_or_else(|| {
            ContextSearchError::Highlighting(format!(
                "highlight cursor moved backwards inside entry {}",
                entry.id
            ))
        })?;
    }

    Err(ContextSearchError::Highlighting(format!(
        "highlighted text not found: {} of {} parts placed in {} entries",
        part_index,
        parts.len(),
        entries.len()
    )))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeFrame;

    fn entry(lines: &[&str]) -> SubtitleEntry {
        SubtitleEntry::new(
            1,
            TimeFrame::new(0.0, 0.0),
            lines.iter().map(|line| line.to_string()).collect(),
        )
    }

    fn parts(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn test_highlight_across_three_entries() {
        let parts = parts(&[
            "And ",
            "the",
            " left over radiation from ",
            "the",
            " Big Bang, ",
            "the",
            " Cosmic Microwave Background, has now blue shifted all ",
            "the",
            " way from ",
            "the",
            " microwave to visible red light.",
        ]);
        let entries = vec![
            entry(&["your Lorentz factor by now is 650. And the"]),
            entry(&["left over radiation from the Big Bang, the Cosmic Microwave Background, has now"]),
            entry(&["blue shifted all the way from the microwave to visible red light. Over the"]),
        ];

        let highlighted = highlight(&parts, 35, &entries).unwrap();

        assert_eq!(
            highlighted,
            vec![
                entry(&["your Lorentz factor by now is 650. And ", "the"]),
                entry(&[
                    "left over radiation from ",
                    "the",
                    " Big Bang, ",
                    "the",
                    " Cosmic Microwave Background, has now"
                ]),
                entry(&[
                    "blue shifted all ",
                    "the",
                    " way from ",
                    "the",
                    " microwave to visible red light. Over the"
                ]),
            ]
        );
    }

    #[test]
    fn test_blank_entry_is_skipped() {
        let parts = parts(&[
            "'I say chaps last one to arrive in Manchester has to telephone the Queen and a blow raspberry' But ",
            "little",
            " ",
            "did",
            " Claude Grahame White know that his expensive hobby things were soon to become a major military importance.",
        ]);
        let entries = vec![
            entry(&["'I say chaps last one to arrive in Manchester has to telephone the Queen and a blow raspberry'"]),
            entry(&[""]),
            entry(&["But little did Claude Grahame White know that his expensive hobby things"]),
            entry(&["were soon to become a major military importance."]),
        ];

        let highlighted = highlight(&parts, 0, &entries).unwrap();

        assert_eq!(
            highlighted,
            vec![
                entries[0].clone(),
                entry(&[""]),
                entry(&[
                    "But ",
                    "little",
                    " ",
                    "did",
                    " Claude Grahame White know that his expensive hobby things"
                ]),
                entries[3].clone(),
            ]
        );
    }

    #[test]
    fn test_multi_line_entry_is_joined() {
        let parts = parts(&["So the ", "Desert", " Desert."]);
        let entries = vec![entry(&["specifically for the Sahara Desert.", "So the Desert Desert."])];

        let highlighted = highlight(&parts, 36, &entries).unwrap();

        assert_eq!(
            highlighted[0].lines,
            vec![
                "specifically for the Sahara Desert. So the ",
                "Desert",
                " Desert."
            ]
        );
    }

    #[test]
    fn test_highlight_at_entry_start_and_sentence_end() {
        let parts = split_highlight("<em>Hello</em> there <em>friend</em>");
        let entries = vec![entry(&["Hello there friend. Bye now"])];

        let highlighted = highlight(&parts, 0, &entries).unwrap();

        assert_eq!(
            highlighted[0].lines,
            vec!["", "Hello", " there ", "friend", ". Bye now"]
        );
    }

    #[test]
    fn test_segments_rebuild_the_entry_text() {
        let parts = parts(&["Ça ", "va", " très bien, ", "merci", "."]);
        let entries = vec![entry(&["Oui. Ça va très"]), entry(&["bien, merci."])];

        let highlighted = highlight(&parts, 5, &entries).unwrap();

        for (before, after) in entries.iter().zip(&highlighted) {
            assert_eq!(after.lines.concat(), before.text());
        }
        assert_eq!(highlighted[0].lines, vec!["Oui. Ça ", "va", " très"]);
        assert_eq!(highlighted[1].lines, vec!["bien, ", "merci", "."]);
    }

    #[test]
    fn test_unreachable_match_fails() {
        let parts = parts(&["far away ", "word"]);
        let entries = vec![entry(&["short"])];

        assert!(matches!(
            highlight(&parts, 40, &entries),
            Err(ContextSearchError::Highlighting(_))
        ));
        assert!(matches!(
            highlight(&parts, 0, &[]),
            Err(ContextSearchError::Highlighting(_))
        ));
    }

    #[test]
    fn test_without_highlight_entries_are_unchanged() {
        let entries = vec![entry(&["nothing to see"])];
        assert_eq!(highlight(&parts(&["nothing to see"]), 0, &entries).unwrap(), entries);
        assert_eq!(highlight(&[], 0, &entries).unwrap(), entries);
    }

    #[test]
    fn test_split_highlight() {
        assert_eq!(
            split_highlight("And <em>the</em> left over <em>the</em> end"),
            vec!["And ", "the", " left over ", "the", " end"]
        );
        assert_eq!(
            split_highlight("<em>Hello</em> there <em>friend</em>"),
            vec!["", "Hello", " there ", "friend", ""]
        );
        assert_eq!(split_highlight("plain"), vec!["plain"]);
        assert_eq!(split_highlight(""), vec![""]);
    }
}
