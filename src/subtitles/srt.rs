use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::models::{SubtitleEntry, TimeFrame};
use crate::{ContextSearchError, Result};

/// Parse raw SRT text into timed entries.
///
/// Blocks are separated by one or more blank lines. Each block is an id line,
/// a `start --> end` line, then any number of text lines. A block without text
/// becomes a blank entry so that entry positions stay aligned with the file.
pub fn parse_srt(raw: &str) -> Result<Vec<SubtitleEntry>> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut lines = raw.lines().enumerate().peekable();
    let mut entries = Vec::new();

    loop {
        while lines.next_if(|(_, line)| line.trim().is_empty()).is_some() {}

        let Some((index, id_line)) = lines.next() else {
            break;
        };
        let id: u32 = id_line.trim().parse().map_err(|_| {
            ContextSearchError::parse(
                index + 1,
                format!("expected a numeric entry id, found '{}'", id_line.trim()),
            )
        })?;

        let (index, time_line) = lines.next().ok_or_else(|| {
            ContextSearchError::parse(index + 2, format!("entry {} has no time frame", id))
        })?;
        let time_frame = parse_time_frame(time_line)
            .map_err(|message| ContextSearchError::parse(index + 1, message))?;

        let mut text = Vec::new();
        while let Some((_, line)) = lines.next_if(|(_, line)| !line.trim().is_empty()) {
            let cleaned = SubtitleFormatter::clean_line(line);
            if !cleaned.is_empty() {
                text.push(cleaned);
            }
        }

        entries.push(SubtitleEntry::new(id, time_frame, text));
    }

    Ok(entries)
}

/// Serialize entries back to SRT text
pub fn to_srt(entries: &[SubtitleEntry]) -> String {
    let mut srt_content = String::new();

    for entry in entries {
        srt_content.push_str(&entry.to_string());
        srt_content.push('\n');
    }

    srt_content
}

impl fmt::Display for SubtitleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.id)?;
        writeln!(
            f,
            "{} --> {}",
            format_timestamp(self.time_frame.start_time),
            format_timestamp(self.time_frame.end_time)
        )?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Subtitle text cleanup
pub struct SubtitleFormatter;

impl SubtitleFormatter {
    /// Drop non-speech annotations such as `[music]` or `(laughs)` and collapse
    /// every kind of unicode whitespace into single ASCII spaces
    pub fn clean_line(line: &str) -> String {
        annotation_pattern()
            .replace_all(line, "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn annotation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\s*(\[.*?\]|\(.*?\))").expect("annotation pattern is a valid regex")
    })
}

/// Parse a `start --> end` line
fn parse_time_frame(line: &str) -> std::result::Result<TimeFrame, String> {
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| format!("expected 'start --> end', found '{}'", line.trim()))?;

    // anything after the end timestamp (e.g. position hints) is ignored
    let end = end.split_whitespace().next().unwrap_or_default();

    let start_time = parse_timestamp(start.trim())?;
    let end_time = parse_timestamp(end)?;
    if start_time > end_time {
        return Err(format!("time frame ends before it starts: '{}'", line.trim()));
    }

    Ok(TimeFrame::new(start_time, end_time))
}

/// Parse a single timestamp (HH:MM:SS,mmm) into seconds
pub fn parse_timestamp(timestamp: &str) -> std::result::Result<f64, String> {
    let invalid = || format!("invalid timestamp '{}'", timestamp);

    let (hms, millis) = timestamp.rsplit_once([',', '.']).ok_or_else(invalid)?;
    let hms_parts: Vec<&str> = hms.split(':').collect();
    if hms_parts.len() != 3 {
        return Err(invalid());
    }

    let number = |part: &str| part.trim().parse::<u64>().map_err(|_| invalid());
    let hours = number(hms_parts[0])?;
    let minutes = number(hms_parts[1])?;
    let seconds = number(hms_parts[2])?;
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }

    if millis.is_empty() || millis.len() > 3 || !millis.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    // ",5" means half a second
    let milliseconds = number(millis)? * 10u64.pow(3 - millis.len() as u32);

    let total_millis = hours
        .checked_mul(3600)
        .and_then(|total| total.checked_add(minutes * 60 + seconds))
        .and_then(|total| total.checked_mul(1000))
        .and_then(|total| total.checked_add(milliseconds))
        .ok_or_else(invalid)?;
    Ok(total_millis as f64 / 1000.0)
}

/// Format seconds as an SRT timestamp (HH:MM:SS,mmm)
pub fn format_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let total_seconds = total_millis / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let milliseconds = total_millis % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, milliseconds)
}
