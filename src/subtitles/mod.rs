//! Subtitle parsing, sentence extraction and highlight reconstruction

pub mod detector;
pub mod highlight;
pub mod range_map;
pub mod sentences;
pub mod srt;

pub use detector::{RegexSentenceDetector, SentenceDetector};
pub use highlight::{highlight, split_highlight};
pub use range_map::RangeMap;
pub use sentences::SentenceExtractor;
pub use srt::{format_timestamp, parse_srt, parse_timestamp, to_srt, SubtitleFormatter};
