//! Lyric cue index built from block-structured subtitle text.
//!
//! Subtitles arrive as numbered blocks separated by blank lines, each with a
//! `HH:MM:SS,mmm --> HH:MM:SS,mmm` timing line followed by the lyric text.
//! Parsing never fails: anything that does not look like a cue is skipped and
//! the remaining cues are returned sorted by start time.
//!
//! Lookup is driven by a caller-owned [`CueCursor`] that remembers the last
//! resolved index, so the common case of forward playback costs O(1) per
//! position update while a backwards seek only rescans the cues it skipped.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

/// A time-bounded span of lyric text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl Cue {
    pub fn contains(&self, pos_ms: u64) -> bool {
        self.start_ms <= pos_ms && pos_ms <= self.end_ms
    }
}

/// Last-resolved index into a cue sequence.
///
/// Reset whenever the cue sequence is replaced or a new session starts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CueCursor(usize);

impl CueCursor {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Read and parse a subtitle file.
pub fn load_srt(path: &Path) -> io::Result<Vec<Cue>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_srt(&text))
}

/// Parse subtitle text into cues sorted by `start_ms`.
///
/// A byte-order mark and carriage returns are stripped first. Blocks without a
/// timing line, with a malformed timing line, with fewer than two non-empty
/// lines, or whose end precedes their start are dropped. Ties keep their
/// original order.
pub fn parse_srt(text: &str) -> Vec<Cue> {
    let clean = text.strip_prefix('\u{FEFF}').unwrap_or(text).replace('\r', "");

    let mut cues = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in clean.lines().map(str::trim) {
        if line.is_empty() {
            if let Some(cue) = parse_block(&block) {
                cues.push(cue);
            }
            block.clear();
        } else {
            block.push(line);
        }
    }
    if let Some(cue) = parse_block(&block) {
        cues.push(cue);
    }

    cues.sort_by_key(|cue| cue.start_ms);
    cues
}

fn parse_block(lines: &[&str]) -> Option<Cue> {
    if lines.len() < 2 {
        return None;
    }

    let time_idx = lines.iter().position(|l| l.contains("-->"))?;
    let (start_ms, end_ms) = parse_timing_line(lines[time_idx])?;
    if end_ms < start_ms {
        log::debug!("Dropping cue with end before start: {}", lines[time_idx]);
        return None;
    }

    Some(Cue {
        start_ms,
        end_ms,
        text: lines[time_idx + 1..].join("\n"),
    })
}

/// Extract the two timestamps around the first `-->` on the line.
fn parse_timing_line(line: &str) -> Option<(u64, u64)> {
    let (left, right) = line.split_once("-->")?;
    let left = left.trim_end();
    let right = right.trim_start();

    let start = left.get(left.len().checked_sub(TIMESTAMP_LEN)?..)?;
    let end = right.get(..TIMESTAMP_LEN)?;

    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

const TIMESTAMP_LEN: usize = "00:00:00,000".len();

/// `HH:MM:SS,mmm` to milliseconds. Exactly two digits per field and three
/// for the milliseconds.
fn parse_timestamp(ts: &str) -> Option<u64> {
    let bytes = ts.as_bytes();
    if bytes.len() != TIMESTAMP_LEN
        || bytes[2] != b':'
        || bytes[5] != b':'
        || bytes[8] != b','
    {
        return None;
    }

    let field = |range: std::ops::Range<usize>| -> Option<u64> {
        let digits = &ts[range];
        if digits.bytes().all(|b| b.is_ascii_digit()) {
            digits.parse().ok()
        } else {
            None
        }
    };

    let hh = field(0..2)?;
    let mm = field(3..5)?;
    let ss = field(6..8)?;
    let ms = field(9..12)?;

    Some((hh * 3600 + mm * 60 + ss) * 1000 + ms)
}

/// Find the cue active at `pos_ms`, moving `cursor` to the cue it settled on.
///
/// The cursor walks forward past cues that already ended, then back over cues
/// that have not started yet, always staying inside `0..cues.len()`. An empty
/// sequence returns `None` and leaves the cursor untouched.
pub fn find_cue_at<'a>(cues: &'a [Cue], pos_ms: u64, cursor: &mut CueCursor) -> Option<&'a Cue> {
    if cues.is_empty() {
        return None;
    }

    let last = cues.len() - 1;
    let mut i = cursor.0.min(last);

    while i < last && pos_ms > cues[i].end_ms {
        i += 1;
    }
    while i > 0 && pos_ms < cues[i].start_ms {
        i -= 1;
    }

    cursor.0 = i;

    let cue = &cues[i];
    cue.contains(pos_ms).then_some(cue)
}
