//! Text segmentation for the indexing and speech stages.
//!
//! Two independent, pure policies operate on the same extracted text:
//!
//! - [`chunk_for_index`] produces **overlapping** windows that feed the
//!   embedding indexer. Windows are snapped back to the right-most sentence
//!   end found in their last [`SNAP_LOOKBACK`] characters.
//! - [`chunk_for_speech`] produces a **gapless, overlap-free** partition of
//!   the text built from whole sentences, so synthesized audio never repeats.
//!
//! All offsets are character (Unicode scalar) offsets, not byte offsets.
//!
//! # Example
//!
//! ```rust
//! use lectern_core::chunk::{chunk_for_speech, SpeechChunkParams};
//!
//! let segments = chunk_for_speech("First sentence. Second one.", SpeechChunkParams::default());
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].start_offset, 0);
//! ```

use sha2::{Digest, Sha256};

/// How far back from a window's raw end to look for a sentence boundary.
pub const SNAP_LOOKBACK: usize = 100;

/// Parameters for the overlapping indexing chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexChunkParams {
    /// Target window size in characters.
    pub size: usize,
    /// Characters shared between consecutive windows.
    pub overlap: usize,
}

impl Default for IndexChunkParams {
    fn default() -> Self {
        Self {
            size: 1000,
            overlap: 200,
        }
    }
}

/// Parameters for the sentence-accumulating speech chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechChunkParams {
    /// Flush as soon as the running chunk reaches this many characters.
    pub target: usize,
    /// Never flush early (for `max`) below this many characters.
    pub min: usize,
    /// Flush before appending a sentence that would exceed this.
    pub max: usize,
}

impl Default for SpeechChunkParams {
    fn default() -> Self {
        Self {
            target: 400,
            min: 200,
            max: 600,
        }
    }
}

/// A window of text destined for the embedding indexer.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexChunk {
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// SHA-256 of `text`, used to skip re-embedding unchanged chunks.
    pub hash: String,
}

/// A contiguous span of text destined for speech synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    pub index: usize,
    /// Trimmed text to synthesize.
    pub text: String,
    /// Start of the span, inclusive. Equal to the previous segment's end.
    pub start_offset: usize,
    /// End of the span, exclusive. Includes trailing whitespace.
    pub end_offset: usize,
}

impl SpeechSegment {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split text into overlapping windows of roughly `params.size` characters.
///
/// Returns an empty vector only for empty or whitespace-only input.
pub fn chunk_for_index(text: &str, params: IndexChunkParams) -> Vec<IndexChunk> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let size = params.size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + size).min(len);
        if end < len {
            if let Some(cut) = sentence_cut(&chars, start, end) {
                end = cut;
            }
        }

        if let Some((s, e)) = trim_span(&chars, start, end) {
            let text: String = chars[s..e].iter().collect();
            chunks.push(IndexChunk {
                index: chunks.len(),
                hash: hash_text(&text),
                text,
                start_offset: s,
                end_offset: e,
            });
        }

        if end >= len {
            break;
        }

        // Step back by the overlap, but never backwards or in place.
        let next = end.saturating_sub(params.overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Right-most sentence end (`. `, `! `, `? ` or newline variants) inside the
/// last [`SNAP_LOOKBACK`] characters of `[start, end)`. Returns the offset just
/// past the punctuation mark.
fn sentence_cut(chars: &[char], start: usize, end: usize) -> Option<usize> {
    let floor = end.saturating_sub(SNAP_LOOKBACK).max(start);
    (floor..end.saturating_sub(1))
        .rev()
        .find(|&i| is_terminator(chars[i]) && matches!(chars[i + 1], ' ' | '\n'))
        .map(|i| i + 1)
}

fn trim_span(chars: &[char], mut start: usize, mut end: usize) -> Option<(usize, usize)> {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start < end).then_some((start, end))
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A sentence span. `[start, end)` covers trailing whitespace;
/// `[text_start, text_end)` is the trimmed content.
#[derive(Debug, Clone, Copy)]
struct Sentence {
    start: usize,
    end: usize,
    text_start: usize,
    text_end: usize,
}

impl Sentence {
    fn is_blank(&self) -> bool {
        self.text_start >= self.text_end
    }

    fn text_len(&self) -> usize {
        self.text_end - self.text_start
    }
}

/// A sentence is a maximal run of non-terminators, one or more of `.!?`, and
/// any trailing whitespace. The final run needs no terminator. Every
/// character of the input belongs to exactly one sentence.
fn split_sentences(chars: &[char]) -> Vec<Sentence> {
    let len = chars.len();
    let mut sentences = Vec::new();
    let mut i = 0;

    while i < len {
        let start = i;
        while i < len && !is_terminator(chars[i]) {
            i += 1;
        }
        while i < len && is_terminator(chars[i]) {
            i += 1;
        }
        while i < len && chars[i].is_whitespace() {
            i += 1;
        }
        let (text_start, text_end) = trim_span(chars, start, i).unwrap_or((i, i));
        sentences.push(Sentence {
            start,
            end: i,
            text_start,
            text_end,
        });
    }

    sentences
}

struct OpenSegment {
    start: usize,
    end: usize,
    text_start: usize,
    text_end: usize,
}

impl OpenSegment {
    fn from_sentence(s: &Sentence) -> Self {
        Self {
            start: s.start,
            end: s.end,
            text_start: s.text_start,
            text_end: s.text_end,
        }
    }

    fn text_len(&self) -> usize {
        self.text_end - self.text_start
    }
}

/// Partition text into speech segments of whole sentences.
///
/// Sentences are accumulated greedily. Before appending, the running segment
/// is flushed if the result would exceed `max` and the segment already holds
/// at least `min` characters. A lone sentence longer than `max` becomes its
/// own segment. After appending, the segment is flushed once it reaches
/// `target`.
///
/// Segments are ordered, non-overlapping and gapless: the first starts at 0,
/// each starts where the previous ended, and the last ends at the input's
/// character length. Returns an empty vector only for empty or
/// whitespace-only input.
pub fn chunk_for_speech(text: &str, params: SpeechChunkParams) -> Vec<SpeechSegment> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments: Vec<SpeechSegment> = Vec::new();
    let mut current: Option<OpenSegment> = None;

    for sentence in split_sentences(&chars) {
        if sentence.is_blank() {
            if let Some(open) = current.as_mut() {
                open.end = sentence.end;
            } else if let Some(last) = segments.last_mut() {
                last.end_offset = sentence.end;
            }
            continue;
        }

        if let Some(open) = &current {
            let joined = sentence.text_end - open.text_start;
            if joined > params.max && open.text_len() >= params.min {
                if let Some(open) = current.take() {
                    push_segment(&mut segments, &chars, open);
                }
            }
        }

        if current.is_none() && sentence.text_len() > params.max {
            push_segment(&mut segments, &chars, OpenSegment::from_sentence(&sentence));
            continue;
        }

        match current.as_mut() {
            Some(open) => {
                open.text_end = sentence.text_end;
                open.end = sentence.end;
            }
            None => current = Some(OpenSegment::from_sentence(&sentence)),
        }

        let reached_target = current
            .as_ref()
            .is_some_and(|open| open.text_len() >= params.target);
        if reached_target {
            if let Some(open) = current.take() {
                push_segment(&mut segments, &chars, open);
            }
        }
    }

    if let Some(open) = current.take() {
        push_segment(&mut segments, &chars, open);
    }

    segments
}

fn push_segment(segments: &mut Vec<SpeechSegment>, chars: &[char], open: OpenSegment) {
    segments.push(SpeechSegment {
        index: segments.len(),
        text: chars[open.text_start..open.text_end].iter().collect(),
        start_offset: open.start,
        end_offset: open.end,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(len: usize, fill: char) -> String {
        // `len` characters including the closing period.
        let mut s: String = std::iter::repeat(fill).take(len - 1).collect();
        s.push('.');
        s
    }

    fn assert_partition(text: &str, segments: &[SpeechSegment]) {
        let total = text.chars().count();
        assert_eq!(segments.first().map(|s| s.start_offset), Some(0));
        assert_eq!(segments.last().map(|s| s.end_offset), Some(total));
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        for (i, seg) in segments.iter().enumerate() {
            assert_eq!(seg.index, i);
            assert!(seg.start_offset < seg.end_offset);
            assert!(!seg.text.is_empty());
        }
    }

    #[test]
    fn test_index_empty_and_whitespace() {
        assert!(chunk_for_index("", IndexChunkParams::default()).is_empty());
        assert!(chunk_for_index("  \n\t ", IndexChunkParams::default()).is_empty());
    }

    #[test]
    fn test_index_short_text_single_chunk() {
        let chunks = chunk_for_index("  Hello, world!  ", IndexChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_offset, 2);
        assert_eq!(chunks[0].end_offset, 15);
    }

    #[test]
    fn test_index_windows_without_sentence_ends() {
        // Comma every 80 characters, no sentence terminators: no snapping.
        let mut text = format!("{},", "a".repeat(79)).repeat(31);
        text.push_str(&"a".repeat(20));
        assert_eq!(text.chars().count(), 2500);

        let chunks = chunk_for_index(&text, IndexChunkParams::default());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[1].start_offset, chunks[0].end_offset - 200);
        assert_eq!(chunks[2].start_offset, chunks[1].end_offset - 200);
        assert_eq!(chunks[2].end_offset, 2500);
    }

    #[test]
    fn test_index_windows_snap_to_periods() {
        // Same layout as above with a period every 80 characters.
        let mut text = format!("{}. ", "a".repeat(78)).repeat(31);
        text.push_str(&"a".repeat(20));
        assert_eq!(text.chars().count(), 2500);
        let chars: Vec<char> = text.chars().collect();

        let params = IndexChunkParams::default();
        let chunks = chunk_for_index(&text, params);
        let ends: Vec<usize> = chunks.iter().map(|c| c.end_offset).collect();
        assert_eq!(ends, vec![959, 1679, 2399, 2500]);

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(prev.text.ends_with('.'));
            assert_eq!(chars[prev.end_offset - 1], '.');
            assert_eq!(chars[prev.end_offset], ' ');
            assert!(prev.end_offset > prev.start_offset + params.size - SNAP_LOOKBACK);
            let shared = prev.end_offset - next.start_offset;
            assert!(shared > 0 && shared <= params.overlap);
        }
    }

    #[test]
    fn test_index_snaps_to_sentence_end() {
        let text = format!("{} {}", sentence(950, 'a'), "b".repeat(300));
        let chunks = chunk_for_index(&text, IndexChunkParams::default());
        assert_eq!(chunks[0].end_offset, 950);
        assert!(chunks[0].text.ends_with('.'));
        assert_eq!(chunks[1].start_offset, 750);
    }

    #[test]
    fn test_index_snap_only_within_lookback() {
        // The only sentence end is 500 characters before the window end.
        let text = format!("{} {}", sentence(500, 'a'), "b".repeat(900));
        let chunks = chunk_for_index(&text, IndexChunkParams::default());
        assert_eq!(chunks[0].end_offset, 1000);
    }

    #[test]
    fn test_index_overlap_not_larger_than_size() {
        let text = "x".repeat(50);
        let params = IndexChunkParams {
            size: 10,
            overlap: 10,
        };
        let chunks = chunk_for_index(&text, params);
        assert_eq!(chunks.len(), 5);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
    }

    #[test]
    fn test_index_chunk_properties() {
        let text = (0..200)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ");
        let params = IndexChunkParams::default();
        let chunks = chunk_for_index(&text, params);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.text.chars().count() <= params.size);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
            let overlap = pair[0].end_offset.saturating_sub(pair[1].start_offset);
            assert!(overlap <= params.overlap);
        }
    }

    #[test]
    fn test_index_multibyte_offsets_are_chars() {
        let text = "ñandú ".repeat(400);
        let chunks = chunk_for_index(&text, IndexChunkParams::default());
        let all: Vec<char> = text.chars().collect();
        for c in &chunks {
            let slice: String = all[c.start_offset..c.end_offset].iter().collect();
            assert_eq!(slice, c.text);
        }
    }

    #[test]
    fn test_index_deterministic() {
        let text = "Alpha beta. Gamma delta! Epsilon? ".repeat(100);
        let a = chunk_for_index(&text, IndexChunkParams::default());
        let b = chunk_for_index(&text, IndexChunkParams::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_speech_empty_and_whitespace() {
        assert!(chunk_for_speech("", SpeechChunkParams::default()).is_empty());
        assert!(chunk_for_speech(" \n  ", SpeechChunkParams::default()).is_empty());
    }

    #[test]
    fn test_speech_two_short_sentences_single_chunk() {
        let text = format!("{} {}", sentence(70, 'a'), sentence(79, 'b'));
        assert_eq!(text.chars().count(), 150);
        let segments = chunk_for_speech(&text, SpeechChunkParams::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_offset, 0);
        assert_eq!(segments[0].end_offset, 150);
        assert_eq!(segments[0].text, text);
    }

    #[test]
    fn test_speech_flushes_at_target() {
        // Five 100-char sentences: the chunk reaches 400 after four.
        let text = (0..5)
            .map(|_| sentence(100, 'x'))
            .collect::<Vec<_>>()
            .join(" ");
        let segments = chunk_for_speech(&text, SpeechChunkParams::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].char_len(), 403);
        assert_eq!(segments[1].char_len(), 100);
        assert_partition(&text, &segments);
    }

    #[test]
    fn test_speech_flushes_before_exceeding_max() {
        // 250 + 1 + 390 = 641 > 600 and 250 >= min: flush first.
        let text = format!("{} {}", sentence(250, 'a'), sentence(390, 'b'));
        let segments = chunk_for_speech(&text, SpeechChunkParams::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].char_len(), 250);
        assert_eq!(segments[1].char_len(), 390);
        assert_partition(&text, &segments);
    }

    #[test]
    fn test_speech_keeps_appending_below_min() {
        // 150 < min: the oversized append is allowed.
        let text = format!("{} {}", sentence(150, 'a'), sentence(500, 'b'));
        let segments = chunk_for_speech(&text, SpeechChunkParams::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].char_len(), 651);
    }

    #[test]
    fn test_speech_oversized_sentence_emitted_alone() {
        let text = format!("{} {} {}", sentence(300, 'a'), sentence(900, 'b'), sentence(50, 'c'));
        let segments = chunk_for_speech(&text, SpeechChunkParams::default());
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].char_len(), 300);
        assert_eq!(segments[1].char_len(), 900);
        assert_eq!(segments[2].char_len(), 50);
        assert_partition(&text, &segments);
    }

    #[test]
    fn test_speech_text_without_terminator() {
        let segments = chunk_for_speech("no punctuation here", SpeechChunkParams::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "no punctuation here");
    }

    #[test]
    fn test_speech_leading_punctuation_is_not_dropped() {
        let text = "...Hello there. Bye!";
        let segments = chunk_for_speech(text, SpeechChunkParams::default());
        assert_partition(text, &segments);
        assert_eq!(segments[0].text, text);
    }

    #[test]
    fn test_speech_partition_property() {
        let params = SpeechChunkParams::default();
        let text = (0..300)
            .map(|i| {
                let words = (i * 7) % 15 + 1;
                let mut s = "word ".repeat(words).trim_end().to_string();
                s.push(if i % 3 == 0 { '?' } else { '.' });
                s
            })
            .collect::<Vec<_>>()
            .join("  ");
        let segments = chunk_for_speech(&text, params);
        assert!(segments.len() > 1);
        assert_partition(&text, &segments);
        // Sentences here are short, so every segment respects the bounds.
        for seg in &segments {
            assert!(seg.char_len() >= 1);
            assert!(seg.char_len() <= params.max);
        }
        for seg in &segments[..segments.len() - 1] {
            assert!(seg.char_len() >= params.target);
        }
    }
}
