//! Document chunking.
//!
//! Text is cut on structural boundaries first (markdown headers, numbered
//! steps). Oversized segments fall back to paragraph packing and, for a
//! single giant paragraph, to word-boundary splitting. Segments below the
//! minimum size are merged into a neighbour. Every chunk after the first is
//! prefixed with the last `overlap_tokens` tokens of the previous segment.
//!
//! Segments are byte ranges of the source, so stripping `overlap_len` bytes
//! from each chunk and concatenating reproduces the input exactly.
//!
//! Tokens are whitespace-separated words.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkingError {
    #[error("document has no content")]
    EmptyDocument,

    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Bound on a chunk's own content. The overlap prefix comes on top, so a
    /// chunk holds at most `max_tokens + overlap_tokens` tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

fn default_max_tokens() -> usize {
    800
}

fn default_min_tokens() -> usize {
    200
}

fn default_overlap_tokens() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            min_tokens: default_min_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_tokens: usize, min_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            min_tokens,
            overlap_tokens,
        }
    }

    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_tokens == 0 {
            return Err(ChunkingError::InvalidConfig("max_tokens must be > 0".into()));
        }
        if self.min_tokens > self.max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "min_tokens {} exceeds max_tokens {}",
                self.min_tokens, self.max_tokens
            )));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_tokens {} must be below max_tokens {}",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// A chunk before embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDraft {
    pub content: String,
    pub chunk_index: usize,
    pub section_title: Option<String>,
    /// Tokens in `content`, overlap included; at most
    /// `max_tokens + overlap_tokens`.
    pub token_count: usize,
    /// Leading bytes of `content` copied from the previous chunk.
    pub overlap_len: usize,
}

impl ChunkDraft {
    /// Content without the overlap prefix.
    pub fn own_content(&self) -> &str {
        &self.content[self.overlap_len..]
    }
}

/// Concatenates chunks with their overlaps removed.
pub fn reconstruct(chunks: &[ChunkDraft]) -> String {
    chunks.iter().map(ChunkDraft::own_content).collect()
}

pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn boundary_regex() -> &'static Regex {
    static INSTANCE: OnceLock<Regex> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        Regex::new(r"(?m)^(?:#{1,6}[ \t]+\S|[ \t]*(?:\d{1,3}[.)]|[Ss]tep[ \t]+\d{1,3}:?)[ \t]+\S)")
            .expect("boundary pattern is valid")
    })
}

fn header_regex() -> &'static Regex {
    static INSTANCE: OnceLock<Regex> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+)$").expect("header pattern is valid"))
}

fn paragraph_break_regex() -> &'static Regex {
    static INSTANCE: OnceLock<Regex> = OnceLock::new();
    INSTANCE.get_or_init(|| Regex::new(r"\n[ \t]*\r?\n\s*").expect("paragraph pattern is valid"))
}

fn token_regex() -> &'static Regex {
    static INSTANCE: OnceLock<Regex> = OnceLock::new();
    INSTANCE.get_or_init(|| Regex::new(r"\S+").expect("token pattern is valid"))
}

#[derive(Debug, Clone)]
struct Segment {
    range: Range<usize>,
    title: Option<String>,
    tokens: usize,
}

impl Segment {
    fn new(text: &str, range: Range<usize>, title: Option<String>) -> Self {
        let tokens = count_tokens(&text[range.clone()]);
        Self {
            range,
            title,
            tokens,
        }
    }

    fn absorb(&mut self, next: Segment) {
        self.range.end = next.range.end;
        self.tokens += next.tokens;
        if self.title.is_none() {
            self.title = next.title;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Splits `text` into ordered, overlapping chunks.
    pub fn chunk(&self, text: &str) -> Result<Vec<ChunkDraft>, ChunkingError> {
        if count_tokens(text) == 0 {
            return Err(ChunkingError::EmptyDocument);
        }

        let mut segments = Vec::new();
        for segment in structural_segments(text) {
            if segment.tokens > self.config.max_tokens {
                segments.extend(self.split_oversized(text, segment));
            } else {
                segments.push(segment);
            }
        }

        let segments = self.merge_small(segments);
        Ok(self.with_overlap(text, segments))
    }

    fn split_oversized(&self, text: &str, segment: Segment) -> Vec<Segment> {
        let max = self.config.max_tokens;
        let base = segment.range.start;
        let slice = &text[segment.range.clone()];

        let mut cuts: Vec<usize> = paragraph_break_regex()
            .find_iter(slice)
            .map(|m| base + m.end())
            .filter(|&pos| pos < segment.range.end)
            .collect();
        cuts.push(segment.range.end);

        let mut pieces = Vec::new();
        let mut current: Option<Segment> = None;
        let mut start = base;
        for end in cuts {
            let paragraph = Segment::new(text, start..end, segment.title.clone());
            start = end;

            if paragraph.tokens > max {
                pieces.extend(current.take());
                pieces.extend(hard_split(text, paragraph, max));
                continue;
            }

            match current.as_mut() {
                Some(cur) if cur.tokens + paragraph.tokens <= max => cur.absorb(paragraph),
                _ => {
                    pieces.extend(current.take());
                    current = Some(paragraph);
                }
            }
        }
        pieces.extend(current);
        pieces
    }

    fn merge_small(&self, segments: Vec<Segment>) -> Vec<Segment> {
        let (min, max) = (self.config.min_tokens, self.config.max_tokens);

        // forward: a small segment absorbs its successor while it fits
        let mut forward: Vec<Segment> = Vec::with_capacity(segments.len());
        for segment in segments {
            match forward.last_mut() {
                Some(last) if last.tokens < min && last.tokens + segment.tokens <= max => {
                    last.absorb(segment)
                }
                _ => forward.push(segment),
            }
        }

        // backward: whatever is still small joins its predecessor if it fits
        let mut merged: Vec<Segment> = Vec::with_capacity(forward.len());
        for segment in forward {
            match merged.last_mut() {
                Some(prev) if segment.tokens < min && prev.tokens + segment.tokens <= max => {
                    prev.absorb(segment)
                }
                _ => merged.push(segment),
            }
        }
        merged
    }

    fn with_overlap(&self, text: &str, segments: Vec<Segment>) -> Vec<ChunkDraft> {
        let mut chunks = Vec::with_capacity(segments.len());
        let mut previous: Option<Range<usize>> = None;

        for (index, segment) in segments.into_iter().enumerate() {
            let start = match &previous {
                Some(prev) if self.config.overlap_tokens > 0 => {
                    overlap_start(text, prev.clone(), self.config.overlap_tokens)
                }
                _ => segment.range.start,
            };
            let content = &text[start..segment.range.end];
            chunks.push(ChunkDraft {
                content: content.to_string(),
                chunk_index: index,
                section_title: segment.title,
                token_count: count_tokens(content),
                overlap_len: segment.range.start - start,
            });
            previous = Some(segment.range);
        }
        chunks
    }
}

/// Cuts the source at header and numbered-step line starts.
fn structural_segments(text: &str) -> Vec<Segment> {
    let headers: Vec<(usize, String)> = header_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let title = caps.get(1)?.as_str().trim().trim_end_matches('#').trim();
            Some((whole.start(), title.to_string()))
        })
        .filter(|(_, title)| !title.is_empty())
        .collect();

    let mut starts: Vec<usize> = boundary_regex().find_iter(text).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    starts.dedup();

    let title_at = |pos: usize| {
        headers
            .iter()
            .take_while(|(start, _)| *start <= pos)
            .last()
            .map(|(_, title)| title.clone())
    };

    let mut segments = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        if start < end {
            segments.push(Segment::new(text, start..end, title_at(start)));
        }
    }
    segments
}

/// Splits at token starts so that no piece exceeds `max` tokens.
fn hard_split(text: &str, segment: Segment, max: usize) -> Vec<Segment> {
    let base = segment.range.start;
    let slice = &text[segment.range.clone()];

    let cuts: Vec<usize> = token_regex()
        .find_iter(slice)
        .enumerate()
        .filter(|(i, _)| *i > 0 && i % max == 0)
        .map(|(_, m)| base + m.start())
        .collect();

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = base;
    for cut in cuts.into_iter().chain(std::iter::once(segment.range.end)) {
        pieces.push(Segment::new(text, start..cut, segment.title.clone()));
        start = cut;
    }
    pieces
}

/// Byte offset where the last `overlap` tokens of `range` begin.
fn overlap_start(text: &str, range: Range<usize>, overlap: usize) -> usize {
    let token_starts: Vec<usize> = token_regex()
        .find_iter(&text[range.clone()])
        .map(|m| range.start + m.start())
        .collect();
    if token_starts.len() <= overlap {
        return range.start;
    }
    token_starts[token_starts.len() - overlap]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{}{}", prefix, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn small_chunker() -> Chunker {
        Chunker::new(ChunkingConfig::new(50, 10, 5)).unwrap()
    }

    fn runbook() -> String {
        format!(
            "# Payment service runbook\n\nIntro {}\n\n## Connection pool exhausted\n\n{}\n\n1. Check pool metrics {}\n2. Scale pool {}\n\n## Disk pressure\n\n{}\n",
            words("a", 4),
            words("b", 30),
            words("c", 20),
            words("d", 20),
            words("e", 45)
        )
    }

    #[test]
    fn test_reconstructs_source_exactly() {
        let text = runbook();
        let chunks = small_chunker().chunk(&text).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_reconstructs_giant_paragraph() {
        let text = format!("# Title\n{}\n", words("w", 237));
        let chunks = small_chunker().chunk(&text).unwrap();
        assert_eq!(reconstruct(&chunks), text);
        for chunk in &chunks {
            assert!(count_tokens(chunk.own_content()) <= 50);
        }
    }

    #[test]
    fn test_oversized_segment_split_on_paragraphs() {
        let text = format!(
            "## Big\n{}\n\n{}\n\n{}\n",
            words("p", 20),
            words("q", 20),
            words("r", 20)
        );
        let chunks = small_chunker().chunk(&text).unwrap();
        assert_eq!(reconstruct(&chunks), text);
        assert!(chunks.len() >= 2);
        // the first paragraph cut lands on a blank line, not mid-paragraph
        assert!(chunks[0].own_content().ends_with("\n\n"));
        for chunk in &chunks {
            assert!(count_tokens(chunk.own_content()) <= 50);
            assert_eq!(chunk.section_title.as_deref(), Some("Big"));
        }
    }

    #[test]
    fn test_chunk_size_bounded_with_overlap() {
        let texts = [runbook(), format!("# Title\n{}\n", words("w", 237))];
        for text in &texts {
            let chunks = small_chunker().chunk(text).unwrap();
            assert!(chunks.iter().any(|c| c.overlap_len > 0));
            for chunk in &chunks {
                assert!(count_tokens(chunk.own_content()) <= 50);
                assert!(chunk.token_count <= 50 + 5, "chunk {} has {} tokens", chunk.chunk_index, chunk.token_count);
            }
        }
    }

    #[test]
    fn test_overlap_repeats_tail_of_previous_segment() {
        let text = runbook();
        let chunks = small_chunker().chunk(&text).unwrap();

        assert_eq!(chunks[0].overlap_len, 0);
        for pair in chunks.windows(2) {
            let overlap = &pair[1].content[..pair[1].overlap_len];
            assert!(pair[0].own_content().ends_with(overlap));
            assert_eq!(count_tokens(overlap), 5.min(count_tokens(pair[0].own_content())));
        }
    }

    #[test]
    fn test_small_segments_are_merged() {
        let text = "# A\nshort one\n# B\nshort two\n# C\nshort three\n";
        let chunks = small_chunker().chunk(text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_title.as_deref(), Some("A"));
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn test_section_titles_follow_headers() {
        let text = runbook();
        let chunks = small_chunker().chunk(&text).unwrap();
        let titles: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.section_title.as_deref())
            .collect();
        assert!(titles.contains(&"Connection pool exhausted"));
        assert!(titles.contains(&"Disk pressure"));
    }

    #[test]
    fn test_indexes_are_sequential() {
        let chunks = small_chunker().chunk(&runbook()).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.token_count, count_tokens(&chunk.content));
        }
    }

    #[test]
    fn test_empty_document_rejected() {
        assert_eq!(
            small_chunker().chunk("  \n\n \t"),
            Err(ChunkingError::EmptyDocument)
        );
    }

    #[test]
    fn test_default_config_single_chunk_for_short_doc() {
        let chunker = Chunker::new(ChunkingConfig::default()).unwrap();
        let text = "Restart the worker if the queue backs up.";
        let chunks = chunker.chunk(text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
        assert_eq!(chunks[0].section_title, None);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkingConfig::new(100, 200, 10).validate().is_err());
        assert!(ChunkingConfig::new(100, 10, 100).validate().is_err());
        assert!(ChunkingConfig::new(0, 0, 0).validate().is_err());
        assert!(ChunkingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_numbered_steps_are_boundaries() {
        let text = format!(
            "1. {}\n2. {}\n3. {}\n",
            words("x", 30),
            words("y", 30),
            words("z", 30)
        );
        let chunks = small_chunker().chunk(&text).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].own_content().starts_with("2. "));
        assert_eq!(reconstruct(&chunks), text);
    }
}
