use super::types::Chunk;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkerError {
    #[error("chunk window must be greater than zero")]
    ZeroWindow,
    #[error("chunk overlap {overlap} must be smaller than window {window}")]
    InvalidOverlap { overlap: usize, window: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum chunk length in chars.
    pub chunk_size: usize,
    /// Maximum length in chars of the trailing words repeated at the start of the next chunk.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Word-boundary text splitter with overlapping windows.
#[derive(Debug, Clone, Copy)]
pub struct DocumentChunker {
    config: ChunkerConfig,
}

impl DocumentChunker {
    /// # Errors
    ///
    /// Returns [`ChunkerError`] if the window is zero or the overlap is not smaller than it.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        validate(config.chunk_size, config.chunk_overlap)?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        let tokens = Tokens::new(text);
        spans(&tokens, self.config.chunk_size, self.config.chunk_overlap)
            .into_iter()
            .map(|(start, end)| tokens.join(start, end))
            .collect()
    }

    #[must_use]
    pub fn split_chunks(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        let tokens = Tokens::new(text);
        spans(&tokens, self.config.chunk_size, self.config.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(ordinal, (start, end))| Chunk {
                source_id: source_id.to_owned(),
                ordinal,
                text: tokens.join(start, end),
                char_offset: tokens.offsets[start],
            })
            .collect()
    }
}

/// Split `text` into chunks of at most `window` chars (a single longer word is emitted alone).
///
/// # Errors
///
/// Returns [`ChunkerError`] if `window == 0` or `overlap >= window`.
pub fn split(text: &str, window: usize, overlap: usize) -> Result<Vec<String>, ChunkerError> {
    let chunker = DocumentChunker::new(ChunkerConfig {
        chunk_size: window,
        chunk_overlap: overlap,
    })?;
    Ok(chunker.split(text))
}

fn validate(window: usize, overlap: usize) -> Result<(), ChunkerError> {
    if window == 0 {
        return Err(ChunkerError::ZeroWindow);
    }
    if overlap >= window {
        return Err(ChunkerError::InvalidOverlap { overlap, window });
    }
    Ok(())
}

struct Tokens<'a> {
    words: Vec<&'a str>,
    lens: Vec<usize>,
    /// Char offset of each word in the single-space-joined text.
    offsets: Vec<usize>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        let words: Vec<&str> = text.split_whitespace().collect();
        let lens: Vec<usize> = words.iter().map(|w| w.chars().count()).collect();
        let mut offsets = Vec::with_capacity(words.len());
        let mut pos = 0;
        for len in &lens {
            offsets.push(pos);
            pos += len + 1;
        }
        Self {
            words,
            lens,
            offsets,
        }
    }

    fn join(&self, start: usize, end: usize) -> String {
        self.words[start..end].join(" ")
    }
}

/// Greedy accumulation into `[start, end)` word ranges.
fn spans(tokens: &Tokens<'_>, window: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut len = 0;

    for (i, &word_len) in tokens.lens.iter().enumerate() {
        if i == start {
            len = word_len;
            continue;
        }
        if len + 1 + word_len <= window {
            len += 1 + word_len;
            continue;
        }

        spans.push((start, i));

        // Carry trailing words of the emitted chunk that fit in `overlap`.
        let mut tail_start = i;
        let mut tail_len = 0;
        while tail_start > start {
            let candidate = tokens.lens[tail_start - 1];
            let grown = if tail_len == 0 {
                candidate
            } else {
                tail_len + 1 + candidate
            };
            if grown > overlap {
                break;
            }
            tail_len = grown;
            tail_start -= 1;
        }
        // Drop carried words until the incoming word fits.
        while tail_start < i && tail_len + 1 + word_len > window {
            let dropped = tokens.lens[tail_start];
            tail_len = tail_len.saturating_sub(dropped + 1);
            tail_start += 1;
        }

        start = tail_start;
        len = if tail_start == i {
            word_len
        } else {
            tail_len + 1 + word_len
        };
    }

    if start < tokens.words.len() {
        spans.push((start, tokens.words.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn chunker(window: usize, overlap: usize) -> DocumentChunker {
        DocumentChunker::new(ChunkerConfig {
            chunk_size: window,
            chunk_overlap: overlap,
        })
        .unwrap()
    }

    #[test]
    fn rejects_zero_window() {
        assert_eq!(split("a b", 0, 0), Err(ChunkerError::ZeroWindow));
    }

    #[test]
    fn rejects_overlap_not_below_window() {
        assert_eq!(
            split("a b", 10, 10),
            Err(ChunkerError::InvalidOverlap {
                overlap: 10,
                window: 10
            })
        );
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        assert!(split("", 10, 2).unwrap().is_empty());
        assert!(split(" \n\t  ", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn short_text_is_one_normalised_chunk() {
        let chunks = split("  reset   your\npassword  ", 100, 10).unwrap();
        assert_eq!(chunks, ["reset your password"]);
    }

    #[test]
    fn exact_fit_stays_in_one_chunk() {
        assert_eq!(split("aaaa bbbb", 9, 0).unwrap(), ["aaaa bbbb"]);
        assert_eq!(split("aaaa bbbb", 8, 0).unwrap(), ["aaaa", "bbbb"]);
    }

    #[test]
    fn overlap_carries_trailing_words() {
        let chunks = split("one two three four five six", 13, 8).unwrap();
        assert_eq!(chunks, ["one two three", "three four", "four five six"]);
    }

    #[test]
    fn short_tokens_carry_a_three_char_tail() {
        let chunks = split("aa bb cc dd ee ff gg", 10, 3).unwrap();
        assert_eq!(chunks, ["aa bb cc", "cc dd ee", "ee ff gg"]);
        for pair in chunks.windows(2) {
            let tail = pair[0].rsplit(' ').next().unwrap();
            assert!(pair[1].starts_with(tail));
        }
    }

    #[test]
    fn zero_overlap_partitions_words() {
        let chunks = split("a b c d e f", 3, 0).unwrap();
        assert_eq!(chunks, ["a b", "c d", "e f"]);
    }

    #[test]
    fn long_word_is_emitted_alone() {
        let chunks = split("hi supercalifragilistic yo", 5, 2).unwrap();
        assert_eq!(chunks, ["hi", "supercalifragilistic", "yo"]);
    }

    #[test]
    fn overlap_never_repeats_a_whole_chunk() {
        // "ab" fits entirely in the overlap, but the next word cannot join it.
        let chunks = split("ab cdefgh ij", 8, 4).unwrap();
        assert_eq!(chunks, ["ab", "cdefgh", "ij"]);
        for pair in chunks.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn multibyte_lengths_count_chars() {
        let chunks = split("ééé ààà", 7, 0).unwrap();
        assert_eq!(chunks, ["ééé ààà"]);
    }

    #[test]
    fn split_chunks_numbers_and_offsets() {
        let chunks = chunker(13, 8).split_chunks("doc-1", "one two  three four five six");
        let ordinals: Vec<_> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, [0, 1, 2]);
        let offsets: Vec<_> = chunks.iter().map(|c| c.char_offset).collect();
        assert_eq!(offsets, [0, 8, 14]);
        assert!(chunks.iter().all(|c| c.source_id == "doc-1"));
    }

    #[test]
    fn default_config_matches_service_defaults() {
        let config = ChunkerConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert!(DocumentChunker::new(config).is_ok());
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                "[a-z]{1,12}",
                "[a-zé]{1,4}",
                "[A-Z]{15,30}",
            ],
            0..120,
        )
        .prop_flat_map(|words| {
            let n = words.len();
            (
                Just(words),
                prop::collection::vec(prop_oneof![Just(" "), Just("  "), Just("\n"), Just("\t ")], n),
            )
        })
        .prop_map(|(words, seps)| {
            words
                .iter()
                .zip(seps)
                .map(|(w, s)| format!("{w}{s}"))
                .collect()
        })
    }

    fn params() -> impl Strategy<Value = (usize, usize)> {
        (1usize..80).prop_flat_map(|window| (Just(window), 0..window))
    }

    proptest! {
        #[test]
        fn deterministic(text in text_strategy(), (window, overlap) in params()) {
            prop_assert_eq!(split(&text, window, overlap), split(&text, window, overlap));
        }

        #[test]
        fn chunks_respect_window(text in text_strategy(), (window, overlap) in params()) {
            for chunk in split(&text, window, overlap).unwrap() {
                let len = chunk.chars().count();
                prop_assert!(len <= window || !chunk.contains(' '), "chunk {chunk:?} exceeds {window}");
            }
        }

        #[test]
        fn chunks_reconstruct_token_stream(text in text_strategy(), (window, overlap) in params()) {
            let normalised: Vec<char> = text.split_whitespace().collect::<Vec<_>>().join(" ").chars().collect();
            let chunks = chunker(window, overlap).split_chunks("s", &text);

            if normalised.is_empty() {
                prop_assert!(chunks.is_empty());
                return Ok(());
            }

            prop_assert_eq!(chunks[0].char_offset, 0);
            let mut prev_end = 0usize;
            let mut prev_offset = None;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.ordinal, i);
                let len = chunk.text.chars().count();
                let slice: String = normalised[chunk.char_offset..chunk.char_offset + len].iter().collect();
                prop_assert_eq!(&slice, &chunk.text);
                if let Some(p) = prev_offset {
                    prop_assert!(chunk.char_offset > p);
                    // no gap: starts within or right after the previous chunk
                    prop_assert!(chunk.char_offset <= prev_end + 1);
                    prop_assert!(chunk.char_offset + len > prev_end);
                }
                prev_offset = Some(chunk.char_offset);
                prev_end = chunk.char_offset + len;
            }
            prop_assert_eq!(prev_end, normalised.len());
        }

        #[test]
        fn single_chunk_when_text_fits(text in "[a-z]{1,5}( [a-z]{1,5}){0,5}") {
            let chunks = split(&text, 100, 10).unwrap();
            prop_assert_eq!(chunks.len(), 1);
            prop_assert_eq!(&chunks[0], &text);
        }
    }
}
