//! Size-bounded chunking of cleaned markdown.
//!
//! Splits recursively along markdown structure (paragraph, line, sentence,
//! word) so each chunk stays within `max_size` characters, then threads an
//! `overlap`-sized tail of each chunk into its successor for retrieval
//! continuity.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;
use unicode_segmentation::UnicodeSegmentation;

/// Chunking knobs. Sizes are in bytes of UTF-8 text; small overruns are
/// preferred over breaking inside a word.
#[derive(Clone, Copy, Debug)]
pub struct ChunkOptions {
    pub max_size: usize,
    pub overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_size: 512,
            overlap: 50,
        }
    }
}

/// Boundary preference order: paragraph, line, sentence, word.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", ". "];

static BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| tiktoken_rs::cl100k_base().ok());

/// Token count for a chunk, used for stored chunk statistics.
///
/// Falls back to a bytes/4 estimate if the tokenizer data is unavailable.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len().div_ceil(4),
    }
}

/// Splits `content` into trimmed, non-empty chunks of at most
/// `options.max_size` characters with `options.overlap` trailing characters
/// of carryover between successive chunks.
pub fn chunk(content: &str, options: &ChunkOptions) -> Vec<String> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let max_size = options.max_size.max(1);

    let mut pieces = Vec::new();
    split_recursive(content, &SEPARATORS, max_size, &mut pieces);

    let merged = merge_pieces(pieces, max_size);

    let mut chunks: Vec<String> = Vec::with_capacity(merged.len());
    for (index, piece) in merged.iter().enumerate() {
        let body = piece.trim();
        if body.is_empty() {
            continue;
        }
        if index == 0 || options.overlap == 0 {
            chunks.push(body.to_string());
        } else {
            let carry = tail(merged[index - 1].trim(), options.overlap);
            if carry.is_empty() {
                chunks.push(body.to_string());
            } else {
                chunks.push(format!("{carry} {body}"));
            }
        }
    }
    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

/// Recursively splits oversized text along progressively finer separators.
/// Text that still exceeds `max_size` at the word level is kept whole.
fn split_recursive<'a>(text: &'a str, separators: &[&str], max_size: usize, out: &mut Vec<&'a str>) {
    if text.len() <= max_size {
        if !text.trim().is_empty() {
            out.push(text);
        }
        return;
    }

    let Some((separator, finer)) = separators.split_first() else {
        split_words(text, max_size, out);
        return;
    };

    for part in text.split_inclusive(separator) {
        if part.len() <= max_size {
            if !part.trim().is_empty() {
                out.push(part);
            }
        } else {
            // Recurse with finer separators only; re-splitting an oversized
            // segment on the same separator would yield it back unchanged.
            split_recursive(part, finer, max_size, out);
        }
    }
}

/// Word-level fallback: greedily packs words up to `max_size`, permitting a
/// single overlong word to stand alone rather than cutting it.
fn split_words<'a>(text: &'a str, max_size: usize, out: &mut Vec<&'a str>) {
    let mut start = 0;
    let mut current_len = 0;
    let mut last_end = 0;

    for (offset, word) in text.split_word_bound_indices() {
        let end = offset + word.len();
        if current_len > 0 && end - start > max_size {
            out.push(&text[start..last_end]);
            start = last_end;
        }
        current_len = end - start;
        last_end = end;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
}

/// Greedily merges adjacent pieces so chunks approach `max_size` without
/// exceeding it.
fn merge_pieces(pieces: Vec<&str>, max_size: usize) -> Vec<String> {
    let mut merged = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if !current.is_empty() && current.len() + piece.len() > max_size {
            merged.push(std::mem::take(&mut current));
        }
        current.push_str(piece);
    }
    if !current.trim().is_empty() {
        merged.push(current);
    }
    merged
}

/// Last `overlap` characters of `text`, snapped outward to a char boundary.
fn tail(text: &str, overlap: usize) -> &str {
    if text.len() <= overlap {
        return text;
    }
    let mut start = text.len() - overlap;
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(max_size: usize, overlap: usize) -> ChunkOptions {
        ChunkOptions { max_size, overlap }
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        assert!(chunk("", &ChunkOptions::default()).is_empty());
        assert!(chunk("   \n\n  ", &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn short_content_is_a_single_chunk() {
        let chunks = chunk("just one paragraph", &ChunkOptions::default());
        assert_eq!(chunks, vec!["just one paragraph".to_string()]);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let first = "alpha ".repeat(20);
        let second = "beta ".repeat(20);
        let content = format!("{}\n\n{}", first.trim(), second.trim());
        let chunks = chunk(&content, &options(140, 0));
        assert!(chunks.len() >= 2);
        assert!(chunks[0].contains("alpha"));
        assert!(!chunks[0].contains("beta"));
    }

    #[test]
    fn chunks_respect_max_size_with_word_splitting() {
        let content = "word ".repeat(400);
        let opts = options(100, 0);
        let chunks = chunk(&content, &opts);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= opts.max_size, "chunk too large: {}", chunk.len());
        }
    }

    #[test]
    fn overlong_word_is_kept_whole() {
        let long_word = "x".repeat(150);
        let content = format!("intro {long_word} outro");
        let chunks = chunk(&content, &options(100, 0));
        assert!(chunks.iter().any(|c| c.contains(&long_word)));
    }

    #[test]
    fn successive_chunks_share_overlap() {
        let content = "sentence one here. ".repeat(40);
        let opts = options(120, 30);
        let chunks = chunk(&content, &opts);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let carry = tail(&pair[0], 30);
            // The second chunk starts with (a trimmed form of) the carry.
            assert!(
                pair[1].starts_with(carry.trim_start())
                    || pair[1].contains(carry.trim()),
                "missing overlap between chunks"
            );
        }
    }

    #[test]
    fn output_is_trimmed() {
        let chunks = chunk("  padded  \n\n  text  ", &ChunkOptions::default());
        for chunk in chunks {
            assert_eq!(chunk, chunk.trim());
        }
    }

    #[test]
    fn token_count_is_positive_for_text() {
        assert!(count_tokens("hello world") > 0);
        assert_eq!(count_tokens(""), 0);
    }
}
