//! Word-boundary text chunking.

use std::collections::HashSet;

use crate::models::{Chunk, Content, DocType, Document, IndexingConfig, SkipReason};

/// Splits documents into word-aligned chunks of bounded length.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Upper bound on chunk length, in characters.
    max_chars: usize,
    /// Characters of trailing context repeated at the start of the next chunk.
    overlap: usize,
    indexable: HashSet<DocType>,
}

/// A word located by character and byte offsets into the source text.
#[derive(Debug, Clone, Copy)]
struct Word {
    start_byte: usize,
    end_byte: usize,
    start_char: usize,
    end_char: usize,
}

impl TextChunker {
    pub fn new(config: &IndexingConfig) -> Self {
        Self {
            max_chars: config.max_chars.max(1),
            overlap: config.chunk_overlap.min(config.max_chars.saturating_sub(1)),
            indexable: config.indexable_types.iter().cloned().collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&IndexingConfig::default())
    }

    /// Why `document` yields no chunks, if it doesn't.
    pub fn classify(&self, document: &Document) -> Option<SkipReason> {
        if !self.indexable.contains(&document.doc_type) {
            return Some(SkipReason::NotIndexable);
        }
        match &document.content {
            Content::Binary(_) => Some(SkipReason::Binary),
            Content::Text(text) if text.trim().is_empty() => Some(SkipReason::Empty),
            Content::Text(_) => None,
        }
    }

    /// Chunk a document. Pure: the same document always yields the same chunks.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        if self.classify(document).is_some() {
            return Vec::new();
        }
        let Some(text) = document.content.as_text() else {
            return Vec::new();
        };

        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(idx, piece)| Chunk::from_document(document, piece.to_string(), idx as u32))
            .collect()
    }

    /// Greedy word packing. Each piece is a substring of `text` running from
    /// the start of its first word to the end of its last word.
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let words = locate_words(text);
        let mut pieces = Vec::new();
        let mut first = 0;

        while first < words.len() {
            let start = words[first];
            let mut last = first;
            while last + 1 < words.len()
                && words[last + 1].end_char - start.start_char <= self.max_chars
            {
                last += 1;
            }

            pieces.push(&text[start.start_byte..words[last].end_byte]);

            if last + 1 >= words.len() {
                break;
            }
            first = self.next_start(&words, first, last);
        }

        pieces
    }

    /// First word of the next chunk: the earliest word inside the overlap
    /// window, but always past the current chunk's first word.
    fn next_start(&self, words: &[Word], first: usize, last: usize) -> usize {
        if self.overlap == 0 {
            return last + 1;
        }
        let window_start = words[last].end_char.saturating_sub(self.overlap);
        (first + 1..=last)
            .find(|&i| words[i].start_char >= window_start)
            .unwrap_or(last + 1)
    }
}

fn locate_words(text: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut current: Option<Word> = None;

    for (char_idx, (byte_idx, c)) in text.char_indices().enumerate() {
        if c.is_whitespace() {
            if let Some(word) = current.take() {
                words.push(word);
            }
            continue;
        }
        let end_byte = byte_idx + c.len_utf8();
        match current.as_mut() {
            Some(word) => {
                word.end_byte = end_byte;
                word.end_char = char_idx + 1;
            }
            None => {
                current = Some(Word {
                    start_byte: byte_idx,
                    end_byte,
                    start_char: char_idx,
                    end_char: char_idx + 1,
                });
            }
        }
    }

    if let Some(word) = current {
        words.push(word);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_chars: usize, overlap: usize) -> TextChunker {
        TextChunker::new(&IndexingConfig {
            max_chars,
            chunk_overlap: overlap,
            ..Default::default()
        })
    }

    fn post(content: &str) -> Document {
        Document::new("doc-1", DocType::Post, content)
    }

    #[test]
    fn test_small_document_single_chunk() {
        let chunks = TextChunker::with_defaults().chunk(&post("Hello, world!"));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].chunk_id, Chunk::generate_id("doc-1", 0));
    }

    #[test]
    fn test_empty_and_whitespace_documents() {
        let chunker = TextChunker::with_defaults();
        assert!(chunker.chunk(&post("")).is_empty());
        assert!(chunker.chunk(&post("  \n\t  ")).is_empty());
        assert_eq!(chunker.classify(&post(" ")), Some(SkipReason::Empty));
    }

    #[test]
    fn test_non_indexable_and_binary_documents() {
        let chunker = TextChunker::with_defaults();

        let profile = Document::new("p", DocType::Profile, "some profile text");
        assert!(chunker.chunk(&profile).is_empty());
        assert_eq!(chunker.classify(&profile), Some(SkipReason::NotIndexable));

        let mut binary = post("");
        binary.content = Content::Binary(vec![0xff, 0xd8, 0xff]);
        assert!(chunker.chunk(&binary).is_empty());
        assert_eq!(chunker.classify(&binary), Some(SkipReason::Binary));
    }

    #[test]
    fn test_custom_types_match_regardless_of_case() {
        let chunker = TextChunker::new(&IndexingConfig {
            indexable_types: vec!["announcement".parse().unwrap()],
            ..Default::default()
        });
        let doc = Document::new("a1", "Announcement".parse().unwrap(), "doors open at nine");
        assert_eq!(chunker.classify(&doc), None);
        assert_eq!(chunker.chunk(&doc).len(), 1);
    }

    #[test]
    fn test_120_chars_into_three_chunks_of_50() {
        // 19 five-letter words and one six-letter word: 120 characters
        let mut words = vec!["alpha"; 19];
        words.push("omegas");
        let content = words.join(" ");
        assert_eq!(content.chars().count(), 120);

        let chunks = chunker(50, 0).chunk(&post(&content));
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 50);
            assert!(!chunk.text.starts_with(' ') && !chunk.text.ends_with(' '));
            assert!(chunk.text.split(' ').all(|w| w == "alpha" || w == "omegas"));
        }
    }

    #[test]
    fn test_never_splits_words() {
        let content = "the quick brown fox jumps over the lazy dog and keeps running far away";
        let chunks = chunker(12, 0).chunk(&post(content));

        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.text.split(' ')).collect();
        let original: Vec<&str> = content.split(' ').collect();
        assert_eq!(rejoined, original);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 12));
    }

    #[test]
    fn test_long_word_kept_whole() {
        let long = "x".repeat(30);
        let content = format!("short {long} tail");
        let chunks = chunker(10, 0).chunk(&post(&content));

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["short", long.as_str(), "tail"]);
    }

    #[test]
    fn test_chunks_are_substrings_of_content() {
        let content = "line one\n\nline   two\twith tabs\nand more words here";
        let chunks = chunker(15, 0).chunk(&post(content));
        for chunk in &chunks {
            assert!(content.contains(&chunk.text));
        }
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let content = "héllo wörld ñandú çava";
        let chunks = chunker(11, 0).chunk(&post(content));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["héllo wörld", "ñandú çava"]);
    }

    #[test]
    fn test_overlap_repeats_trailing_words() {
        let content = "aa bb cc dd ee ff gg";
        let chunks = chunker(8, 3).chunk(&post(content));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aa bb cc", "cc dd ee", "ee ff gg"]);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let content = "lorem ipsum dolor sit amet ".repeat(40);
        let chunker = chunker(64, 0);
        let first = chunker.chunk(&post(&content));
        let second = chunker.chunk(&post(&content));
        assert_eq!(first, second);
        for (i, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
            assert_eq!(chunk.metadata["chunk_index"], serde_json::json!(i));
        }
    }
}
