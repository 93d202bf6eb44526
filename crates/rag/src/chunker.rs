//! Section-aware chunking
//!
//! Splits wiki markdown into retrieval units along heading boundaries,
//! packing paragraphs up to a token target. Deterministic: the same
//! document always yields byte-identical chunks.

use wiki_agent_core::text::estimate_tokens;
use wiki_agent_core::{chunk_point_id, Chunk, Document};

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in (estimated) tokens
    pub target_tokens: usize,
    /// Hard ceiling before a paragraph is split mid-stream
    pub max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 256,
            max_tokens: 512,
        }
    }
}

/// Heading-aware document chunker
pub struct SectionChunker {
    config: ChunkerConfig,
}

impl SectionChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Cut a document into ordered chunks with stable ids
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut section_path: Vec<String> = Vec::new();
        let mut buffer: Vec<String> = Vec::new();
        let mut buffer_tokens = 0usize;
        let mut ordinal = 0u32;

        let mut flush =
            |buffer: &mut Vec<String>, buffer_tokens: &mut usize, section_path: &[String], ordinal: &mut u32, chunks: &mut Vec<Chunk>| {
                if buffer.is_empty() {
                    return;
                }
                let text = buffer.join("\n\n");
                chunks.push(Chunk {
                    id: chunk_point_id(&document.id, *ordinal),
                    document_id: document.id.clone(),
                    ordinal: *ordinal,
                    token_count: estimate_tokens(&text) as u32,
                    text,
                    section_path: section_path.to_vec(),
                    semantic_tags: Vec::new(),
                });
                *ordinal += 1;
                buffer.clear();
                *buffer_tokens = 0;
            };

        for block in document.text.split("\n\n") {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }

            if let Some((level, heading)) = parse_heading(block) {
                // Heading starts a new section: flush and adjust the path
                flush(&mut buffer, &mut buffer_tokens, &section_path, &mut ordinal, &mut chunks);
                section_path.truncate(level.saturating_sub(1));
                section_path.push(heading.to_string());
                continue;
            }

            let block_tokens = estimate_tokens(block);

            if block_tokens > self.config.max_tokens {
                // Oversized paragraph: flush what we have, then split it
                flush(&mut buffer, &mut buffer_tokens, &section_path, &mut ordinal, &mut chunks);
                for piece in split_long_block(block, self.config.max_tokens) {
                    buffer.push(piece);
                    flush(&mut buffer, &mut buffer_tokens, &section_path, &mut ordinal, &mut chunks);
                }
                continue;
            }

            if buffer_tokens + block_tokens > self.config.target_tokens && !buffer.is_empty() {
                flush(&mut buffer, &mut buffer_tokens, &section_path, &mut ordinal, &mut chunks);
            }
            buffer_tokens += block_tokens;
            buffer.push(block.to_string());
        }
        flush(&mut buffer, &mut buffer_tokens, &section_path, &mut ordinal, &mut chunks);

        chunks
    }
}

impl Default for SectionChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// Parse a markdown heading, returning `(level, text)`
fn parse_heading(block: &str) -> Option<(usize, &str)> {
    let first_line = block.lines().next()?;
    let hashes = first_line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = first_line[hashes..].trim();
    if rest.is_empty() {
        return None;
    }
    // Only treat single-line blocks as headings
    if block.lines().count() > 1 {
        return None;
    }
    Some((hashes, rest))
}

/// Split an oversized block on sentence boundaries
fn split_long_block(block: &str, max_tokens: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for sentence in block.split_inclusive(['.', '!', '?']) {
        if estimate_tokens(&current) + estimate_tokens(sentence) > max_tokens && !current.is_empty()
        {
            pieces.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(sentence);
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiki_agent_core::SourceKind;

    fn document(text: &str) -> Document {
        Document {
            id: "d1".to_string(),
            source_url: "https://wiki.example.com/d1".to_string(),
            source_kind: SourceKind::Wiki,
            title: "Test".to_string(),
            text: text.to_string(),
            last_modified: Utc::now(),
            content_hash: Document::hash_content(text),
            tags: vec![],
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let doc = document("# Title\n\nFirst paragraph.\n\nSecond paragraph.");
        let chunker = SectionChunker::default();
        let a = chunker.chunk(&doc);
        let b = chunker.chunk(&doc);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn headings_become_section_paths() {
        let doc = document("# Deploys\n\nIntro text.\n\n## Rollback\n\nRollback steps here.");
        let chunks = SectionChunker::default().chunk(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_path, vec!["Deploys".to_string()]);
        assert_eq!(
            chunks[1].section_path,
            vec!["Deploys".to_string(), "Rollback".to_string()]
        );
    }

    #[test]
    fn ordinals_are_sequential() {
        let text = (0..20)
            .map(|i| format!("Paragraph number {} with a little bit of content in it.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = SectionChunker::new(ChunkerConfig {
            target_tokens: 30,
            max_tokens: 60,
        })
        .chunk(&document(&text));
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as u32);
            assert_eq!(chunk.id, wiki_agent_core::chunk_point_id("d1", i as u32));
        }
    }

    #[test]
    fn oversized_paragraph_is_split() {
        let sentence = "This sentence is repeated to build an oversized paragraph. ";
        let text = sentence.repeat(60);
        let chunks = SectionChunker::new(ChunkerConfig {
            target_tokens: 64,
            max_tokens: 128,
        })
        .chunk(&document(&text));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 160);
        }
    }
}
