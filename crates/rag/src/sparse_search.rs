//! Keyword search using Tantivy (BM25)
//!
//! The second leg of hybrid retrieval. The index holds chunk text only;
//! scoring metadata lives in the vector payload and the relational store.

use parking_lot::Mutex;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};
use uuid::Uuid;

use crate::RagError;

/// One BM25 hit
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk_id: Uuid,
    pub document_id: String,
    /// Raw BM25 score; callers normalize over the candidate set
    pub score: f32,
}

/// BM25 index over chunk text
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    chunk_id_field: Field,
    document_id_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Create an index, in RAM when `path` is `None`
    pub fn new(path: Option<&Path>) -> Result<Self, RagError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("wiki_en")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let document_id_field = schema_builder.add_text_field("document_id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", text_options);
        let schema = schema_builder.build();

        let index = match path {
            Some(path) => {
                let dir = tantivy::directory::MmapDirectory::open(path)
                    .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
                Index::open_or_create(dir, schema.clone())
                    .map_err(|e| RagError::KeywordIndex(e.to_string()))?
            }
            None => Index::create_in_ram(schema.clone()),
        };

        let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::English))
            .build();
        index.tokenizers().register("wiki_en", tokenizer);

        let reader = index
            .reader()
            .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| RagError::KeywordIndex(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            chunk_id_field,
            document_id_field,
            text_field,
        })
    }

    /// Replace a document's chunks in the index
    pub fn reindex_document(
        &self,
        document_id: &str,
        chunks: &[(Uuid, String)],
    ) -> Result<(), RagError> {
        let mut writer = self.writer.lock();

        writer.delete_term(Term::from_field_text(self.document_id_field, document_id));

        for (chunk_id, text) in chunks {
            let mut doc = TantivyDocument::default();
            doc.add_text(self.chunk_id_field, chunk_id.to_string());
            doc.add_text(self.document_id_field, document_id);
            doc.add_text(self.text_field, text);
            writer
                .add_document(doc)
                .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
        Ok(())
    }

    /// Remove a document's chunks (purge path)
    pub fn remove_document(&self, document_id: &str) -> Result<(), RagError> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.document_id_field, document_id));
        writer
            .commit()
            .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
        Ok(())
    }

    /// Top-k BM25 search. CPU-bound; retrieval calls this from
    /// `spawn_blocking`.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<KeywordHit>, RagError> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        // Free-text queries can contain characters the parser rejects
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k.max(1)))
            .map_err(|e| RagError::KeywordIndex(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RagError::KeywordIndex(e.to_string()))?;
            let chunk_id = doc
                .get_first(self.chunk_id_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => Uuid::parse_str(s).ok(),
                    _ => None,
                });
            let document_id = doc.get_first(self.document_id_field).and_then(|v| match v {
                OwnedValue::Str(s) => Some(s.clone()),
                _ => None,
            });
            if let (Some(chunk_id), Some(document_id)) = (chunk_id, document_id) {
                hits.push(KeywordHit {
                    chunk_id,
                    document_id,
                    score,
                });
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiki_agent_core::chunk_point_id;

    fn build_index() -> KeywordIndex {
        let index = KeywordIndex::new(None).unwrap();
        index
            .reindex_document(
                "d1",
                &[
                    (
                        chunk_point_id("d1", 0),
                        "The deployment pipeline runs on the build cluster".into(),
                    ),
                    (
                        chunk_point_id("d1", 1),
                        "On-call rotation for the SRE team".into(),
                    ),
                ],
            )
            .unwrap();
        index
            .reindex_document(
                "d2",
                &[(
                    chunk_point_id("d2", 0),
                    "Quarterly planning notes for the platform group".into(),
                )],
            )
            .unwrap();
        index
    }

    #[test]
    fn search_finds_matching_chunk() {
        let index = build_index();
        let hits = index.search("deployment pipeline", 10).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, chunk_point_id("d1", 0));
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn reindex_replaces_previous_chunks() {
        let index = build_index();
        index
            .reindex_document("d1", &[(chunk_point_id("d1", 0), "completely new text".into())])
            .unwrap();
        let hits = index.search("deployment pipeline", 10).unwrap();
        assert!(hits.iter().all(|h| h.document_id != "d1"));
        let hits = index.search("completely new", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn remove_document_clears_hits() {
        let index = build_index();
        index.remove_document("d2").unwrap();
        let hits = index.search("quarterly planning", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn odd_characters_do_not_panic() {
        let index = build_index();
        let hits = index.search("what is \"SRE\" team: on-call?", 10).unwrap();
        assert!(!hits.is_empty());
    }
}
