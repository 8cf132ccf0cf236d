use crate::bm25::{rank, Bm25Engine, Bm25Match};
use crate::cache::QueryCache;
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::expand::QueryExpander;
use crate::fusion::StatisticalMatch;
use crate::index::InvertedIndex;
use crate::phrase::{best_per_document, search_phrases};
use crate::tokenizer::Tokenizer;
use std::sync::Arc;

/// BM25 over the expanded query plus an additive phrase-proximity component.
/// Phrase scores only ever add to a document's BM25 score; query weights are left alone.
pub struct StatisticalEngine {
    index: Arc<InvertedIndex>,
    tokenizer: Tokenizer,
    expander: QueryExpander,
    bm25: Bm25Engine,
    config: SearchConfig,
    cache: QueryCache<(String, usize), Arc<Vec<Bm25Match>>>,
}

impl StatisticalEngine {
    pub fn new(index: Arc<InvertedIndex>, config: SearchConfig) -> Self {
        Self {
            tokenizer: Tokenizer::new(config.tokenizer.clone()),
            expander: QueryExpander::new(config.expansion.clone()),
            bm25: Bm25Engine::new(Arc::clone(&index), config.bm25.clone()),
            cache: QueryCache::new(config.bm25.cache_size),
            index,
            config,
        }
    }

    pub fn index(&self) -> &Arc<InvertedIndex> { &self.index }

    pub fn tokenizer(&self) -> &Tokenizer { &self.tokenizer }

    pub fn bm25(&self) -> &Bm25Engine { &self.bm25 }

    /// Ranked documents for a raw query string. A query with no usable terms is `EmptyQuery`.
    pub fn search(&self, query: &str, limit: usize) -> Result<Arc<Vec<Bm25Match>>> {
        let terms = self.tokenizer.query_terms(query);
        if terms.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let key = (query.to_string(), limit);
        let generation = self.index.generation();
        if let Some(hit) = self.cache.get(&key, generation) {
            return Ok(hit);
        }

        let weighted = self.expander.expand(&terms);
        let mut candidates = self.bm25.score_candidates(&weighted);
        let phrases = search_phrases(query, &self.tokenizer, &self.index, &self.config.phrase);
        for (doc_id, boost) in best_per_document(&phrases) {
            if let Some(m) = candidates.get_mut(&doc_id) {
                m.phrase_boost = boost;
                m.score += boost;
            }
        }
        let ranked = Arc::new(rank(candidates.into_values(), limit));
        tracing::debug!(query = %query, terms = weighted.len(), phrases = phrases.len(), hits = ranked.len(), "statistical search");
        self.cache.put(key, Arc::clone(&ranked), generation);
        Ok(ranked)
    }

    /// Search and resolve each hit to its chunk, ready for fusion. Documents removed mid-query are skipped.
    pub fn search_chunks(&self, query: &str, limit: usize) -> Result<Vec<StatisticalMatch>> {
        let ranked = self.search(query, limit)?;
        let mut out = Vec::with_capacity(ranked.len());
        for m in ranked.iter() {
            let doc = match self.index.get_document(&m.doc_id) {
                Ok(doc) => doc,
                Err(SearchError::DocumentNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            let content = match self.index.document_content(&m.doc_id) {
                Ok(content) => content,
                Err(SearchError::DocumentNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            out.push(StatisticalMatch {
                file_path: doc.file_path,
                chunk_index: doc.chunk_index,
                start_line: doc.start_line,
                end_line: doc.end_line,
                score: m.score,
                content,
            });
        }
        Ok(out)
    }
}
