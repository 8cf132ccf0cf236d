pub mod sources;

use coderank_core::fusion::{FusedResult, FusionEngine, SignalKind};
use coderank_core::index::{DocId, Document, InvertedIndex};
use coderank_core::{Result, SearchConfig, SearchError, StatisticalEngine};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use sources::{ExactSource, SemanticSource, StatisticalSource, SymbolSource};

/// Raw chunk handed over by an external chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInput {
    pub file_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub language: Option<String>,
    pub content: String,
}

/// A signal that was dropped from fusion, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedSignal {
    pub signal: SignalKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub results: Vec<FusedResult>,
    pub degraded: Vec<DegradedSignal>,
}

type Outcome<T> = std::result::Result<Vec<T>, DegradedSignal>;

/// Four-signal search over one shared index. External sources are optional; a missing source
/// simply contributes nothing.
pub struct HybridSearcher {
    engine: Arc<StatisticalEngine>,
    statistical: Arc<dyn StatisticalSource>,
    exact: Option<Arc<dyn ExactSource>>,
    semantic: Option<Arc<dyn SemanticSource>>,
    symbol: Option<Arc<dyn SymbolSource>>,
    fusion: FusionEngine,
    candidate_limit: usize,
}

impl HybridSearcher {
    pub fn new(index: Arc<InvertedIndex>, config: SearchConfig) -> Self {
        let fusion = FusionEngine::new(config.fusion.clone());
        let candidate_limit = config.bm25.candidate_limit;
        let engine = Arc::new(StatisticalEngine::new(index, config));
        Self {
            statistical: engine.clone(),
            engine,
            exact: None,
            semantic: None,
            symbol: None,
            fusion,
            candidate_limit,
        }
    }

    /// Open a persistent index at `path` and build a searcher over it.
    pub fn open<P: AsRef<Path>>(path: P, config: SearchConfig) -> Result<Self> {
        config.validate()?;
        let index = Arc::new(InvertedIndex::open(path, config.index.clone())?);
        Ok(Self::new(index, config))
    }

    pub fn with_exact(mut self, source: Arc<dyn ExactSource>) -> Self {
        self.exact = Some(source);
        self
    }

    pub fn with_semantic(mut self, source: Arc<dyn SemanticSource>) -> Self {
        self.semantic = Some(source);
        self
    }

    pub fn with_symbol(mut self, source: Arc<dyn SymbolSource>) -> Self {
        self.symbol = Some(source);
        self
    }

    /// Replace the built-in statistical producer.
    pub fn with_statistical(mut self, source: Arc<dyn StatisticalSource>) -> Self {
        self.statistical = source;
        self
    }

    pub fn index(&self) -> &Arc<InvertedIndex> { self.engine.index() }

    pub fn engine(&self) -> &Arc<StatisticalEngine> { &self.engine }

    /// Tokenize and index one chunk, replacing any earlier version of it.
    pub fn index_chunk(&self, chunk: ChunkInput) -> Result<DocId> {
        let tokens = self.engine.tokenizer().tokenize(&chunk.content, chunk.language.as_deref());
        let doc = Document::new(chunk.file_path, chunk.chunk_index, chunk.start_line, chunk.end_line, chunk.language);
        let id = doc.id.clone();
        self.index().index_document_with_content(doc, &tokens, Some(&chunk.content))?;
        Ok(id)
    }

    /// Like [`index_chunk`](Self::index_chunk) for raw bytes; invalid UTF-8 is `MalformedInput`.
    pub fn index_chunk_bytes(&self, mut chunk: ChunkInput, content: &[u8]) -> Result<DocId> {
        let text = std::str::from_utf8(content).map_err(|e| SearchError::MalformedInput {
            reason: format!("{}#{} is not valid UTF-8: {e}", chunk.file_path, chunk.chunk_index),
        })?;
        chunk.content = text.to_string();
        self.index_chunk(chunk)
    }

    pub fn remove_chunk(&self, doc_id: &str) -> Result<Document> {
        self.index().remove_document(doc_id)
    }

    /// Run all four lookups concurrently and fuse whatever arrives. External lookups are bounded
    /// by `timeout`; a failed or late signal is reported in `degraded` instead of failing the query.
    pub async fn search(&self, query: &str, timeout: Duration) -> Result<SearchResponse> {
        if self.engine.tokenizer().query_terms(query).is_empty() {
            tracing::debug!(query = %query, "query has no usable terms");
            return Ok(SearchResponse::default());
        }
        let limit = self.candidate_limit;

        let statistical = {
            let source = Arc::clone(&self.statistical);
            let q = query.to_string();
            async move {
                match tokio::task::spawn_blocking(move || source.find_statistical(&q, limit)).await {
                    Ok(Ok(matches)) => Ok(matches),
                    Ok(Err(SearchError::EmptyQuery)) => Ok(Vec::new()),
                    Ok(Err(e)) => Err(degrade(SignalKind::Statistical, e.to_string())),
                    Err(e) => Err(degrade(SignalKind::Statistical, format!("statistical task failed: {e}"))),
                }
            }
        };
        let exact = async {
            match &self.exact {
                Some(src) => Some(bounded(SignalKind::Exact, timeout, src.find_exact(query, limit)).await),
                None => None,
            }
        };
        let semantic = async {
            match &self.semantic {
                Some(src) => Some(bounded(SignalKind::Semantic, timeout, src.find_similar(query, limit)).await),
                None => None,
            }
        };
        let symbol = async {
            match &self.symbol {
                Some(src) => Some(bounded(SignalKind::Symbol, timeout, src.find_symbols(query, limit)).await),
                None => None,
            }
        };
        let (statistical, exact, semantic, symbol) = tokio::join!(statistical, exact, semantic, symbol);

        let mut attempted = 0;
        let mut degraded = Vec::new();
        let statistical = collect(Some(statistical), &mut attempted, &mut degraded);
        let exact = collect(exact, &mut attempted, &mut degraded);
        let semantic = collect(semantic, &mut attempted, &mut degraded);
        let symbol = collect(symbol, &mut attempted, &mut degraded);
        if degraded.len() == attempted {
            tracing::warn!(query = %query, "every search signal failed");
            return Err(SearchError::AllSignalsFailed);
        }

        let results = self.fusion.fuse(&exact, &semantic, &symbol, &statistical);
        tracing::debug!(query = %query, results = results.len(), degraded = degraded.len(), "hybrid search");
        Ok(SearchResponse { results, degraded })
    }
}

fn degrade(signal: SignalKind, reason: String) -> DegradedSignal {
    tracing::warn!(signal = %signal, reason = %reason, "signal dropped from fusion");
    DegradedSignal { signal, reason }
}

async fn bounded<T, F>(signal: SignalKind, timeout: Duration, lookup: F) -> Outcome<T>
where
    F: Future<Output = anyhow::Result<Vec<T>>>,
{
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(matches)) => Ok(matches),
        Ok(Err(e)) => Err(degrade(signal, format!("{e:#}"))),
        Err(_) => Err(degrade(signal, SearchError::QueryTimeout { signal, timeout }.to_string())),
    }
}

fn collect<T>(outcome: Option<Outcome<T>>, attempted: &mut usize, degraded: &mut Vec<DegradedSignal>) -> Vec<T> {
    let Some(outcome) = outcome else { return Vec::new() };
    *attempted += 1;
    outcome.unwrap_or_else(|d| {
        degraded.push(d);
        Vec::new()
    })
}
