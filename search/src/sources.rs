use async_trait::async_trait;
use coderank_core::fusion::{ExactMatch, SemanticMatch, StatisticalMatch, SymbolMatch};
use coderank_core::StatisticalEngine;

/// Exact lexical index, consumed as a black box.
#[async_trait]
pub trait ExactSource: Send + Sync {
    async fn find_exact(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ExactMatch>>;
}

/// Vector similarity store. Lookups are always bounded by the caller's timeout.
#[async_trait]
pub trait SemanticSource: Send + Sync {
    async fn find_similar(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SemanticMatch>>;
}

#[async_trait]
pub trait SymbolSource: Send + Sync {
    async fn find_symbols(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SymbolMatch>>;
}

/// In-memory statistical producer. Runs on the blocking pool and carries no timeout.
pub trait StatisticalSource: Send + Sync {
    fn find_statistical(&self, query: &str, limit: usize) -> coderank_core::Result<Vec<StatisticalMatch>>;
}

impl StatisticalSource for StatisticalEngine {
    fn find_statistical(&self, query: &str, limit: usize) -> coderank_core::Result<Vec<StatisticalMatch>> {
        self.search_chunks(query, limit)
    }
}
