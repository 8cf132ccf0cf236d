use crate::cache::QueryCache;
use crate::config::Bm25Config;
use crate::error::SearchError;
use crate::index::{DocId, InvertedIndex};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// A query term with the multiplier it carries into scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f32,
}

impl WeightedTerm {
    pub fn new(term: impl Into<String>, weight: f32) -> Self { Self { term: term.into(), weight } }

    pub fn unit(term: impl Into<String>) -> Self { Self::new(term, 1.0) }

    pub fn from_terms<I, S>(terms: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        terms.into_iter().map(Self::unit).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bm25Match {
    pub doc_id: DocId,
    pub score: f32,
    pub per_term_contribution: HashMap<String, f32>,
    /// Matched query terms, in query order.
    pub matched_terms: Vec<String>,
    /// Additive proximity component; zero unless a phrase matched.
    pub phrase_boost: f32,
}

/// `ln((N - df + 0.5) / (df + 0.5) + 1)`
pub fn idf(total_docs: usize, doc_freq: usize) -> f32 {
    let n = total_docs as f64;
    let df = doc_freq as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln() as f32
}

pub fn term_score(idf: f32, tf: u32, doc_len: usize, avgdl: f32, k1: f32, b: f32) -> f32 {
    let (tf, k1, b) = (tf as f64, k1 as f64, b as f64);
    let norm = 1.0 - b + b * doc_len as f64 / avgdl as f64;
    (idf as f64 * (tf * (k1 + 1.0)) / (tf + k1 * norm)) as f32
}

/// Descending score, then ascending document id.
pub fn rank_order(a: &Bm25Match, b: &Bm25Match) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.doc_id.cmp(&b.doc_id))
}

type CacheKey = (Vec<(String, u32)>, usize);

/// Deduplicate terms keeping the highest weight, and drop non-positive weights.
fn normalize_terms(terms: &[WeightedTerm]) -> Vec<WeightedTerm> {
    let mut out: Vec<WeightedTerm> = Vec::with_capacity(terms.len());
    for t in terms {
        if !(t.weight > 0.0) {
            continue;
        }
        match out.iter_mut().find(|o| o.term == t.term) {
            Some(o) => o.weight = o.weight.max(t.weight),
            None => out.push(t.clone()),
        }
    }
    out
}

pub struct Bm25Engine {
    index: Arc<InvertedIndex>,
    config: Bm25Config,
    cache: QueryCache<CacheKey, Arc<Vec<Bm25Match>>>,
}

impl Bm25Engine {
    pub fn new(index: Arc<InvertedIndex>, config: Bm25Config) -> Self {
        let cache = QueryCache::new(config.cache_size);
        Self { index, config, cache }
    }

    pub fn config(&self) -> &Bm25Config { &self.config }

    /// Score one document. Unknown terms, unknown documents and corrupted terms contribute zero.
    pub fn score(&self, query_terms: &[WeightedTerm], doc_id: &str) -> f32 {
        let Some(doc_len) = self.index.document_length(doc_id) else { return 0.0 };
        let n = self.index.total_documents();
        let avgdl = self.index.average_document_length();
        let mut total = 0.0;
        for qt in normalize_terms(query_terms) {
            let hit = self.index.read_posting_list(&qt.term, |list| list.get(doc_id).map(|e| (list.len(), e.term_frequency, e.importance)));
            let (df, tf, importance) = match hit {
                Ok(Some(Some(hit))) => hit,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(term = %qt.term, error = %e, "skipping unreadable term");
                    continue;
                }
            };
            let s = term_score(idf(n, df), tf, doc_len, avgdl, self.config.k1, self.config.b);
            total += s * qt.weight * self.importance(importance);
        }
        total
    }

    fn importance(&self, posting_importance: f32) -> f32 {
        if self.config.apply_importance { posting_importance } else { 1.0 }
    }

    /// Score every document appearing in a query term's posting list. Only those lists are visited.
    pub fn score_candidates(&self, query_terms: &[WeightedTerm]) -> HashMap<DocId, Bm25Match> {
        let terms = normalize_terms(query_terms);
        let n = self.index.total_documents();
        let avgdl = self.index.average_document_length();

        let mut per_term: Vec<(&WeightedTerm, usize, Vec<(DocId, u32, f32)>)> = Vec::with_capacity(terms.len());
        for qt in &terms {
            let entries = self.index.read_posting_list(&qt.term, |list| {
                let rows: Vec<_> = list.entries().iter().map(|e| (e.document_id.clone(), e.term_frequency, e.importance)).collect();
                (list.len(), rows)
            });
            match entries {
                Ok(Some((df, rows))) => per_term.push((qt, df, rows)),
                Ok(None) => {}
                Err(SearchError::IndexCorruption { term, reason }) => {
                    tracing::warn!(term = %term, reason = %reason, "corrupted term contributes nothing");
                }
                Err(e) => tracing::warn!(term = %qt.term, error = %e, "posting lookup failed"),
            }
        }

        let lengths = self.index.document_lengths(per_term.iter().flat_map(|(_, _, rows)| rows.iter().map(|r| r.0.as_str())));
        let mut matches: HashMap<DocId, Bm25Match> = HashMap::new();
        for (qt, df, rows) in per_term {
            let term_idf = idf(n, df);
            for (doc_id, tf, importance) in rows {
                // Removed between the posting read and the length lookup.
                let Some(&doc_len) = lengths.get(&doc_id) else { continue };
                let contribution =
                    term_score(term_idf, tf, doc_len, avgdl, self.config.k1, self.config.b) * qt.weight * self.importance(importance);
                let m = matches.entry(doc_id.clone()).or_insert_with(|| Bm25Match {
                    doc_id,
                    score: 0.0,
                    per_term_contribution: HashMap::new(),
                    matched_terms: Vec::new(),
                    phrase_boost: 0.0,
                });
                m.score += contribution;
                m.per_term_contribution.insert(qt.term.clone(), contribution);
                m.matched_terms.push(qt.term.clone());
            }
        }
        matches
    }

    /// Top `limit` documents with their score breakdown.
    pub fn search_with_scores(&self, query_terms: &[WeightedTerm], limit: usize) -> Arc<Vec<Bm25Match>> {
        let terms = normalize_terms(query_terms);
        if terms.is_empty() || limit == 0 {
            return Arc::new(Vec::new());
        }
        let key: CacheKey = (terms.iter().map(|t| (t.term.clone(), t.weight.to_bits())).collect(), limit);
        let generation = self.index.generation();
        if let Some(hit) = self.cache.get(&key, generation) {
            return hit;
        }
        let ranked = Arc::new(rank(self.score_candidates(&terms).into_values(), limit));
        tracing::debug!(terms = terms.len(), hits = ranked.len(), "bm25 search");
        self.cache.put(key, Arc::clone(&ranked), generation);
        ranked
    }

    pub fn search(&self, query_terms: &[WeightedTerm], limit: usize) -> Vec<(DocId, f32)> {
        self.search_with_scores(query_terms, limit).iter().map(|m| (m.doc_id.clone(), m.score)).collect()
    }
}

/// Sort by [`rank_order`] and keep the first `limit`. Non-finite scores are discarded.
pub fn rank(matches: impl IntoIterator<Item = Bm25Match>, limit: usize) -> Vec<Bm25Match> {
    let mut ranked: Vec<Bm25Match> = matches
        .into_iter()
        .filter(|m| {
            let finite = m.score.is_finite();
            if !finite {
                tracing::warn!(doc_id = %m.doc_id, score = m.score, "dropping non-finite score");
            }
            finite
        })
        .collect();
    ranked.sort_by(rank_order);
    ranked.truncate(limit);
    ranked
}
