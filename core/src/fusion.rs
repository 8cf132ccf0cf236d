use crate::config::{FusionConfig, FusionMode, FusionWeights};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// The four relevance signals, in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Exact,
    Statistical,
    Semantic,
    Symbol,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [SignalKind::Exact, SignalKind::Statistical, SignalKind::Semantic, SignalKind::Symbol];

    fn slot(self) -> usize {
        match self {
            SignalKind::Exact => 0,
            SignalKind::Statistical => 1,
            SignalKind::Semantic => 2,
            SignalKind::Symbol => 3,
        }
    }

    pub fn weight(self, weights: &FusionWeights) -> f32 {
        match self {
            SignalKind::Exact => weights.exact,
            SignalKind::Statistical => weights.statistical,
            SignalKind::Semantic => weights.semantic,
            SignalKind::Symbol => weights.symbol,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Exact => "exact",
            SignalKind::Statistical => "statistical",
            SignalKind::Semantic => "semantic",
            SignalKind::Symbol => "symbol",
        };
        f.write_str(name)
    }
}

/// Which signal a fused result is attributed to.
pub type MatchType = SignalKind;

/// A lexical hit from the exact-match index. `line_content` is the matched line, not the whole chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactMatch {
    pub file_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub line_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub file_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    /// Similarity in `[0, 1]`.
    pub similarity: f32,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub file_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub symbol: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalMatch {
    pub file_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    /// Raw BM25 score plus any phrase boost.
    pub score: f32,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_index: usize,
    pub score: f32,
    pub match_type: MatchType,
    pub content: Option<String>,
    /// Signals that matched this chunk, in fixed signal order.
    pub signals: Vec<SignalKind>,
}

struct Candidate {
    file_path: String,
    chunk_index: usize,
    start_line: usize,
    end_line: usize,
    normalized: [Option<f32>; 4],
    // Best position of the chunk in each signal's list.
    ranks: [Option<usize>; 4],
    // Lower rank wins; full-chunk content outranks an exact-match line.
    content: Option<(u8, String)>,
}

impl Candidate {
    #[allow(clippy::too_many_arguments)]
    fn offer(
        &mut self,
        signal: SignalKind,
        score: f32,
        rank: usize,
        start_line: usize,
        end_line: usize,
        content: Option<&String>,
        content_rank: u8,
    ) {
        let slot = &mut self.normalized[signal.slot()];
        *slot = Some(slot.map_or(score, |s| s.max(score)));
        let best = &mut self.ranks[signal.slot()];
        *best = Some(best.map_or(rank, |r| r.min(rank)));
        self.start_line = self.start_line.min(start_line);
        self.end_line = self.end_line.max(end_line);
        if let Some(text) = content {
            if self.content.as_ref().map_or(true, |(rank, _)| content_rank < *rank) {
                self.content = Some((content_rank, text.clone()));
            }
        }
    }
}

fn candidate<'a>(
    candidates: &'a mut HashMap<(String, usize), Candidate>,
    file_path: &str,
    chunk_index: usize,
    start_line: usize,
    end_line: usize,
) -> &'a mut Candidate {
    candidates.entry((file_path.to_string(), chunk_index)).or_insert_with(|| Candidate {
        file_path: file_path.to_string(),
        chunk_index,
        start_line,
        end_line,
        normalized: [None; 4],
        ranks: [None; 4],
        content: None,
    })
}

/// Merges the four match lists into one ranked list, deduplicated by `(file_path, chunk_index)`.
/// Each input list is expected in its producer's rank order.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
    weights: FusionWeights,
}

impl Default for FusionEngine {
    fn default() -> Self { Self::new(FusionConfig::default()) }
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        let weights = config.effective_weights();
        Self { config, weights }
    }

    /// Weights after optional normalization.
    pub fn weights(&self) -> &FusionWeights { &self.weights }

    pub fn config(&self) -> &FusionConfig { &self.config }

    pub fn normalize_semantic(&self, similarity: f32) -> Option<f32> {
        if !similarity.is_finite() {
            return None;
        }
        Some((similarity.clamp(0.0, 1.0) * self.config.semantic_multiplier).clamp(0.0, self.config.semantic_cap))
    }

    pub fn normalize_statistical(&self, score: f32) -> Option<f32> {
        if !score.is_finite() {
            return None;
        }
        Some((score / self.config.statistical_divisor).clamp(0.0, self.config.statistical_cap))
    }

    pub fn fuse(
        &self,
        exact: &[ExactMatch],
        semantic: &[SemanticMatch],
        symbol: &[SymbolMatch],
        statistical: &[StatisticalMatch],
    ) -> Vec<FusedResult> {
        let mut candidates: HashMap<(String, usize), Candidate> = HashMap::new();

        for (rank, m) in statistical.iter().enumerate() {
            let Some(score) = self.normalize_statistical(m.score) else { continue };
            candidate(&mut candidates, &m.file_path, m.chunk_index, m.start_line, m.end_line).offer(
                SignalKind::Statistical,
                score,
                rank,
                m.start_line,
                m.end_line,
                m.content.as_ref(),
                0,
            );
        }
        for (rank, m) in semantic.iter().enumerate() {
            let Some(score) = self.normalize_semantic(m.similarity) else { continue };
            candidate(&mut candidates, &m.file_path, m.chunk_index, m.start_line, m.end_line).offer(
                SignalKind::Semantic,
                score,
                rank,
                m.start_line,
                m.end_line,
                m.content.as_ref(),
                1,
            );
        }
        for (rank, m) in symbol.iter().enumerate() {
            candidate(&mut candidates, &m.file_path, m.chunk_index, m.start_line, m.end_line).offer(
                SignalKind::Symbol,
                self.config.symbol_score,
                rank,
                m.start_line,
                m.end_line,
                m.content.as_ref(),
                2,
            );
        }
        for (rank, m) in exact.iter().enumerate() {
            candidate(&mut candidates, &m.file_path, m.chunk_index, m.start_line, m.end_line).offer(
                SignalKind::Exact,
                self.config.exact_cap,
                rank,
                m.start_line,
                m.end_line,
                m.line_content.as_ref(),
                3,
            );
        }

        let weights = &self.weights;
        let (mode, rrf_k) = (self.config.mode, self.config.rrf_k);
        let mut results: Vec<FusedResult> = candidates
            .into_values()
            .map(|c| {
                let mut score = 0.0;
                let mut signals = Vec::new();
                let mut strongest: Option<(SignalKind, f32)> = None;
                for kind in SignalKind::ALL {
                    let (Some(norm), Some(rank)) = (c.normalized[kind.slot()], c.ranks[kind.slot()]) else { continue };
                    let contribution = kind.weight(weights)
                        * match mode {
                            FusionMode::Weighted => norm,
                            FusionMode::Rrf => 1.0 / (rrf_k + rank as f32 + 1.0),
                        };
                    score += contribution;
                    signals.push(kind);
                    if strongest.map_or(true, |(_, best)| contribution > best) {
                        strongest = Some((kind, contribution));
                    }
                }
                let match_type = if c.normalized[SignalKind::Exact.slot()].is_some() {
                    SignalKind::Exact
                } else {
                    strongest.map_or(SignalKind::Statistical, |(kind, _)| kind)
                };
                FusedResult {
                    file_path: c.file_path,
                    start_line: c.start_line,
                    end_line: c.end_line,
                    chunk_index: c.chunk_index,
                    score,
                    match_type,
                    content: c.content.map(|(_, text)| text),
                    signals,
                }
            })
            .collect();

        results.sort_by(fused_order);
        results.truncate(self.config.max_results);
        tracing::debug!(
            exact = exact.len(),
            semantic = semantic.len(),
            symbol = symbol.len(),
            statistical = statistical.len(),
            fused = results.len(),
            mode = ?mode,
            "fused signals"
        );
        results
    }
}

/// Descending score, then file path, start line and chunk index.
pub fn fused_order(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.file_path.cmp(&b.file_path))
        .then_with(|| a.start_line.cmp(&b.start_line))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
}
