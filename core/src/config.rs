use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level configuration. Every section falls back to its defaults when absent from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub tokenizer: TokenizerConfig,
    pub index: IndexConfig,
    pub bm25: Bm25Config,
    pub phrase: PhraseConfig,
    pub expansion: ExpansionConfig,
    pub fusion: FusionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub min_term_length: usize,
    pub max_term_length: usize,
    pub stop_words: HashSet<String>,
    pub enable_stemming: bool,
    pub enable_ngrams: bool,
    pub max_ngram_size: usize,
}

// Only plain English filler; programming keywords stay searchable.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "and", "or", "a", "an", "is", "it", "in", "to", "of", "as", "at", "by", "with", "this", "that", "from",
];

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_term_length: 2,
            max_term_length: 50,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            enable_stemming: true,
            enable_ngrams: false,
            max_ngram_size: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Average document length reported while the index holds no documents.
    pub default_average_length: f32,
    /// Keep chunk text alongside postings so results can carry content.
    pub store_content: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { default_average_length: 1.0, store_content: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
    #[serde(alias = "bm25_cache_size")]
    pub cache_size: usize,
    /// Multiply each term score by the posting's mean token importance.
    pub apply_importance: bool,
    /// Number of statistical matches handed to fusion per query.
    pub candidate_limit: usize,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, cache_size: 1000, apply_importance: true, candidate_limit: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseConfig {
    pub enabled: bool,
    #[serde(alias = "phrase_boost_factor")]
    pub boost_factor: f32,
}

impl Default for PhraseConfig {
    fn default() -> Self {
        Self { enabled: true, boost_factor: 2.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub enabled: bool,
    pub synonym_weight: f32,
    pub stem_weight: f32,
    pub max_terms: usize,
    /// Extra synonyms merged over the built-in dictionary.
    pub synonyms: HashMap<String, Vec<String>>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self { enabled: true, synonym_weight: 0.5, stem_weight: 0.9, max_terms: 15, synonyms: HashMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub exact: f32,
    pub statistical: f32,
    pub semantic: f32,
    pub symbol: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { exact: 0.4, statistical: 0.25, semantic: 0.25, symbol: 0.1 }
    }
}

impl FusionWeights {
    pub fn sum(&self) -> f32 { self.exact + self.statistical + self.semantic + self.symbol }

    /// The same weights rescaled to sum to 1.0. All-zero weights are returned unchanged.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if !(sum > 0.0) {
            return *self;
        }
        Self {
            exact: self.exact / sum,
            statistical: self.statistical / sum,
            semantic: self.semantic / sum,
            symbol: self.symbol / sum,
        }
    }
}

/// How per-signal evidence is combined into one score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    /// `sum(weight * normalized score)` over the matching signals.
    #[default]
    Weighted,
    /// Reciprocal rank fusion: `sum(weight / (rrf_k + rank + 1))`, rank being the 0-based position
    /// of the chunk in that signal's result list.
    Rrf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub weights: FusionWeights,
    pub exact_cap: f32,
    pub semantic_multiplier: f32,
    pub semantic_cap: f32,
    pub symbol_score: f32,
    pub statistical_divisor: f32,
    pub statistical_cap: f32,
    pub max_results: usize,
    /// Rescale `weights` to sum to 1.0 before fusing.
    pub normalize_weights: bool,
    pub mode: FusionMode,
    pub rrf_k: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            exact_cap: 1.0,
            semantic_multiplier: 1.0,
            semantic_cap: 0.9,
            symbol_score: 0.95,
            statistical_divisor: 10.0,
            statistical_cap: 0.9,
            max_results: 50,
            normalize_weights: true,
            mode: FusionMode::Weighted,
            rrf_k: 60.0,
        }
    }
}

impl FusionConfig {
    /// Identifier-heavy queries: symbol definitions count for more, embeddings for less.
    pub fn code_search() -> Self {
        Self {
            weights: FusionWeights { exact: 0.35, statistical: 0.2, semantic: 0.2, symbol: 0.25 },
            max_results: 25,
            ..Self::default()
        }
    }

    /// Prose queries, where embedding similarity carries most of the signal.
    pub fn natural_language() -> Self {
        Self {
            weights: FusionWeights { exact: 0.2, statistical: 0.3, semantic: 0.45, symbol: 0.05 },
            max_results: 20,
            ..Self::default()
        }
    }

    /// The weights fusion actually applies.
    pub fn effective_weights(&self) -> FusionWeights {
        if self.normalize_weights {
            self.weights.normalized()
        } else {
            self.weights
        }
    }

    /// Largest normalized score any single signal can contribute.
    pub fn max_cap(&self) -> f32 {
        self.exact_cap.max(self.semantic_cap).max(self.symbol_score).max(self.statistical_cap)
    }
}

impl SearchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SearchConfig = toml::from_str(text).map_err(|e| SearchError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SearchError::invalid_config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded search configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.tokenizer;
        if t.min_term_length == 0 || t.min_term_length > t.max_term_length {
            return Err(SearchError::invalid_config(format!(
                "term length bounds must satisfy 0 < min ({}) <= max ({})",
                t.min_term_length, t.max_term_length
            )));
        }
        if t.enable_ngrams && t.max_ngram_size < 2 {
            return Err(SearchError::invalid_config("max_ngram_size must be at least 2 when n-grams are enabled"));
        }
        let bm = &self.bm25;
        if !bm.k1.is_finite() || bm.k1 < 0.0 {
            return Err(SearchError::invalid_config(format!("k1 must be a non-negative number, got {}", bm.k1)));
        }
        if !(0.0..=1.0).contains(&bm.b) {
            return Err(SearchError::invalid_config(format!("b must lie in [0, 1], got {}", bm.b)));
        }
        if !(self.index.default_average_length > 0.0) {
            return Err(SearchError::invalid_config("default_average_length must be positive"));
        }
        if !(self.phrase.boost_factor >= 0.0) {
            return Err(SearchError::invalid_config("phrase boost_factor must be non-negative"));
        }
        let w = &self.fusion.weights;
        let weights = [w.exact, w.statistical, w.semantic, w.symbol];
        if weights.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(SearchError::invalid_config("fusion weights must be finite and non-negative"));
        }
        if w.sum() <= 0.0 {
            return Err(SearchError::invalid_config("at least one fusion weight must be positive"));
        }
        if !self.fusion.normalize_weights && (w.sum() - 1.0).abs() > 1e-3 {
            tracing::warn!(sum = w.sum(), "fusion weights do not sum to 1.0 and normalize_weights is off");
        }
        if !self.fusion.rrf_k.is_finite() || self.fusion.rrf_k < 0.0 {
            return Err(SearchError::invalid_config(format!("rrf_k must be a non-negative number, got {}", self.fusion.rrf_k)));
        }
        if !(self.fusion.statistical_divisor > 0.0) {
            return Err(SearchError::invalid_config("statistical_divisor must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SearchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bm25.k1, 1.2);
        assert_eq!(config.bm25.b, 0.75);
        assert!((config.fusion.weights.sum() - 1.0).abs() < 1e-6);
        assert!(config.tokenizer.stop_words.contains("the"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SearchConfig::from_toml_str(
            r#"
            [bm25]
            k1 = 1.5
            bm25_cache_size = 10

            [phrase]
            phrase_boost_factor = 3.0

            [fusion.weights]
            exact = 0.5
            statistical = 0.2
            semantic = 0.2
            symbol = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.bm25.k1, 1.5);
        assert_eq!(config.bm25.b, 0.75);
        assert_eq!(config.bm25.cache_size, 10);
        assert_eq!(config.phrase.boost_factor, 3.0);
        assert_eq!(config.fusion.weights.exact, 0.5);
        assert_eq!(config.tokenizer.min_term_length, 2);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SearchConfig::from_toml_str("[bm25]\nb = 1.5").is_err());
        assert!(SearchConfig::from_toml_str("[bm25]\nk1 = -1.0").is_err());
        assert!(SearchConfig::from_toml_str("[tokenizer]\nmin_term_length = 10\nmax_term_length = 3").is_err());
        assert!(SearchConfig::from_toml_str("[fusion.weights]\nexact = -0.1").is_err());
        assert!(SearchConfig::from_toml_str("[fusion]\nrrf_k = -1.0").is_err());
        assert!(SearchConfig::from_toml_str("[fusion]\nmode = \"borda\"").is_err());
        assert!(matches!(
            SearchConfig::from_toml_str("not toml ==="),
            Err(SearchError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn fusion_presets_are_valid_and_sum_to_one() {
        for fusion in [FusionConfig::code_search(), FusionConfig::natural_language()] {
            assert!((fusion.weights.sum() - 1.0).abs() < 1e-6);
            SearchConfig { fusion, ..SearchConfig::default() }.validate().unwrap();
        }
        assert!(FusionConfig::code_search().weights.symbol > FusionWeights::default().symbol);
        assert!(FusionConfig::natural_language().weights.semantic > FusionWeights::default().semantic);
    }

    #[test]
    fn normalized_weights_sum_to_one() {
        let w = FusionWeights { exact: 2.0, statistical: 1.0, semantic: 1.0, symbol: 0.0 };
        let n = w.normalized();
        assert!((n.sum() - 1.0).abs() < 1e-6);
        assert_eq!(n.exact, 0.5);
        let zero = FusionWeights { exact: 0.0, statistical: 0.0, semantic: 0.0, symbol: 0.0 };
        assert_eq!(zero.normalized(), zero);

        let raw = FusionConfig { weights: w, normalize_weights: false, ..FusionConfig::default() };
        assert_eq!(raw.effective_weights(), w);
        assert_eq!(FusionConfig { normalize_weights: true, ..raw }.effective_weights(), n);
    }

    #[test]
    fn fusion_mode_reads_from_toml() {
        let config = SearchConfig::from_toml_str("[fusion]\nmode = \"rrf\"\nrrf_k = 10.0\n").unwrap();
        assert_eq!(config.fusion.mode, FusionMode::Rrf);
        assert_eq!(config.fusion.rrf_k, 10.0);
        assert_eq!(SearchConfig::default().fusion.mode, FusionMode::Weighted);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coderank.toml");
        std::fs::write(&path, "[tokenizer]\nenable_stemming = false\n").unwrap();
        let config = SearchConfig::load(&path).unwrap();
        assert!(!config.tokenizer.enable_stemming);
        assert!(SearchConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
