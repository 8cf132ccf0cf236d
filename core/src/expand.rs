use crate::bm25::WeightedTerm;
use crate::config::ExpansionConfig;
use crate::tokenizer::stem;
use std::collections::HashMap;

// Code-search vocabulary; all entries lowercase so they line up with indexed tokens.
const BUILTIN_SYNONYMS: &[(&str, &[&str])] = &[
    ("error", &["err", "result", "failure", "exception"]),
    ("err", &["error", "result"]),
    ("exception", &["error", "throw", "raise"]),
    ("handle", &["handler", "handling", "process"]),
    ("handler", &["handle", "callback", "listener"]),
    ("function", &["fn", "func", "method", "def"]),
    ("fn", &["function", "func", "method"]),
    ("method", &["function", "fn", "func"]),
    ("class", &["struct", "type", "impl"]),
    ("struct", &["class", "type", "record"]),
    ("search", &["find", "query", "lookup"]),
    ("find", &["search", "lookup", "locate"]),
    ("index", &["indexing", "indexer", "store"]),
    ("parse", &["parser", "parsing", "decode"]),
    ("config", &["configuration", "settings", "options", "cfg"]),
    ("init", &["initialize", "setup", "new"]),
    ("delete", &["remove", "drop", "erase"]),
    ("remove", &["delete", "drop"]),
    ("create", &["new", "make", "build"]),
    ("test", &["spec", "assert", "check"]),
    ("async", &["await", "future", "promise"]),
    ("vector", &["embedding", "vec", "array"]),
    ("embedding", &["vector", "embed", "encode"]),
    ("chunk", &["segment", "block", "split"]),
];

/// Turns query terms into a weighted term list: originals, their stems, then synonyms.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    config: ExpansionConfig,
    synonyms: HashMap<String, Vec<String>>,
}

impl QueryExpander {
    pub fn new(config: ExpansionConfig) -> Self {
        let mut synonyms: HashMap<String, Vec<String>> = BUILTIN_SYNONYMS
            .iter()
            .map(|(term, syns)| (term.to_string(), syns.iter().map(|s| s.to_string()).collect()))
            .collect();
        for (term, extra) in &config.synonyms {
            let slot = synonyms.entry(term.to_lowercase()).or_default();
            for syn in extra {
                let syn = syn.to_lowercase();
                if !slot.contains(&syn) {
                    slot.push(syn);
                }
            }
        }
        Self { config, synonyms }
    }

    pub fn synonyms_of(&self, term: &str) -> &[String] {
        self.synonyms.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Original terms are always kept; expansions fill the remaining room up to `max_terms`.
    pub fn expand(&self, terms: &[String]) -> Vec<WeightedTerm> {
        let mut out: Vec<WeightedTerm> = Vec::new();
        for term in terms {
            add(&mut out, term, 1.0);
        }
        if !self.config.enabled {
            return out;
        }
        let budget = self.config.max_terms.max(out.len());
        let mut candidates: Vec<WeightedTerm> = Vec::new();
        for term in terms {
            let stemmed = stem(term);
            if stemmed != *term && stemmed.len() > 1 {
                add(&mut candidates, &stemmed, self.config.stem_weight);
            }
        }
        for term in terms {
            for syn in self.synonyms_of(term) {
                add(&mut candidates, syn, self.config.synonym_weight);
            }
        }
        for cand in candidates {
            if let Some(existing) = out.iter_mut().find(|o| o.term == cand.term) {
                existing.weight = existing.weight.max(cand.weight);
            } else if out.len() < budget {
                out.push(cand);
            }
        }
        tracing::trace!(original = terms.len(), expanded = out.len(), "expanded query");
        out
    }
}

impl Default for QueryExpander {
    fn default() -> Self { Self::new(ExpansionConfig::default()) }
}

fn add(out: &mut Vec<WeightedTerm>, term: &str, weight: f32) {
    match out.iter_mut().find(|o| o.term == term) {
        Some(o) => o.weight = o.weight.max(weight),
        None => out.push(WeightedTerm::new(term, weight)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn weight_of(expanded: &[WeightedTerm], term: &str) -> Option<f32> {
        expanded.iter().find(|w| w.term == term).map(|w| w.weight)
    }

    #[test]
    fn originals_come_first_at_full_weight() {
        let out = QueryExpander::default().expand(&terms(&["error", "handling"]));
        assert_eq!(out[0], WeightedTerm::unit("error"));
        assert_eq!(out[1], WeightedTerm::unit("handling"));
        assert_eq!(weight_of(&out, "handl"), Some(0.9));
        assert_eq!(weight_of(&out, "result"), Some(0.5));
    }

    #[test]
    fn duplicates_keep_the_higher_weight() {
        // "err" is both an original and a synonym of "error".
        let out = QueryExpander::default().expand(&terms(&["error", "err"]));
        assert_eq!(weight_of(&out, "err"), Some(1.0));
        assert_eq!(out.iter().filter(|w| w.term == "err").count(), 1);
    }

    #[test]
    fn respects_max_terms() {
        let config = ExpansionConfig { max_terms: 4, ..ExpansionConfig::default() };
        let out = QueryExpander::new(config).expand(&terms(&["function", "config"]));
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].term, "function");
        assert_eq!(out[1].term, "config");
    }

    #[test]
    fn disabled_passes_terms_through() {
        let config = ExpansionConfig { enabled: false, ..ExpansionConfig::default() };
        let out = QueryExpander::new(config).expand(&terms(&["error"]));
        assert_eq!(out, vec![WeightedTerm::unit("error")]);
    }

    #[test]
    fn config_synonyms_extend_builtins() {
        let mut config = ExpansionConfig::default();
        config.synonyms.insert("Tokenize".into(), vec!["Lex".into()]);
        let out = QueryExpander::new(config).expand(&terms(&["tokenize"]));
        assert_eq!(weight_of(&out, "lex"), Some(0.5));
    }
}
