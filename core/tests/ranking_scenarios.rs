use coderank_core::bm25::{Bm25Engine, WeightedTerm};
use coderank_core::config::{Bm25Config, IndexConfig, SearchConfig};
use coderank_core::index::{Document, InvertedIndex};
use coderank_core::tokenizer::Tokenizer;
use coderank_core::{FusionEngine, SearchError, StatisticalEngine};
use std::sync::Arc;

fn build(docs: &[(&str, &str)]) -> Arc<InvertedIndex> {
    let index = Arc::new(InvertedIndex::in_memory(IndexConfig::default()).unwrap());
    let tok = Tokenizer::default();
    for (path, text) in docs {
        let doc = Document::new(*path, 0, 1, 1, Some("rust".into()));
        index.index_document_with_content(doc, &tok.tokenize(text, Some("rust")), Some(text)).unwrap();
    }
    index
}

#[test]
fn json_query_prefers_json_document() {
    let index = build(&[("a.rs", "parse json config file"), ("b.rs", "parse xml config file")]);
    let engine = Bm25Engine::new(index, Bm25Config::default());
    let hits = engine.search(&WeightedTerm::from_terms(["json", "config"]), 10);
    assert_eq!(hits[0].0, "a.rs#0");
    assert_eq!(hits[1].0, "b.rs#0");
    assert!(hits[0].1 > hits[1].1);
}

#[test]
fn absent_term_scores_zero_everywhere() {
    let index = build(&[("a.rs", "parse json"), ("b.rs", "parse xml")]);
    let engine = Bm25Engine::new(Arc::clone(&index), Bm25Config::default());
    let query = WeightedTerm::from_terms(["nonexistent"]);
    for id in ["a.rs#0", "b.rs#0"] {
        assert_eq!(engine.score(&query, id), 0.0);
    }
    assert!(engine.search(&query, 10).is_empty());
}

#[test]
fn empty_document_is_indexed_but_never_returned() {
    let index = build(&[("empty.rs", ""), ("a.rs", "alpha beta")]);
    assert_eq!(index.get_document("empty.rs#0").unwrap().token_count, 0);
    assert_eq!(index.average_document_length(), 1.0);
    let engine = Bm25Engine::new(index, Bm25Config::default());
    for q in [["alpha"], ["beta"], ["empty"]] {
        let hits = engine.search(&WeightedTerm::from_terms(q), 10);
        assert!(hits.iter().all(|(id, _)| id != "empty.rs#0"));
    }
}

#[test]
fn removed_document_disappears() {
    let index = build(&[("a.rs", "alpha beta"), ("b.rs", "alpha gamma")]);
    let engine = Bm25Engine::new(Arc::clone(&index), Bm25Config::default());
    let query = WeightedTerm::from_terms(["alpha"]);
    assert_eq!(engine.search(&query, 10).len(), 2);
    index.remove_document("a.rs#0").unwrap();
    let hits = engine.search(&query, 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "b.rs#0");
    assert!(matches!(index.get_document("a.rs#0"), Err(SearchError::DocumentNotFound { .. })));
}

#[test]
fn reindexing_identical_content_keeps_scores() {
    let text = "fn load_config(path: &Path) -> Config { read(path) }";
    let index = build(&[("a.rs", text), ("b.rs", "fn save_config() {}")]);
    let engine = Bm25Engine::new(Arc::clone(&index), Bm25Config::default());
    let query = WeightedTerm::from_terms(["config", "path", "load"]);
    let before = engine.score(&query, "a.rs#0");
    let tok = Tokenizer::default();
    for _ in 0..3 {
        index.index_document(Document::new("a.rs", 0, 1, 1, Some("rust".into())), &tok.tokenize(text, Some("rust"))).unwrap();
    }
    assert_eq!(engine.score(&query, "a.rs#0"), before);
    assert_eq!(index.total_documents(), 2);
}

#[test]
fn statistical_hits_flow_through_fusion() {
    let index = build(&[("src/json.rs", "parse json config file"), ("src/xml.rs", "parse xml config file")]);
    let engine = StatisticalEngine::new(index, SearchConfig::default());
    let stats = engine.search_chunks("json config", 10).unwrap();
    let fused = FusionEngine::default().fuse(&[], &[], &[], &stats);
    assert_eq!(fused[0].file_path, "src/json.rs");
    assert!(fused.iter().all(|r| r.score <= 0.25 * 0.9 + 1e-6));
}
