use crate::config::PhraseConfig;
use crate::index::{DocId, InvertedIndex};
use crate::tokenizer::{split_identifier, TokenKind, Tokenizer};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref QUOTED_RE: Regex = Regex::new(r#""([^"]+)"|'([^']+)'|`([^`]+)`"#).expect("valid regex");
    static ref WORD_RE: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_\-]*").expect("valid regex");
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum PhraseSource {
    Quoted,
    Compound,
}

/// Ordered terms that should appear close together, in this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Phrase {
    pub terms: Vec<String>,
    pub source: PhraseSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhraseMatch {
    pub doc_id: DocId,
    pub terms: Vec<String>,
    /// First and last token position of the tightest alignment.
    pub start: usize,
    pub end: usize,
    pub span: usize,
    pub in_order: bool,
    pub score: f32,
}

/// Quoted substrings first, then compound identifiers (`parseJson`, `read_file`) from the rest of the query.
pub fn extract_phrases(query: &str, tokenizer: &Tokenizer) -> Vec<Phrase> {
    let mut phrases = Vec::new();
    let mut seen = HashSet::new();
    for caps in QUOTED_RE.captures_iter(query) {
        let Some(inner) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else { continue };
        let terms = quoted_terms(inner.as_str(), tokenizer);
        if terms.len() >= 2 && seen.insert(terms.clone()) {
            phrases.push(Phrase { terms, source: PhraseSource::Quoted });
        }
    }
    let unquoted = QUOTED_RE.replace_all(query, " ");
    let config = tokenizer.config();
    for word in WORD_RE.find_iter(&unquoted) {
        let terms: Vec<String> = split_identifier(word.as_str())
            .into_iter()
            .filter(|p| {
                let len = p.chars().count();
                len >= config.min_term_length && len <= config.max_term_length && !config.stop_words.contains(p)
            })
            .collect();
        if terms.len() >= 2 && seen.insert(terms.clone()) {
            phrases.push(Phrase { terms, source: PhraseSource::Compound });
        }
    }
    phrases
}

// Keep only the first token at each position so n-grams never become phrase terms.
fn quoted_terms(text: &str, tokenizer: &Tokenizer) -> Vec<String> {
    let mut last: Option<usize> = None;
    let mut terms = Vec::new();
    for token in tokenizer.tokenize(text, None) {
        if token.kind == TokenKind::Operator || last.is_some_and(|l| token.position <= l) {
            continue;
        }
        last = Some(token.position);
        terms.push(token.text);
    }
    terms
}

/// Tightest in-order alignment: for each start of the first term, greedily take the next later
/// occurrence of every following term. Returns `(start, end)` positions.
pub fn tightest_ordered_span(positions: &[&[usize]]) -> Option<(usize, usize)> {
    let (first, rest) = positions.split_first()?;
    let mut best: Option<(usize, usize)> = None;
    'starts: for &start in first.iter() {
        let mut prev = start;
        for list in rest {
            let i = list.partition_point(|&p| p <= prev);
            match list.get(i) {
                Some(&p) => prev = p,
                None => break 'starts,
            }
        }
        if best.map_or(true, |(s, e)| prev - start < e - s) {
            best = Some((start, prev));
        }
    }
    best
}

/// Smallest window containing one occurrence of every list, regardless of order.
pub fn tightest_window(positions: &[&[usize]]) -> Option<(usize, usize)> {
    if positions.is_empty() || positions.iter().any(|l| l.is_empty()) {
        return None;
    }
    let mut merged: Vec<(usize, usize)> =
        positions.iter().enumerate().flat_map(|(i, list)| list.iter().map(move |&p| (p, i))).collect();
    merged.sort_unstable();
    let need = positions.len();
    let mut counts = vec![0usize; need];
    let mut covered = 0;
    let mut best: Option<(usize, usize)> = None;
    let mut left = 0;
    for right in 0..merged.len() {
        let (_, term) = merged[right];
        if counts[term] == 0 {
            covered += 1;
        }
        counts[term] += 1;
        while covered == need {
            let (lp, lt) = merged[left];
            let rp = merged[right].0;
            if best.map_or(true, |(s, e)| rp - lp < e - s) {
                best = Some((lp, rp));
            }
            counts[lt] -= 1;
            if counts[lt] == 0 {
                covered -= 1;
            }
            left += 1;
        }
    }
    best
}

/// Proximity score of one document for a phrase of `len` terms.
/// A contiguous in-order alignment earns `boost`; anything else `boost / (1 + span)`.
pub fn proximity_score(ordered: Option<(usize, usize)>, window: Option<(usize, usize)>, len: usize, boost: f32) -> Option<(usize, usize, bool, f32)> {
    if let Some((s, e)) = ordered {
        if e - s == len.saturating_sub(1) {
            return Some((s, e, true, boost));
        }
    }
    let (s, e, in_order) = match (ordered, window) {
        (Some(o), Some(w)) if w.1 - w.0 < o.1 - o.0 => (w.0, w.1, false),
        (Some(o), _) => (o.0, o.1, true),
        (None, Some(w)) => (w.0, w.1, false),
        (None, None) => return None,
    };
    let span = e - s;
    Some((s, e, in_order, boost / (1.0 + span as f32)))
}

/// Documents that contain every term of a phrase, scored by proximity.
pub fn match_phrase(phrase: &Phrase, index: &InvertedIndex, boost: f32) -> Vec<PhraseMatch> {
    let mut distinct: Vec<&str> = Vec::new();
    for t in &phrase.terms {
        if !distinct.contains(&t.as_str()) {
            distinct.push(t);
        }
    }
    let mut lists = HashMap::with_capacity(distinct.len());
    for term in &distinct {
        match index.get_posting_list(term) {
            Ok(list) if !list.is_empty() => {
                lists.insert(*term, list);
            }
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(term = %term, error = %e, "phrase skipped: term unreadable");
                return Vec::new();
            }
        }
    }
    let Some(smallest) = distinct.iter().min_by_key(|t| lists[**t].len()) else { return Vec::new() };

    let mut matches = Vec::new();
    for entry in lists[*smallest].entries() {
        let doc_id = entry.document_id.as_str();
        let per_distinct: Option<Vec<&[usize]>> =
            distinct.iter().map(|t| lists[*t].get(doc_id).map(|e| e.positions.as_slice())).collect();
        let Some(per_distinct) = per_distinct else { continue };
        let ordered_lists: Vec<&[usize]> = phrase
            .terms
            .iter()
            .filter_map(|t| distinct.iter().position(|d| *d == t.as_str()).map(|i| per_distinct[i]))
            .collect();
        let ordered = tightest_ordered_span(&ordered_lists);
        let window = tightest_window(&per_distinct);
        if let Some((start, end, in_order, score)) = proximity_score(ordered, window, phrase.terms.len(), boost) {
            matches.push(PhraseMatch {
                doc_id: entry.document_id.clone(),
                terms: phrase.terms.clone(),
                start,
                end,
                span: end - start,
                in_order,
                score,
            });
        }
    }
    matches
}

/// Extract phrases from `query` and match each against the index.
pub fn search_phrases(query: &str, tokenizer: &Tokenizer, index: &InvertedIndex, config: &PhraseConfig) -> Vec<PhraseMatch> {
    if !config.enabled {
        return Vec::new();
    }
    let phrases = extract_phrases(query, tokenizer);
    let matches: Vec<PhraseMatch> = phrases.iter().flat_map(|p| match_phrase(p, index, config.boost_factor)).collect();
    tracing::debug!(phrases = phrases.len(), matches = matches.len(), "phrase search");
    matches
}

/// Highest phrase score per document.
pub fn best_per_document(matches: &[PhraseMatch]) -> HashMap<DocId, f32> {
    let mut best: HashMap<DocId, f32> = HashMap::new();
    for m in matches {
        let slot = best.entry(m.doc_id.clone()).or_insert(0.0);
        *slot = slot.max(m.score);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::index::Document;

    fn index_of(docs: &[(&str, &str)]) -> InvertedIndex {
        let index = InvertedIndex::in_memory(IndexConfig::default()).unwrap();
        let tok = Tokenizer::default();
        for (path, text) in docs {
            index.index_document(Document::new(*path, 0, 1, 1, None), &tok.tokenize(text, None)).unwrap();
        }
        index
    }

    #[test]
    fn extracts_quoted_and_compound_phrases() {
        let tok = Tokenizer::default();
        let phrases = extract_phrases(r#"find "open file handle" in parseJsonConfig"#, &tok);
        assert_eq!(phrases[0], Phrase { terms: vec!["open".into(), "file".into(), "handle".into()], source: PhraseSource::Quoted });
        assert_eq!(phrases[1].terms, vec!["parse", "json", "config"]);
        assert_eq!(phrases[1].source, PhraseSource::Compound);
        assert_eq!(phrases.len(), 2);
    }

    #[test]
    fn single_words_are_not_phrases() {
        assert!(extract_phrases("\"alpha\" beta gamma", &Tokenizer::default()).is_empty());
    }

    #[test]
    fn ordered_span_picks_tightest_alignment() {
        let a: &[usize] = &[0, 10];
        let b: &[usize] = &[5, 11];
        assert_eq!(tightest_ordered_span(&[a, b]), Some((10, 11)));
        assert_eq!(tightest_ordered_span(&[b, a]), Some((5, 10)));
        let c: &[usize] = &[1];
        assert_eq!(tightest_ordered_span(&[b, c]), None);
    }

    #[test]
    fn window_ignores_order() {
        let a: &[usize] = &[4];
        let b: &[usize] = &[3, 20];
        assert_eq!(tightest_window(&[a, b]), Some((3, 4)));
    }

    #[test]
    fn contiguous_beats_out_of_order() {
        let index = index_of(&[("in.rs", "open file handle now"), ("out.rs", "handle file open now")]);
        let phrase = Phrase { terms: vec!["open".into(), "file".into(), "handle".into()], source: PhraseSource::Quoted };
        let matches = match_phrase(&phrase, &index, 2.0);
        let score = |id: &str| matches.iter().find(|m| m.doc_id == id).unwrap().score;
        assert_eq!(score("in.rs#0"), 2.0);
        assert!(score("out.rs#0") < score("in.rs#0"));
        assert!(!matches.iter().find(|m| m.doc_id == "out.rs#0").unwrap().in_order);
    }

    #[test]
    fn gapped_match_decays_with_span() {
        let index = index_of(&[("gap.rs", "open the config file handle")]);
        let phrase = Phrase { terms: vec!["open".into(), "file".into()], source: PhraseSource::Quoted };
        let m = &match_phrase(&phrase, &index, 2.0)[0];
        // "the" is a stop word, so positions are open=0 config=1 file=2.
        assert_eq!(m.span, 2);
        assert!(m.in_order);
        assert!((m.score - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn documents_missing_a_term_are_excluded() {
        let index = index_of(&[("a.rs", "open file"), ("b.rs", "open socket")]);
        let phrase = Phrase { terms: vec!["open".into(), "file".into()], source: PhraseSource::Quoted };
        let matches = match_phrase(&phrase, &index, 2.0);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].doc_id, "a.rs#0");
    }

    #[test]
    fn compound_query_matches_identifier_in_code() {
        let index = index_of(&[("code.rs", "let v = parse_json(raw);"), ("prose.rs", "json is hard to parse")]);
        let tok = Tokenizer::default();
        let matches = search_phrases("parseJson", &tok, &index, &PhraseConfig::default());
        let best = best_per_document(&matches);
        assert_eq!(best["code.rs#0"], 2.0);
        assert!(best["prose.rs#0"] < 2.0);
    }
}
