use crate::config::IndexConfig;
use crate::error::{Result, SearchError};
use crate::persist::{CorruptTerm, IndexStore};
use crate::tokenizer::Token;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type DocId = String;

const DOC_LOCK_STRIPES: usize = 64;

/// One indexed chunk. The id is derived from file path and chunk index, so re-indexing the same region
/// replaces the earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub file_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub language: Option<String>,
    pub token_count: usize,
}

impl Document {
    pub fn new(file_path: impl Into<String>, chunk_index: usize, start_line: usize, end_line: usize, language: Option<String>) -> Self {
        let file_path = file_path.into();
        Self { id: Self::make_id(&file_path, chunk_index), file_path, chunk_index, start_line, end_line, language, token_count: 0 }
    }

    pub fn make_id(file_path: &str, chunk_index: usize) -> DocId { format!("{file_path}#{chunk_index}") }

    pub fn with_id(mut self, id: impl Into<DocId>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStats {
    pub document_frequency: u64,
    pub total_occurrences: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingEntry {
    pub document_id: DocId,
    pub term_frequency: u32,
    /// Ascending token positions.
    pub positions: Vec<usize>,
    /// Mean importance weight of the term's occurrences in this document.
    pub importance: f32,
}

/// Postings for one term, kept sorted by document id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostingList {
    entries: Vec<PostingEntry>,
    total_frequency: u64,
}

impl PostingList {
    pub fn entries(&self) -> &[PostingEntry] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn total_frequency(&self) -> u64 { self.total_frequency }

    pub fn get(&self, doc_id: &str) -> Option<&PostingEntry> {
        self.entries
            .binary_search_by(|e| e.document_id.as_str().cmp(doc_id))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn stats(&self) -> TermStats {
        TermStats { document_frequency: self.entries.len() as u64, total_occurrences: self.total_frequency }
    }

    fn upsert(&mut self, entry: PostingEntry) {
        match self.entries.binary_search_by(|e| e.document_id.cmp(&entry.document_id)) {
            Ok(i) => {
                self.total_frequency -= self.entries[i].term_frequency as u64;
                self.total_frequency += entry.term_frequency as u64;
                self.entries[i] = entry;
            }
            Err(i) => {
                self.total_frequency += entry.term_frequency as u64;
                self.entries.insert(i, entry);
            }
        }
    }

    fn remove(&mut self, doc_id: &str) -> Option<PostingEntry> {
        let i = self.entries.binary_search_by(|e| e.document_id.as_str().cmp(doc_id)).ok()?;
        let entry = self.entries.remove(i);
        self.total_frequency -= entry.term_frequency as u64;
        Some(entry)
    }

    fn from_entries(mut entries: Vec<PostingEntry>) -> Self {
        entries.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        entries.dedup_by(|a, b| a.document_id == b.document_id);
        let total_frequency = entries.iter().map(|e| e.term_frequency as u64).sum();
        Self { entries, total_frequency }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub total_terms: usize,
    pub average_document_length: f32,
    pub corrupted_terms: Vec<String>,
}

#[derive(Default)]
struct DocTable {
    docs: HashMap<DocId, Document>,
    terms_of: HashMap<DocId, Vec<String>>,
    total_length: u64,
}

/// Group a token stream into one posting entry per distinct term.
pub fn build_postings(doc_id: &str, tokens: &[Token]) -> BTreeMap<String, PostingEntry> {
    let mut grouped: BTreeMap<String, (Vec<usize>, f32, u32)> = BTreeMap::new();
    for token in tokens {
        let slot = grouped.entry(token.text.clone()).or_insert_with(|| (Vec::new(), 0.0, 0));
        slot.0.push(token.position);
        slot.1 += token.importance_weight;
        slot.2 += 1;
    }
    grouped
        .into_iter()
        .map(|(term, (mut positions, weight_sum, tf))| {
            positions.sort_unstable();
            let entry = PostingEntry {
                document_id: doc_id.to_string(),
                term_frequency: tf,
                positions,
                importance: weight_sum / tf as f32,
            };
            (term, entry)
        })
        .collect()
}

/// Term -> postings plus document metadata. Posting lists are locked individually so that updates
/// contend per term; a striped per-document lock makes re-indexing one id exclusive.
pub struct InvertedIndex {
    config: IndexConfig,
    terms: RwLock<HashMap<String, Arc<RwLock<PostingList>>>>,
    table: RwLock<DocTable>,
    corrupted: RwLock<HashMap<String, CorruptTerm>>,
    doc_locks: Vec<Mutex<()>>,
    generation: AtomicU64,
    store: IndexStore,
}

impl InvertedIndex {
    /// Open (or create) a persistent index and rebuild its in-memory state.
    pub fn open<P: AsRef<Path>>(path: P, config: IndexConfig) -> Result<Self> {
        let store = IndexStore::open(path)?;
        Self::with_store(store, config)
    }

    /// An index backed by a temporary store that disappears on drop.
    pub fn in_memory(config: IndexConfig) -> Result<Self> {
        Self::with_store(IndexStore::temporary()?, config)
    }

    fn with_store(store: IndexStore, config: IndexConfig) -> Result<Self> {
        let loaded = store.load()?;
        let mut table = DocTable::default();
        for doc in loaded.documents {
            table.total_length += doc.token_count as u64;
            table.docs.insert(doc.id.clone(), doc);
        }
        let mut orphans = 0usize;
        let mut corrupted = loaded.corrupted;
        corrupted.retain(|term, bad| {
            bad.docs.retain(|id| table.docs.contains_key(id));
            if bad.docs.is_empty() {
                tracing::warn!(term = %term, "ignoring unreadable postings of removed documents");
                return false;
            }
            tracing::warn!(term = %term, reason = %bad.reason, docs = bad.docs.len(), "posting data unreadable; term isolated");
            true
        });
        for (term, doc_id) in &loaded.term_refs {
            if table.docs.contains_key(doc_id) {
                table.terms_of.entry(doc_id.clone()).or_default().push(term.clone());
            }
        }
        let mut terms = HashMap::with_capacity(loaded.postings.len());
        for (term, entries) in loaded.postings {
            let before = entries.len();
            let entries: Vec<_> = entries.into_iter().filter(|e| table.docs.contains_key(&e.document_id)).collect();
            orphans += before - entries.len();
            if !entries.is_empty() {
                terms.insert(term, Arc::new(RwLock::new(PostingList::from_entries(entries))));
            }
        }
        if orphans > 0 {
            tracing::warn!(orphans, "dropped postings without a document record");
        }
        tracing::info!(
            num_docs = table.docs.len(),
            num_terms = terms.len(),
            corrupted = corrupted.len(),
            path = ?store.root(),
            "opened inverted index"
        );
        Ok(Self {
            config,
            terms: RwLock::new(terms),
            table: RwLock::new(table),
            corrupted: RwLock::new(corrupted),
            doc_locks: (0..DOC_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            generation: AtomicU64::new(0),
            store,
        })
    }

    fn doc_lock(&self, doc_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        doc_id.hash(&mut hasher);
        &self.doc_locks[hasher.finish() as usize % DOC_LOCK_STRIPES]
    }

    pub fn index_document(&self, doc: Document, tokens: &[Token]) -> Result<()> {
        self.index_document_with_content(doc, tokens, None)
    }

    /// Insert or replace a document. Any postings from an earlier version of the same id are removed first.
    pub fn index_document_with_content(&self, mut doc: Document, tokens: &[Token], content: Option<&str>) -> Result<()> {
        let _guard = self.doc_lock(&doc.id).lock();
        doc.token_count = tokens.len();
        let fresh = build_postings(&doc.id, tokens);
        let stale = self.table.read().terms_of.get(&doc.id).cloned().unwrap_or_default();
        let content = if self.config.store_content { content } else { None };

        self.store.write_document(&doc, &stale, &fresh, content)?;

        {
            let mut table = self.table.write();
            if let Some(old) = table.docs.insert(doc.id.clone(), doc.clone()) {
                table.total_length -= old.token_count as u64;
            }
            table.total_length += doc.token_count as u64;
            table.terms_of.insert(doc.id.clone(), fresh.keys().cloned().collect());
        }
        for term in stale.iter().filter(|t| !fresh.contains_key(t.as_str())) {
            self.remove_posting(term, &doc.id);
        }
        let num_terms = fresh.len();
        for (term, entry) in fresh {
            self.upsert_posting(term, entry);
        }
        self.release_corrupted(&doc.id, &stale);
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(doc_id = %doc.id, tokens = doc.token_count, num_terms, "indexed document");
        Ok(())
    }

    pub fn remove_document(&self, doc_id: &str) -> Result<Document> {
        let _guard = self.doc_lock(doc_id).lock();
        let terms = {
            let table = self.table.read();
            if !table.docs.contains_key(doc_id) {
                return Err(SearchError::not_found(doc_id));
            }
            table.terms_of.get(doc_id).cloned().unwrap_or_default()
        };
        self.store.delete_document(doc_id, &terms)?;
        let removed = {
            let mut table = self.table.write();
            table.terms_of.remove(doc_id);
            let removed = table.docs.remove(doc_id).ok_or_else(|| SearchError::not_found(doc_id))?;
            table.total_length -= removed.token_count as u64;
            removed
        };
        for term in &terms {
            self.remove_posting(term, doc_id);
        }
        self.release_corrupted(doc_id, &terms);
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(doc_id = %doc_id, "removed document");
        Ok(removed)
    }

    /// The store write for `doc_id` replaced or deleted its keys for `terms`, so it no longer holds any
    /// unreadable posting. A term becomes readable again once no document does.
    fn release_corrupted(&self, doc_id: &str, terms: &[String]) {
        let mut corrupted = self.corrupted.write();
        if corrupted.is_empty() {
            return;
        }
        for term in terms {
            let Some(bad) = corrupted.get_mut(term) else { continue };
            bad.docs.remove(doc_id);
            if bad.docs.is_empty() {
                corrupted.remove(term);
                tracing::info!(term = %term, "corrupted term recovered");
            }
        }
    }

    fn upsert_posting(&self, term: String, entry: PostingEntry) {
        // The map read guard stays held while the list is written so an empty list cannot be unlinked under us.
        {
            let terms = self.terms.read();
            if let Some(list) = terms.get(&term) {
                list.write().upsert(entry);
                return;
            }
        }
        let mut terms = self.terms.write();
        terms.entry(term).or_default().write().upsert(entry);
    }

    fn remove_posting(&self, term: &str, doc_id: &str) {
        let now_empty = {
            let terms = self.terms.read();
            match terms.get(term) {
                Some(list) => {
                    let mut list = list.write();
                    list.remove(doc_id);
                    list.is_empty()
                }
                None => false,
            }
        };
        if now_empty {
            let mut terms = self.terms.write();
            if terms.get(term).is_some_and(|l| l.read().is_empty()) {
                terms.remove(term);
            }
        }
    }

    /// Snapshot of a term's postings. Unknown terms yield an empty list; corrupted terms an error.
    pub fn get_posting_list(&self, term: &str) -> Result<PostingList> {
        Ok(self.read_posting_list(term, |list| list.clone())?.unwrap_or_default())
    }

    /// Run `f` against a consistent view of a term's postings without copying them.
    pub fn read_posting_list<R>(&self, term: &str, f: impl FnOnce(&PostingList) -> R) -> Result<Option<R>> {
        if let Some(bad) = self.corrupted.read().get(term) {
            return Err(SearchError::corruption(term, &bad.reason));
        }
        let terms = self.terms.read();
        Ok(terms.get(term).map(|list| f(&*list.read())))
    }

    pub fn term_stats(&self, term: &str) -> Option<TermStats> {
        self.terms.read().get(term).map(|list| list.read().stats())
    }

    pub fn get_document(&self, doc_id: &str) -> Result<Document> {
        self.table.read().docs.get(doc_id).cloned().ok_or_else(|| SearchError::not_found(doc_id))
    }

    pub fn contains_document(&self, doc_id: &str) -> bool { self.table.read().docs.contains_key(doc_id) }

    pub fn document_length(&self, doc_id: &str) -> Option<usize> {
        self.table.read().docs.get(doc_id).map(|d| d.token_count)
    }

    /// Token counts for the given ids, read under one lock. Missing ids are omitted.
    pub fn document_lengths<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> HashMap<DocId, usize> {
        let table = self.table.read();
        ids.into_iter().filter_map(|id| table.docs.get(id).map(|d| (id.to_string(), d.token_count))).collect()
    }

    pub fn document_content(&self, doc_id: &str) -> Result<Option<String>> {
        if !self.contains_document(doc_id) {
            return Err(SearchError::not_found(doc_id));
        }
        self.store.load_content(doc_id)
    }

    pub fn total_documents(&self) -> usize { self.table.read().docs.len() }

    /// Mean token count over current documents, or the configured default when the index is empty.
    pub fn average_document_length(&self) -> f32 {
        let table = self.table.read();
        if table.docs.is_empty() {
            return self.config.default_average_length;
        }
        table.total_length as f32 / table.docs.len() as f32
    }

    /// Incremented on every mutation; callers use it to invalidate derived caches.
    pub fn generation(&self) -> u64 { self.generation.load(Ordering::SeqCst) }

    pub fn is_corrupted(&self, term: &str) -> bool { self.corrupted.read().contains_key(term) }

    pub fn stats(&self) -> IndexStats {
        let mut corrupted_terms: Vec<String> = self.corrupted.read().keys().cloned().collect();
        corrupted_terms.sort();
        IndexStats {
            total_documents: self.total_documents(),
            total_terms: self.terms.read().len(),
            average_document_length: self.average_document_length(),
            corrupted_terms,
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush(self.total_documents() as u64)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.terms.write().clear();
        *self.table.write() = DocTable::default();
        self.corrupted.write().clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("cleared inverted index");
        Ok(())
    }

    /// Distinct terms currently holding postings for `doc_id`.
    pub fn terms_of(&self, doc_id: &str) -> HashSet<String> {
        self.table.read().terms_of.get(doc_id).map(|t| t.iter().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;

    fn index_text(index: &InvertedIndex, path: &str, chunk: usize, text: &str) -> DocId {
        let tokens = Tokenizer::default().tokenize(text, None);
        let doc = Document::new(path, chunk, 1, 1, None);
        let id = doc.id.clone();
        index.index_document_with_content(doc, &tokens, Some(text)).unwrap();
        id
    }

    #[test]
    fn builds_postings_with_positions() {
        let index = InvertedIndex::in_memory(IndexConfig::default()).unwrap();
        let id = index_text(&index, "a.rs", 0, "load config then load cache");
        let list = index.get_posting_list("load").unwrap();
        let entry = list.get(&id).unwrap();
        assert_eq!(entry.term_frequency, 2);
        assert_eq!(entry.positions, vec![0, 3]);
        assert_eq!(index.term_stats("load"), Some(TermStats { document_frequency: 1, total_occurrences: 2 }));
        assert_eq!(index.get_document(&id).unwrap().token_count, 5);
    }

    #[test]
    fn reindexing_replaces_prior_postings() {
        let index = InvertedIndex::in_memory(IndexConfig::default()).unwrap();
        let id = index_text(&index, "a.rs", 0, "alpha beta beta");
        index_text(&index, "a.rs", 0, "beta gamma");
        assert!(index.get_posting_list("alpha").unwrap().is_empty());
        let beta = index.get_posting_list("beta").unwrap();
        assert_eq!(beta.get(&id).unwrap().positions, vec![0]);
        assert_eq!(beta.total_frequency(), 1);
        assert_eq!(index.total_documents(), 1);
        assert_eq!(index.average_document_length(), 2.0);
    }

    #[test]
    fn average_length_tracks_membership() {
        let index = InvertedIndex::in_memory(IndexConfig { default_average_length: 1.0, ..IndexConfig::default() }).unwrap();
        assert_eq!(index.average_document_length(), 1.0);
        let a = index_text(&index, "a.rs", 0, "one two three four");
        index_text(&index, "b.rs", 0, "five six");
        assert_eq!(index.average_document_length(), 3.0);
        index.remove_document(&a).unwrap();
        assert_eq!(index.average_document_length(), 2.0);
    }

    #[test]
    fn empty_document_is_accepted() {
        let index = InvertedIndex::in_memory(IndexConfig::default()).unwrap();
        let id = index_text(&index, "empty.rs", 0, "");
        assert_eq!(index.get_document(&id).unwrap().token_count, 0);
        assert_eq!(index.stats().total_terms, 0);
        assert_eq!(index.average_document_length(), 0.0);
    }

    #[test]
    fn remove_reports_missing_documents() {
        let index = InvertedIndex::in_memory(IndexConfig::default()).unwrap();
        let id = index_text(&index, "a.rs", 0, "alpha beta");
        index.remove_document(&id).unwrap();
        assert!(matches!(index.get_document(&id), Err(SearchError::DocumentNotFound { .. })));
        assert!(matches!(index.remove_document(&id), Err(SearchError::DocumentNotFound { .. })));
        assert!(index.get_posting_list("alpha").unwrap().is_empty());
        assert_eq!(index.stats().total_terms, 0);
    }

    #[test]
    fn content_is_stored_per_document() {
        let index = InvertedIndex::in_memory(IndexConfig::default()).unwrap();
        let id = index_text(&index, "a.rs", 2, "fn main() {}");
        assert_eq!(index.document_content(&id).unwrap().as_deref(), Some("fn main() {}"));
        let off = InvertedIndex::in_memory(IndexConfig { store_content: false, ..IndexConfig::default() }).unwrap();
        let id = index_text(&off, "a.rs", 2, "fn main() {}");
        assert_eq!(off.document_content(&id).unwrap(), None);
    }

    #[test]
    fn corrupted_term_is_isolated_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let index = InvertedIndex::open(dir.path(), IndexConfig::default()).unwrap();
            let id = index_text(&index, "a.rs", 0, "alpha beta");
            index.store.overwrite_posting_raw("alpha", &id, b"\xff\xff").unwrap();
            index.flush().unwrap();
            id
        };
        let index = InvertedIndex::open(dir.path(), IndexConfig::default()).unwrap();
        assert!(matches!(index.get_posting_list("alpha"), Err(SearchError::IndexCorruption { .. })));
        assert_eq!(index.get_posting_list("beta").unwrap().len(), 1);
        assert!(index.terms_of(&id).contains("alpha"));
        assert_eq!(index.stats().corrupted_terms, vec!["alpha".to_string()]);
    }

    #[test]
    fn corrupted_term_heals_after_owner_reindex() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = {
            let index = InvertedIndex::open(dir.path(), IndexConfig::default()).unwrap();
            let a = index_text(&index, "a.rs", 0, "alpha beta");
            let b = index_text(&index, "b.rs", 0, "alpha gamma");
            index.store.overwrite_posting_raw("alpha", &a, b"\xff\xff").unwrap();
            index.flush().unwrap();
            (a, b)
        };
        let index = InvertedIndex::open(dir.path(), IndexConfig::default()).unwrap();
        assert!(index.is_corrupted("alpha"));
        index_text(&index, "a.rs", 0, "alpha beta");
        let c = index_text(&index, "c.rs", 0, "alpha delta");

        let list = index.get_posting_list("alpha").unwrap();
        let ids: Vec<&str> = list.entries().iter().map(|e| e.document_id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str(), c.as_str()]);
        assert!(index.stats().corrupted_terms.is_empty());
    }

    #[test]
    fn corrupted_term_heals_only_when_every_bad_owner_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = {
            let index = InvertedIndex::open(dir.path(), IndexConfig::default()).unwrap();
            let a = index_text(&index, "a.rs", 0, "alpha");
            let b = index_text(&index, "b.rs", 0, "alpha");
            let c = index_text(&index, "c.rs", 0, "alpha");
            index.store.overwrite_posting_raw("alpha", &a, b"\xff").unwrap();
            index.store.overwrite_posting_raw("alpha", &b, b"\xff").unwrap();
            index.flush().unwrap();
            (a, b, c)
        };
        let index = InvertedIndex::open(dir.path(), IndexConfig::default()).unwrap();
        index.remove_document(&a).unwrap();
        assert!(matches!(index.get_posting_list("alpha"), Err(SearchError::IndexCorruption { .. })));
        index_text(&index, "b.rs", 0, "omega");
        let list = index.get_posting_list("alpha").unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.get(&c).is_some());
        assert!(list.get(&b).is_none());

        index.flush().unwrap();
        drop(index);
        let reopened = InvertedIndex::open(dir.path(), IndexConfig::default()).unwrap();
        assert!(!reopened.is_corrupted("alpha"));
        assert_eq!(reopened.get_posting_list("alpha").unwrap().len(), 1);
    }

    #[test]
    fn generation_advances_on_mutation() {
        let index = InvertedIndex::in_memory(IndexConfig::default()).unwrap();
        let g0 = index.generation();
        let id = index_text(&index, "a.rs", 0, "alpha");
        assert!(index.generation() > g0);
        let g1 = index.generation();
        index.remove_document(&id).unwrap();
        assert!(index.generation() > g1);
    }

    #[test]
    fn concurrent_indexing_of_distinct_documents() {
        let index = Arc::new(InvertedIndex::in_memory(IndexConfig::default()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for chunk in 0..10 {
                        index_text(&index, &format!("f{i}.rs"), chunk, "shared term plus unique");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(index.total_documents(), 80);
        assert_eq!(index.term_stats("shared").unwrap().document_frequency, 80);
    }
}
