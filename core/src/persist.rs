use crate::error::{Result, SearchError};
use crate::index::{DocId, Document, PostingEntry};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

const FORMAT_VERSION: u32 = 1;
const META_KEY: &[u8] = b"meta";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u64,
    pub created_at: String,
    pub updated_at: String,
    pub version: u32,
}

/// Unreadable postings of one term: the first decode failure and every document whose key is affected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorruptTerm {
    pub reason: String,
    pub docs: HashSet<DocId>,
}

/// Everything needed to rebuild the in-memory index. Unreadable posting values are reported per term.
#[derive(Debug, Default)]
pub struct LoadedIndex {
    pub documents: Vec<Document>,
    /// Decodable entries only, including those of corrupted terms.
    pub postings: HashMap<String, Vec<PostingEntry>>,
    pub corrupted: HashMap<String, CorruptTerm>,
    /// (term, doc) pairs present on disk, including those whose value failed to decode.
    pub term_refs: Vec<(String, DocId)>,
}

/// sled-backed storage. One key per (term, document) pair, so a write for one document never rewrites
/// another document's postings and a damaged value is confined to its term.
pub struct IndexStore {
    db: sled::Db,
    docs: Tree,
    postings: Tree,
    texts: Tree,
    meta: Tree,
    root: Option<PathBuf>,
}

impl LoadedIndex {
    fn mark_corrupted(&mut self, term: String, doc_id: DocId, reason: String) {
        self.corrupted.entry(term).or_insert_with(|| CorruptTerm { reason, docs: HashSet::new() }).docs.insert(doc_id);
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

pub(crate) fn posting_key(term: &str, doc_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + doc_id.len() + 1);
    key.extend_from_slice(term.as_bytes());
    key.push(0);
    key.extend_from_slice(doc_id.as_bytes());
    key
}

fn split_posting_key(key: &[u8]) -> Option<(String, DocId)> {
    let sep = key.iter().position(|b| *b == 0)?;
    let term = std::str::from_utf8(&key[..sep]).ok()?;
    let doc_id = std::str::from_utf8(&key[sep + 1..]).ok()?;
    Some((term.to_string(), doc_id.to_string()))
}

fn transaction_error(err: TransactionError<()>) -> SearchError {
    match err {
        TransactionError::Storage(e) => SearchError::StorageIo(e),
        TransactionError::Abort(()) => SearchError::StorageIo(sled::Error::Unsupported("index transaction aborted".into())),
    }
}

impl IndexStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| SearchError::StorageIo(sled::Error::Io(e)))?;
        let db = sled::open(&root)?;
        Self::from_db(db, Some(root))
    }

    /// A store backed by a temporary sled database, removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, None)
    }

    fn from_db(db: sled::Db, root: Option<PathBuf>) -> Result<Self> {
        let store = Self {
            docs: db.open_tree("docs")?,
            postings: db.open_tree("postings")?,
            texts: db.open_tree("texts")?,
            meta: db.open_tree("meta")?,
            db,
            root,
        };
        if store.meta.get(META_KEY)?.is_none() {
            let now = now_rfc3339();
            store.save_meta(&MetaFile { num_docs: 0, created_at: now.clone(), updated_at: now, version: FORMAT_VERSION })?;
        }
        Ok(store)
    }

    pub fn root(&self) -> Option<&Path> { self.root.as_deref() }

    /// Replace one document's records atomically: its metadata, content, and every posting it owns.
    pub fn write_document(
        &self,
        doc: &Document,
        stale_terms: &[String],
        fresh: &BTreeMap<String, PostingEntry>,
        content: Option<&str>,
    ) -> Result<()> {
        let doc_bytes = bincode::serialize(doc)?;
        let mut encoded = Vec::with_capacity(fresh.len());
        for (term, entry) in fresh {
            encoded.push((posting_key(term, &doc.id), bincode::serialize(entry)?));
        }
        let stale: Vec<Vec<u8>> = stale_terms
            .iter()
            .filter(|t| !fresh.contains_key(t.as_str()))
            .map(|t| posting_key(t, &doc.id))
            .collect();

        (&self.docs, &self.postings, &self.texts)
            .transaction(|(docs, postings, texts)| {
                for key in &stale {
                    postings.remove(key.as_slice())?;
                }
                for (key, value) in &encoded {
                    postings.insert(key.as_slice(), value.as_slice())?;
                }
                docs.insert(doc.id.as_bytes(), doc_bytes.as_slice())?;
                match content {
                    Some(text) => texts.insert(doc.id.as_bytes(), text.as_bytes())?,
                    None => texts.remove(doc.id.as_bytes())?,
                };
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)
    }

    pub fn delete_document(&self, doc_id: &str, terms: &[String]) -> Result<()> {
        let keys: Vec<Vec<u8>> = terms.iter().map(|t| posting_key(t, doc_id)).collect();
        (&self.docs, &self.postings, &self.texts)
            .transaction(|(docs, postings, texts)| {
                for key in &keys {
                    postings.remove(key.as_slice())?;
                }
                docs.remove(doc_id.as_bytes())?;
                texts.remove(doc_id.as_bytes())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)
    }

    pub fn load_content(&self, doc_id: &str) -> Result<Option<String>> {
        Ok(self.texts.get(doc_id.as_bytes())?.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    pub fn load(&self) -> Result<LoadedIndex> {
        let mut loaded = LoadedIndex::default();
        for item in self.docs.iter() {
            let (key, value) = item?;
            match bincode::deserialize::<Document>(&value) {
                Ok(doc) => loaded.documents.push(doc),
                Err(e) => tracing::warn!(doc_id = %String::from_utf8_lossy(&key), error = %e, "skipping unreadable document record"),
            }
        }
        for item in self.postings.iter() {
            let (key, value) = item?;
            let Some((term, doc_id)) = split_posting_key(&key) else {
                tracing::warn!(key = ?key, "skipping malformed posting key");
                continue;
            };
            loaded.term_refs.push((term.clone(), doc_id.clone()));
            match bincode::deserialize::<PostingEntry>(&value) {
                Ok(entry) if entry.document_id == doc_id => loaded.postings.entry(term).or_default().push(entry),
                Ok(entry) => {
                    let reason = format!("entry for `{}` stored under key for `{doc_id}`", entry.document_id);
                    loaded.mark_corrupted(term, doc_id, reason);
                }
                Err(e) => loaded.mark_corrupted(term, doc_id, e.to_string()),
            }
        }
        Ok(loaded)
    }

    pub fn save_meta(&self, meta: &MetaFile) -> Result<()> {
        let json = serde_json::to_vec_pretty(meta).map_err(|e| SearchError::corruption("<meta>", e))?;
        self.meta.insert(META_KEY, json)?;
        Ok(())
    }

    pub fn load_meta(&self) -> Result<MetaFile> {
        let bytes = self.meta.get(META_KEY)?.ok_or_else(|| SearchError::corruption("<meta>", "missing meta record"))?;
        serde_json::from_slice(&bytes).map_err(|e| SearchError::corruption("<meta>", e))
    }

    pub fn flush(&self, num_docs: u64) -> Result<()> {
        let mut meta = self.load_meta()?;
        meta.num_docs = num_docs;
        meta.updated_at = now_rfc3339();
        self.save_meta(&meta)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.docs.clear()?;
        self.postings.clear()?;
        self.texts.clear()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn overwrite_posting_raw(&self, term: &str, doc_id: &str, bytes: &[u8]) -> Result<()> {
        self.postings.insert(posting_key(term, doc_id), bytes)?;
        Ok(())
    }
}
