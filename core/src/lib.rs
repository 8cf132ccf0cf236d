//! Statistical relevance and multi-signal fusion for code search.

pub mod bm25;
pub mod cache;
pub mod config;
pub mod error;
pub mod expand;
pub mod fusion;
pub mod index;
pub mod persist;
pub mod phrase;
pub mod statistical;
pub mod tokenizer;

pub use bm25::{Bm25Engine, Bm25Match, WeightedTerm};
pub use config::{FusionConfig, FusionMode, SearchConfig};
pub use error::{Result, SearchError};
pub use expand::QueryExpander;
pub use fusion::{ExactMatch, FusedResult, FusionEngine, MatchType, SemanticMatch, SignalKind, StatisticalMatch, SymbolMatch};
pub use index::{DocId, Document, InvertedIndex, PostingEntry, PostingList, TermStats};
pub use phrase::{Phrase, PhraseMatch};
pub use statistical::StatisticalEngine;
pub use tokenizer::{Token, TokenKind, Tokenizer};
