use crate::config::TokenizerConfig;
use crate::error::{Result, SearchError};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Comment,
    String,
    Operator,
}

impl TokenKind {
    /// Identifiers outrank keywords, which outrank prose in comments and literals.
    pub fn importance(self) -> f32 {
        match self {
            TokenKind::Identifier => 1.0,
            TokenKind::Keyword => 0.7,
            TokenKind::Comment | TokenKind::String => 0.5,
            TokenKind::Operator => 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    /// Ordinal among emitted tokens; n-gram tokens reuse the position of their first word.
    pub position: usize,
    /// 1-based line within the chunk.
    pub line_number: usize,
    pub importance_weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Shell,
    Generic,
}

impl Language {
    const ALL: [Language; 11] = [
        Language::Rust,
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Go,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::Ruby,
        Language::Shell,
        Language::Generic,
    ];

    /// Accepts language names as well as common file extensions.
    pub fn from_tag(tag: Option<&str>) -> Self {
        let Some(tag) = tag else { return Language::Generic };
        match tag.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "rust" | "rs" => Language::Rust,
            "python" | "py" => Language::Python,
            "javascript" | "js" | "jsx" | "mjs" => Language::JavaScript,
            "typescript" | "ts" | "tsx" => Language::TypeScript,
            "go" | "golang" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "c++" | "cc" | "cxx" | "hpp" => Language::Cpp,
            "ruby" | "rb" => Language::Ruby,
            "shell" | "sh" | "bash" | "zsh" => Language::Shell,
            _ => Language::Generic,
        }
    }

    fn hash_comments(self) -> bool {
        matches!(self, Language::Python | Language::Ruby | Language::Shell)
    }

    fn single_quote_strings(self) -> bool {
        matches!(
            self,
            Language::Python | Language::JavaScript | Language::TypeScript | Language::Ruby | Language::Shell | Language::Generic
        )
    }

    fn backtick_strings(self) -> bool {
        matches!(self, Language::JavaScript | Language::TypeScript | Language::Go | Language::Shell)
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Language::Rust => &[
                "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern", "false",
                "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
                "self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use", "where", "while",
            ],
            Language::Python => &[
                "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif", "else",
                "except", "false", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "none",
                "nonlocal", "not", "or", "pass", "raise", "return", "self", "true", "try", "while", "with", "yield",
            ],
            Language::JavaScript | Language::TypeScript => &[
                "async", "await", "break", "case", "catch", "class", "const", "continue", "default", "delete", "do",
                "else", "export", "extends", "false", "finally", "for", "function", "if", "import", "in", "instanceof",
                "interface", "let", "new", "null", "return", "super", "switch", "this", "throw", "true", "try", "type",
                "typeof", "undefined", "var", "void", "while", "yield",
            ],
            Language::Go => &[
                "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough", "for", "func",
                "go", "goto", "if", "import", "interface", "map", "nil", "package", "range", "return", "select",
                "struct", "switch", "type", "var",
            ],
            Language::Java => &[
                "abstract", "boolean", "break", "case", "catch", "class", "continue", "default", "do", "else", "enum",
                "extends", "false", "final", "finally", "for", "if", "implements", "import", "instanceof", "int",
                "interface", "new", "null", "package", "private", "protected", "public", "return", "static", "super",
                "switch", "this", "throw", "throws", "true", "try", "void", "while",
            ],
            Language::C | Language::Cpp => &[
                "auto", "bool", "break", "case", "char", "class", "const", "continue", "default", "delete", "do",
                "double", "else", "enum", "extern", "float", "for", "if", "include", "int", "long", "namespace", "new",
                "nullptr", "private", "public", "return", "short", "sizeof", "static", "struct", "switch", "template",
                "typedef", "unsigned", "void", "while",
            ],
            Language::Ruby => &[
                "begin", "class", "def", "do", "else", "elsif", "end", "ensure", "false", "if", "module", "nil",
                "rescue", "return", "self", "then", "true", "unless", "until", "when", "while", "yield",
            ],
            Language::Shell => &[
                "case", "do", "done", "elif", "else", "esac", "export", "fi", "for", "function", "if", "local", "then",
                "while",
            ],
            Language::Generic => &[
                "class", "const", "def", "else", "enum", "fn", "for", "func", "function", "if", "import", "let",
                "return", "struct", "while",
            ],
        }
    }

    fn lexer_pattern(self) -> String {
        let mut alts: Vec<&str> = Vec::new();
        if self == Language::Python {
            alts.push(r#"(?P<doc>"""(?s:.*?)(?:"""|\z)|'''(?s:.*?)(?:'''|\z))"#);
        }
        if self.hash_comments() {
            alts.push(r"(?P<line>#[^\n]*)");
        } else {
            alts.push(r"(?P<block>/\*(?s:.*?)(?:\*/|\z))");
            alts.push(r"(?P<line>//[^\n]*)");
            if self == Language::Generic {
                alts.push(r"(?P<hash>#[ \t][^\n]*)");
            }
        }
        alts.push(r#"(?P<dq>"(?:[^"\\\n]|\\.)*"?)"#);
        if self.single_quote_strings() {
            alts.push(r"(?P<sq>'(?:[^'\\\n]|\\.)*'?)");
        }
        if self.backtick_strings() {
            alts.push(r"(?P<bt>`[^`]*`?)");
        }
        alts.push(r"(?P<ident>[\p{L}_][\p{L}\p{N}_]*)");
        alts.push(r"(?P<num>\p{N}[\p{L}\p{N}_.]*)");
        alts.push(r"(?P<op>[-+*/%=!<>&|^~:?.]{2,})");
        alts.join("|")
    }
}

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref LEXERS: HashMap<Language, Regex> = Language::ALL
        .iter()
        .map(|lang| (*lang, Regex::new(&lang.lexer_pattern()).expect("valid lexer regex")))
        .collect();
    static ref KEYWORDS: HashMap<Language, HashSet<&'static str>> = Language::ALL
        .iter()
        .map(|lang| (*lang, lang.keywords().iter().copied().collect()))
        .collect();
}

/// English stem of a lowercase word.
pub fn stem(word: &str) -> String {
    STEMMER.stem(word).into_owned()
}

/// Split an identifier on snake_case, camelCase and acronym boundaries, lowercasing each part.
/// `HTTPServer_config2Value` yields `http`, `server`, `config2`, `value`.
pub fn split_identifier(ident: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for segment in ident.split(|c: char| c == '_' || c == '-') {
        let chars: Vec<char> = segment.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if i > 0 && c.is_uppercase() {
                let prev = chars[i - 1];
                let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_lower) {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current).to_lowercase());
                    }
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

struct Emitter<'a> {
    config: &'a TokenizerConfig,
    line_starts: Vec<usize>,
    tokens: Vec<Token>,
    // Marks tokens that are a whole multi-part identifier; n-grams only chain atomic words.
    composite: Vec<bool>,
}

impl<'a> Emitter<'a> {
    fn new(config: &'a TokenizerConfig, text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { config, line_starts, tokens: Vec::new(), composite: Vec::new() }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    fn accepts(&self, term: &str) -> bool {
        let len = term.chars().count();
        len >= self.config.min_term_length && len <= self.config.max_term_length && !self.config.stop_words.contains(term)
    }

    fn push(&mut self, text: String, kind: TokenKind, offset: usize, composite: bool) {
        if !self.accepts(&text) {
            return;
        }
        let position = self.tokens.len();
        let line_number = self.line_of(offset);
        self.tokens.push(Token { text, kind, position, line_number, importance_weight: kind.importance() });
        self.composite.push(composite);
    }

    /// Emit a word and, when it decomposes, its parts. Stemming is applied only to prose kinds.
    fn push_word(&mut self, word: &str, kind: TokenKind, offset: usize) {
        let stem_it = kind == TokenKind::Comment && self.config.enable_stemming;
        let finish = |w: String| if stem_it { stem(&w) } else { w };
        let parts = split_identifier(word);
        if parts.len() > 1 {
            self.push(finish(word.to_lowercase()), kind, offset, true);
            for part in parts {
                self.push(finish(part), kind, offset, false);
            }
        } else {
            self.push(finish(word.to_lowercase()), kind, offset, false);
        }
    }

    fn push_prose(&mut self, text: &str, kind: TokenKind, base: usize) {
        for mat in WORD_RE.find_iter(text) {
            let word = mat.as_str().trim_end_matches('\'');
            self.push_word(word, kind, base + mat.start());
        }
    }

    fn push_ngrams(&mut self) {
        let max = self.config.max_ngram_size;
        let base_len = self.tokens.len();
        let mut grams = Vec::new();
        for end in 0..base_len {
            for size in 2..=max {
                if size > end + 1 {
                    break;
                }
                let start = end + 1 - size;
                let window = &self.tokens[start..=end];
                let atomic = self.composite[start..=end].iter().all(|c| !c);
                let chained = window.windows(2).all(|w| w[1].position == w[0].position + 1);
                if !atomic || !chained || window.iter().any(|t| t.kind != TokenKind::Identifier) {
                    continue;
                }
                let text = window.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join("_");
                let weight = window.iter().map(|t| t.importance_weight).fold(f32::INFINITY, f32::min) * 0.8;
                grams.push((end, Token {
                    text,
                    kind: TokenKind::Identifier,
                    position: window[0].position,
                    line_number: window[0].line_number,
                    importance_weight: weight,
                }));
            }
        }
        if grams.is_empty() {
            return;
        }
        let mut merged = Vec::with_capacity(base_len + grams.len());
        let mut grams = grams.into_iter().peekable();
        for (i, token) in std::mem::take(&mut self.tokens).into_iter().enumerate() {
            merged.push(token);
            while let Some((_, gram)) = grams.next_if(|(end, _)| *end == i) {
                if gram.text.chars().count() <= self.config.max_term_length {
                    merged.push(gram);
                }
            }
        }
        self.tokens = merged;
    }
}

/// Code-aware tokenizer. A pure function of its input and configuration.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    config: TokenizerConfig,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self { Self { config } }

    pub fn config(&self) -> &TokenizerConfig { &self.config }

    /// Tokenize chunk text. `language` is a language name or file extension; unknown tags lex as generic code.
    pub fn tokenize(&self, content: &str, language: Option<&str>) -> Vec<Token> {
        let lang = Language::from_tag(language);
        let normalized = content.nfkc().collect::<String>();
        let mut emitter = Emitter::new(&self.config, &normalized);
        let keywords = &KEYWORDS[&lang];
        for caps in LEXERS[&lang].captures_iter(&normalized) {
            lex_one(&caps, keywords, &mut emitter);
        }
        if self.config.enable_ngrams {
            emitter.push_ngrams();
        }
        emitter.tokens
    }

    /// Tokenize raw bytes, rejecting input that is not valid UTF-8.
    pub fn tokenize_bytes(&self, content: &[u8], language: Option<&str>) -> Result<Vec<Token>> {
        let text = std::str::from_utf8(content).map_err(|e| SearchError::MalformedInput {
            reason: format!("chunk is not valid UTF-8: {e}"),
        })?;
        Ok(self.tokenize(text, language))
    }

    /// Distinct query terms in first-seen order. Quotes are treated as separators, never as string literals.
    pub fn query_terms(&self, query: &str) -> Vec<String> {
        let cleaned: String = query.chars().map(|c| if matches!(c, '"' | '\'' | '`') { ' ' } else { c }).collect();
        let mut seen = HashSet::new();
        self.tokenize(&cleaned, None)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Operator)
            .map(|t| t.text)
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }
}

fn lex_one(caps: &Captures<'_>, keywords: &HashSet<&'static str>, emitter: &mut Emitter<'_>) {
    if let Some(m) = caps.name("doc").or_else(|| caps.name("block")).or_else(|| caps.name("line")).or_else(|| caps.name("hash")) {
        emitter.push_prose(m.as_str(), TokenKind::Comment, m.start());
    } else if let Some(m) = caps.name("dq").or_else(|| caps.name("sq")).or_else(|| caps.name("bt")) {
        emitter.push_prose(m.as_str(), TokenKind::String, m.start());
    } else if let Some(m) = caps.name("ident") {
        let lower = m.as_str().to_lowercase();
        if keywords.contains(lower.as_str()) {
            emitter.push(lower, TokenKind::Keyword, m.start(), false);
        } else {
            emitter.push_word(m.as_str(), TokenKind::Identifier, m.start());
        }
    } else if let Some(m) = caps.name("op") {
        emitter.push(m.as_str().to_string(), TokenKind::Operator, m.start(), false);
    }
}
