use coderank_core::config::TokenizerConfig;
use coderank_core::tokenizer::{TokenKind, Tokenizer};

#[test]
fn it_normalizes_and_stems_comments() {
    let tok = Tokenizer::default();
    let toks = tok.tokenize("// Running Runners RUN the ﬁle", Some("rust"));
    let words: Vec<String> = toks.into_iter().map(|t| t.text).collect();
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // NFKC folds the ligature
    assert!(words.contains(&"file".to_string()));
}

#[test]
fn it_filters_stopwords() {
    let tok = Tokenizer::default();
    let toks = tok.tokenize("The quick brown fox and the lazy dog", None);
    let words: Vec<String> = toks.into_iter().map(|t| t.text).collect();
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
    assert_eq!(words, vec!["quick", "brown", "fox", "lazy", "dog"]);
}

#[test]
fn it_splits_code_identifiers() {
    let tok = Tokenizer::default();
    let src = "class HttpClient:\n    def send_request(self, url):\n        return self.session.get(url)\n";
    let toks = tok.tokenize(src, Some("py"));
    let idents: Vec<&str> = toks.iter().filter(|t| t.kind == TokenKind::Identifier).map(|t| t.text.as_str()).collect();
    assert_eq!(&idents[..3], &["httpclient", "http", "client"]);
    assert!(idents.contains(&"send_request"));
    assert!(idents.contains(&"request"));
    let send = toks.iter().find(|t| t.text == "send_request").unwrap();
    assert_eq!(send.line_number, 2);
}

#[test]
fn it_drops_numbers_and_short_tokens() {
    let tok = Tokenizer::new(TokenizerConfig { min_term_length: 3, ..TokenizerConfig::default() });
    let toks = tok.tokenize("let xs = vec![1, 2, 300]; go(xs)", Some("rust"));
    let words: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(words, vec!["let", "vec"]);
}
