use coderank_core::tokenizer::Tokenizer;
use criterion::{criterion_group, criterion_main, Criterion};

const SOURCE: &str = r#"
/// Loads the configuration file and merges environment overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?; // read whole file
    let mut cfg: Config = toml::from_str(&raw).map_err(ConfigError::Parse)?;
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        cfg.logging.level = level;
    }
    Ok(cfg)
}
"#;

fn bench_tokenize(c: &mut Criterion) {
    let tok = Tokenizer::default();
    let text = SOURCE.repeat(50);
    c.bench_function("tokenize_rust_source", |b| b.iter(|| tok.tokenize(&text, Some("rust"))));
    c.bench_function("query_terms", |b| b.iter(|| tok.query_terms("\"load config\" parseJsonError handler")));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
