use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tempfile::TempDir;

use tokenstore::query::wildcard_match;
use tokenstore::segment::codec::{decode_group, encode_token_group};
use tokenstore::{IndexConfig, Posting, Token, TokenIndex, Tokenizer, WriteBuffer};

const WORDS: [&str; 12] = [
    "rust", "programming", "language", "memory", "safety", "threads", "segment", "index",
    "search", "token", "merge", "catalog",
];

struct BenchEnv {
    _tmp: TempDir,
    index: Arc<TokenIndex>,
}

fn make_text(id: usize) -> String {
    (0..40)
        .map(|i| WORDS[(id * 7 + i * 3) % WORDS.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_env(doc_count: usize) -> BenchEnv {
    let tmp = TempDir::new().unwrap();
    let index = Arc::new(TokenIndex::open(IndexConfig::new(tmp.path().join("Index"))).unwrap());
    let tokenizer = Tokenizer::default();
    {
        let buffer = WriteBuffer::new(index.clone());
        for id in 1..=doc_count {
            let tokens = tokenizer.tokenize(&make_text(id), id as u32);
            buffer
                .log_document(tokens.iter().map(|(term, token)| (term.as_str(), token)))
                .unwrap();
        }
        buffer.finish().unwrap();
    }
    BenchEnv { _tmp: tmp, index }
}

fn bench_search(c: &mut Criterion) {
    let counts = [1_000usize, 5_000];
    let envs: Vec<(usize, BenchEnv)> = counts.iter().map(|&n| (n, build_env(n))).collect();

    let mut group = c.benchmark_group("search");
    for (count, env) in envs.iter() {
        group.bench_with_input(BenchmarkId::new("phrase", count), env, |b, env| {
            b.iter(|| {
                let hits = env.index.search("rust memory", 1).unwrap().count();
                black_box(hits);
            });
        });
        group.bench_with_input(BenchmarkId::new("wildcard", count), env, |b, env| {
            b.iter(|| {
                let hits = env.index.search("se*ch token", 2).unwrap().count();
                black_box(hits);
            });
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let tokens: Vec<Token> = (1..=1_000u32)
        .map(|doc| {
            let postings = (0..20).map(|p| Posting::new(p * 3, p * 17, 6)).collect();
            Token::new(doc, postings)
        })
        .collect();
    let block = encode_token_group(&tokens);

    c.bench_function("encode_group_1000", |b| {
        b.iter(|| black_box(encode_token_group(&tokens)))
    });
    c.bench_function("decode_group_1000", |b| {
        b.iter(|| black_box(decode_group(&block).count()))
    });
}

fn bench_tokenize_and_match(c: &mut Criterion) {
    let tokenizer = Tokenizer::default();
    let text = make_text(3).repeat(25);
    c.bench_function("tokenize_1000_words", |b| {
        b.iter(|| black_box(tokenizer.tokenize(&text, 1)))
    });
    c.bench_function("wildcard_match", |b| {
        b.iter(|| black_box(wildcard_match("pro*ing", "programming")))
    });
}

criterion_group!(benches, bench_search, bench_codec, bench_tokenize_and_match);
criterion_main!(benches);
