use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use weave::{lexer, token::Token};

static INPUT: &str = include_str!("../../demos/big.weave");

fn lexer(input: &str, tokens: &mut Vec<Token>) {
    lexer::lex(input, tokens);
    let mut i = 0;
    for token in tokens.iter() {
        if token.kind.is_error() {
            continue;
        }
        i += 1;
    }
    black_box(i);
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut tokens = Vec::with_capacity(lexer::SUGGESTED_TOKENS_CAPACITY);

    c.bench_function("lexer", |b| {
        b.iter(|| {
            tokens.clear();
            lexer(black_box(INPUT), &mut tokens);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
