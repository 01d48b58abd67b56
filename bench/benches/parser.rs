use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use weave::{
    lexer::SUGGESTED_TOKENS_CAPACITY, parser::parse_program, token::Token, util::intern::Interner,
};

static INPUT: &str = include_str!("../../demos/big.weave");

fn parser(input: &str, tokens: &mut Vec<Token>, interner: &mut Interner) {
    let program = parse_program(input, tokens, interner).unwrap();
    _ = black_box(program);
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut tokens = Vec::with_capacity(SUGGESTED_TOKENS_CAPACITY * 2);
    let mut interner = Interner::with_capacity(1024);

    c.bench_function("parser", |b| {
        b.iter(|| {
            tokens.clear();
            interner.clear();
            black_box(parser(black_box(INPUT), &mut tokens, &mut interner));
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
