use std::{
    env,
    error::Error,
    fs,
    io::{self, Write},
};

use weave::{
    codegen::Generator,
    lexer, parser,
    token::Spanned,
    util::{
        fmt::{self, tree, Show},
        intern::Interner,
    },
};

fn main() {
    if let Err(error) = run() {
        println!("failed to run: {error}");
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    match env::args().nth(1) {
        Some(path) => compile(&path),
        None => repl(),
    }
}

/// Compiles the given file and writes the IR module to stdout.
fn compile(path: &str) -> Result<(), Box<dyn Error>> {
    let src = fs::read_to_string(path)?;
    let tokens = &mut Vec::with_capacity(lexer::SUGGESTED_TOKENS_CAPACITY);
    let interner = &mut Interner::with_capacity(1024);

    let program = match parser::parse_program(&src, tokens, interner) {
        Ok(program) => program,
        Err((_, errors)) => return Err(reject(&src, interner, &errors)),
    };
    let module = match Generator::new(interner).generate(&program) {
        Ok(module) => module,
        Err((_, errors)) => return Err(reject(&src, interner, &errors)),
    };
    print!("{module}");
    Ok(())
}

/// Reads one program per line, printing its tree and, when it is clean, the
/// lowered IR.
fn repl() -> Result<(), Box<dyn Error>> {
    let mut input = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        input.clear();
        let n = io::stdin().read_line(&mut input)?;
        if n == 0 {
            println!("^D");
            return Ok(());
        }

        let tokens = &mut Vec::with_capacity(256);
        let interner = &mut Interner::with_capacity(64);
        match parser::parse_program(&input, tokens, interner) {
            Ok(program) => {
                print!("{}", tree::print_program_string(interner, &program));
                match Generator::new(interner).generate(&program) {
                    Ok(module) => print!("{module}"),
                    Err((_, errors)) => print_errors(&input, interner, &errors),
                }
            }
            Err((program, errors)) => {
                print!("{}", tree::print_program_string(interner, &program));
                print_errors(&input, interner, &errors);
            }
        }
    }
}

fn print_errors<E>(src: &str, i: &Interner, errors: &[Spanned<E>])
where
    Spanned<E>: Show,
{
    let ctx = fmt::Context { ident_interner: i };
    for error in errors {
        let (line, column) = error.span.line_col(src);
        println!("error at {line}:{column}: {}", error.display(&ctx));
    }
}

fn reject<E>(src: &str, i: &Interner, errors: &[Spanned<E>]) -> Box<dyn Error>
where
    Spanned<E>: Show,
{
    print_errors(src, i, errors);
    format!("{} errors emitted", errors.len()).into()
}
