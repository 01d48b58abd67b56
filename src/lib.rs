/// The lexer takes the source input, mapping it into a sequence of tokens.
pub mod lexer;

/// The parser takes a sequence of tokens, mapping it into an AST.
pub mod parser;

/// The code generator takes an AST, mapping it into an IR module made of
/// basic-block functions.
pub mod codegen;

pub mod ast;
pub mod ir;
pub mod layout;
pub mod scope;
pub mod token;

pub mod util {
    pub mod fmt;
    pub mod intern;
    #[cfg(test)]
    pub(crate) mod test_utils;
}
