use std::{fmt, ops::Range};

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    lo: usize,
    len: u32,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Token {
        Token {
            kind,
            len: span.len,
            lo: span.lo,
        }
    }

    /// Returns the end-of-stream token for the provided source.
    pub fn eof_for(src: &str) -> Token {
        Token::new(TokenKind::Eof, Span::new_of_length(src.len(), 0))
    }

    pub fn span(&self) -> Span {
        Span {
            len: self.len,
            lo: self.lo,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?}, {})", self.kind, self.span())
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Span {
    pub len: u32,
    pub lo: usize,
}

impl Span {
    pub fn new_of_bounds(Range { start: lo, end: hi }: Range<usize>) -> Span {
        debug_assert!(hi >= lo);
        Self::new_of_length(lo, u32::try_from(hi - lo).unwrap())
    }

    pub fn new_of_length(lo: usize, len: u32) -> Span {
        Span { len, lo }
    }

    /// Returns a span covering from the start of `self` to the end of `hi`.
    pub fn to(self, hi: Span) -> Span {
        let end = hi.lo + hi.len as usize;
        Span::new_of_bounds(self.lo..end.max(self.lo))
    }

    /// Shrinks the span by the given amounts at each end. Used to strip
    /// string quotes and sigil prefixes.
    pub fn offset(self, lo: i64, hi: i64) -> Span {
        let new_lo = usize::try_from(i64::try_from(self.lo).unwrap() + lo).unwrap();
        let new_hi =
            usize::try_from(i64::try_from(self.lo + self.len as usize).unwrap() + hi).unwrap();
        Span::new_of_bounds(new_lo..new_hi)
    }

    pub fn substr(self, src: &str) -> &str {
        &src[self.lo..self.lo + self.len as usize]
    }

    /// Computes the 1-based line and column of the span start. Only used when
    /// formatting diagnostics, so the linear scan is acceptable.
    pub fn line_col(self, src: &str) -> (u32, u32) {
        let mut line = 1;
        let mut col = 1;
        for c in src[..self.lo.min(src.len())].chars() {
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    /// Wraps a value, attaching this span to it.
    pub fn wrap<T>(self, inner: T) -> Spanned<T> {
        Spanned { span: self, inner }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({self}, len: {})", self.len)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lo = self.lo;
        let hi = lo + self.len as usize;
        write!(f, "{lo}..{hi}")
    }
}

/// A value paired with the source span it originated from. Diagnostics are
/// `Spanned<Error>`s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub inner: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Declaration keywords
    Let,
    Const,
    Fn,
    Class,
    Struct,
    Interface,
    Style,

    // Control-flow keywords
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Return,

    // Class, style and compatibility keywords
    Extends,
    Implements,
    New,
    Public,
    Private,
    Protected,
    Static,
    Virtual,
    Override,
    Abstract,
    Final,
    Apply,
    To,
    Set,
    Emit,
    Link,
    Open,
    Navigate,
    Block,

    True,
    False,
    Nil,

    /// `=`
    Assign,
    Question,
    Colon,
    /// `||`
    OrOr,
    /// `&&`
    AndAnd,
    /// `==`
    EqEq,
    /// `!=`
    BangEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Pipe,
    Caret,
    Amp,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    /// `**`
    StarStar,
    Bang,
    Tilde,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Identifier,
    Number,
    Str,
    /// A string containing at least one escape sequence. Kept apart from
    /// [`TokenKind::Str`] so unescaping is only paid where needed.
    EscapedStr,
    /// A sigil-prefixed special variable, e.g. `$title`. The name (sans
    /// sigil) is always a member of [`SPECIAL_VARS`].
    Special,
    /// A reserved-prefix command, e.g. `@page`. The lexer accepts any
    /// `@identifier`; the parser diagnoses names missing from
    /// [`COMMANDS`].
    Command,

    Whitespace,
    LineComment,
    BlockComment,
    Eof,

    ErrorUnexpectedChar,
    ErrorUnclosedString,
    ErrorUnclosedComment,
    ErrorUnescapedLineBreak,
    ErrorInvalidEscape,
    ErrorUnknownSpecial,
    ErrorMalformedNumber,
}

impl TokenKind {
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            TokenKind::ErrorUnexpectedChar
                | TokenKind::ErrorUnclosedString
                | TokenKind::ErrorUnclosedComment
                | TokenKind::ErrorUnescapedLineBreak
                | TokenKind::ErrorInvalidEscape
                | TokenKind::ErrorUnknownSpecial
                | TokenKind::ErrorMalformedNumber
        )
    }

    /// Whether a statement may start with this token. Used by the parser to
    /// find a statement boundary when synchronizing after an error.
    pub fn starts_stmt(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Let | Const
                | Fn
                | Class
                | Struct
                | Interface
                | Style
                | If
                | While
                | For
                | Break
                | Continue
                | Return
                | Set
                | Emit
                | Link
                | Open
                | Navigate
                | Block
                | Apply
                | Command
        )
    }
}

/// Keyword spellings, including the legacy two-character shorthands which
/// alias their canonical keyword (`st`/`set`, `em`/`emit`, ...).
pub static KEYWORDS: phf::Map<&'static str, TokenKind> = phf::phf_map! {
    "let" => TokenKind::Let,
    "const" => TokenKind::Const,
    "fn" => TokenKind::Fn,
    "class" => TokenKind::Class,
    "struct" => TokenKind::Struct,
    "interface" => TokenKind::Interface,
    "style" => TokenKind::Style,
    "if" => TokenKind::If,
    "else" => TokenKind::Else,
    "while" => TokenKind::While,
    "for" => TokenKind::For,
    "in" => TokenKind::In,
    "break" => TokenKind::Break,
    "continue" => TokenKind::Continue,
    "return" => TokenKind::Return,
    "extends" => TokenKind::Extends,
    "implements" => TokenKind::Implements,
    "new" => TokenKind::New,
    "public" => TokenKind::Public,
    "private" => TokenKind::Private,
    "protected" => TokenKind::Protected,
    "static" => TokenKind::Static,
    "virtual" => TokenKind::Virtual,
    "override" => TokenKind::Override,
    "abstract" => TokenKind::Abstract,
    "final" => TokenKind::Final,
    "apply" => TokenKind::Apply,
    "ap" => TokenKind::Apply,
    "to" => TokenKind::To,
    "set" => TokenKind::Set,
    "st" => TokenKind::Set,
    "emit" => TokenKind::Emit,
    "em" => TokenKind::Emit,
    "link" => TokenKind::Link,
    "ln" => TokenKind::Link,
    "open" => TokenKind::Open,
    "op" => TokenKind::Open,
    "navigate" => TokenKind::Navigate,
    "nv" => TokenKind::Navigate,
    "block" => TokenKind::Block,
    "bk" => TokenKind::Block,
    "true" => TokenKind::True,
    "false" => TokenKind::False,
    "nil" => TokenKind::Nil,
};

/// The fixed set of globally-known special variables, mapped to the default
/// value each is initialized with at module start.
pub static SPECIAL_VARS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "title" => "Untitled",
    "author" => "anonymous",
    "version" => "1.0",
    "theme" => "plain",
    "route" => "/",
};

/// The reserved-prefix commands the toolchain knows about.
pub static COMMANDS: phf::Set<&'static str> = phf::phf_set! {
    "page",
    "meta",
    "include",
    "charset",
    "redirect",
};
