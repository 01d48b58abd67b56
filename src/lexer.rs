use std::iter::Peekable;

use crate::token::{Span, Token, TokenKind, KEYWORDS, SPECIAL_VARS};

pub const SUGGESTED_TOKENS_CAPACITY: usize = 8_192;

/// Lexes the provided string, producing the tokens into the provided buffer.
pub fn lex(src: &str, tokens: &mut Vec<Token>) {
    Lexer::new(src, tokens).lex();
}

/// A convenience function that allocates a new buffer per lexed input and
/// returns it.
pub fn lex_in_new(src: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(SUGGESTED_TOKENS_CAPACITY);
    lex(src, &mut tokens);
    tokens
}

/// The Weave lexer
struct Lexer<'src, 'tok> {
    src: &'src str,
    iter: Peekable<std::str::Chars<'src>>,
    cursor: usize,
    current_lo: usize,
    tokens: &'tok mut Vec<Token>,
}

impl Lexer<'_, '_> {
    /// Scans the source string until the input is exhausted.
    ///
    /// Tokens are written into the provided tokens buffer.
    fn lex(mut self) {
        assert_eq!(self.tokens.len(), 0, "must pass clean tokens buffer");
        loop {
            let next = self.scan_token_kind();
            let is_eof = matches!(next, TokenKind::Eof);
            self.produce(next);
            if is_eof {
                break;
            }
        }
    }

    /// Tries to scan the current character.
    fn scan_token_kind(&mut self) -> TokenKind {
        use TokenKind::*;
        match self.mark_advance() {
            '\0' => Eof,
            '+' => Plus,
            '-' => Minus,
            '*' => match self.peek() {
                '*' => self.advance_with(StarStar),
                _ => Star,
            },
            '/' => match self.peek() {
                '/' => self.line_comment(),
                '*' => self.block_comment(),
                _ => Slash,
            },
            '%' => Percent,
            '~' => Tilde,
            '^' => Caret,
            '?' => Question,
            '!' => match self.peek() {
                '=' => self.advance_with(BangEq),
                _ => Bang,
            },
            '=' => match self.peek() {
                '=' => self.advance_with(EqEq),
                _ => Assign,
            },
            '<' => match self.peek() {
                '=' => self.advance_with(LessEq),
                '<' => self.advance_with(Shl),
                _ => Less,
            },
            '>' => match self.peek() {
                '=' => self.advance_with(GreaterEq),
                '>' => self.advance_with(Shr),
                _ => Greater,
            },
            '&' => match self.peek() {
                '&' => self.advance_with(AndAnd),
                _ => Amp,
            },
            '|' => match self.peek() {
                '|' => self.advance_with(OrOr),
                _ => Pipe,
            },
            ':' => Colon,
            ';' => Semicolon,
            ',' => Comma,
            '.' => Dot,
            '(' => LParen,
            ')' => RParen,
            '{' => LBrace,
            '}' => RBrace,
            '[' => LBracket,
            ']' => RBracket,
            quote @ ('"' | '\'') => self.string(quote),
            '$' => self.special(),
            '@' => self.command(),
            c if is_identifier_start(c) => self.identifier_or_keyword(),
            c if c.is_ascii_digit() => self.number(c),
            c if c.is_ascii_whitespace() => self.whitespace(),
            _ => ErrorUnexpectedChar,
        }
    }

    /// Tries to lex a string token. This is the most complicated token lexing
    /// routine since it has to detect character escape sequences, if any.
    ///
    /// Notice that the lexer doesn't escape the string while trying to lex the
    /// token itself. Instead, it only performs the escape *after* the entire
    /// token has been lexed (just before returning). This is an optimization to
    /// avoid the need of a growing buffer for all string tokens (which is
    /// necessary when performing escaping): we only pay the cost of escape when
    /// it's actually necessary.
    fn string(&mut self, quote: char) -> TokenKind {
        // Whether any escape sequence did appear inside this string token
        let mut has_escaped = false;
        // Whether the current character is being escaped
        let mut is_escaping = false;
        loop {
            let (current, current_span) = self.advance_with_span();
            match (is_escaping, current) {
                // A NUL char marks the unclosed string error, in any context.
                // Since there's nothing else to be done (the input has
                // exhausted), the scanner exits here with a single error
                // token.
                (_, '\0') => {
                    return TokenKind::ErrorUnclosedString;
                }
                // An unescaped closing quote marks the end of the string. The
                // other quote character is an ordinary string constituent.
                (false, c) if c == quote => {
                    return if has_escaped {
                        TokenKind::EscapedStr
                    } else {
                        TokenKind::Str
                    };
                }
                // A string can only contain a line break if it is escaped. In
                // this case, an error token is emitted. Notice that the lexer
                // keeps scanning the string.
                (false, '\n') => {
                    self.produce_spanned(TokenKind::ErrorUnescapedLineBreak, current_span);
                }
                // Mark a new escape context.
                (false, '\\') => {
                    has_escaped = true;
                    is_escaping = true;
                }
                // The escaped character. Unknown escape sequences produce an
                // error token, though the scan proceeds regardless.
                (true, c) => {
                    if !self.check_escape(c) {
                        self.produce_spanned(TokenKind::ErrorInvalidEscape, current_span);
                    }
                    is_escaping = false;
                }
                // For any other character, just advance.
                (false, _) => {}
            }
        }
    }

    /// Checks whether `c` is a valid escape introducer. For `\xNN` and
    /// `\uNNNN` only the presence of the hex digits is verified here; the
    /// digits themselves are scanned as ordinary string constituents.
    fn check_escape(&mut self, c: char) -> bool {
        match c {
            'n' | 't' | 'r' | '0' | 'b' | 'f' | 'v' | '\\' | '"' | '\'' | '\n' => true,
            'x' => self.upcoming_hex(2),
            'u' => self.upcoming_hex(4),
            _ => false,
        }
    }

    fn upcoming_hex(&self, count: usize) -> bool {
        let mut iter = self.iter.clone();
        (0..count).all(|_| iter.next().is_some_and(|c| c.is_ascii_hexdigit()))
    }

    fn identifier_or_keyword(&mut self) -> TokenKind {
        while is_identifier_suffix(self.peek()) {
            self.advance();
        }
        // Keywords (and their legacy shorthands) are case sensitive.
        match KEYWORDS.get(self.substr()).copied() {
            Some(keyword) => keyword,
            None => TokenKind::Identifier,
        }
    }

    fn number(&mut self, first: char) -> TokenKind {
        if first == '0' {
            match self.peek() {
                'x' | 'X' => return self.radix_number(16),
                'o' | 'O' => return self.radix_number(8),
                'b' | 'B' => return self.radix_number(2),
                _ => {}
            }
        }
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        // A fractional part must have digits on both sides of the dot, so
        // `1.x` lexes as a number followed by a member access.
        if self.peek() == '.' && self.peek2().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        // An exponent is only consumed when well formed; otherwise the `e` is
        // left for the next token.
        if matches!(self.peek(), 'e' | 'E') && self.exponent_follows() {
            self.advance();
            if matches!(self.peek(), '+' | '-') {
                self.advance();
            }
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        TokenKind::Number
    }

    fn exponent_follows(&self) -> bool {
        let mut iter = self.iter.clone();
        iter.next(); // the `e` itself
        match iter.next() {
            Some('+' | '-') => iter.next().is_some_and(|c| c.is_ascii_digit()),
            Some(c) => c.is_ascii_digit(),
            None => false,
        }
    }

    /// Scans the digits of a `0x`, `0o` or `0b` prefixed integer. The prefix
    /// with no digits after it is an error token.
    fn radix_number(&mut self, radix: u32) -> TokenKind {
        self.advance(); // the radix marker
        let mut digits = 0;
        while self.peek().is_digit(radix) {
            self.advance();
            digits += 1;
        }
        if digits == 0 {
            return TokenKind::ErrorMalformedNumber;
        }
        TokenKind::Number
    }

    /// Scans a `$name` special variable. Only the fixed set of known special
    /// names is accepted; anything else is an error token.
    fn special(&mut self) -> TokenKind {
        if !is_identifier_start(self.peek()) {
            return TokenKind::ErrorUnknownSpecial;
        }
        while is_identifier_suffix(self.peek()) {
            self.advance();
        }
        let name = &self.substr()[1..];
        if SPECIAL_VARS.contains_key(name) {
            TokenKind::Special
        } else {
            TokenKind::ErrorUnknownSpecial
        }
    }

    /// Scans an `@name` command token. Unknown command names are the parser's
    /// concern; any identifier shape is accepted here.
    fn command(&mut self) -> TokenKind {
        if !is_identifier_start(self.peek()) {
            return TokenKind::ErrorUnexpectedChar;
        }
        while is_identifier_suffix(self.peek()) {
            self.advance();
        }
        TokenKind::Command
    }

    fn whitespace(&mut self) -> TokenKind {
        while self.peek().is_ascii_whitespace() {
            self.advance();
        }
        TokenKind::Whitespace
    }

    fn line_comment(&mut self) -> TokenKind {
        assert_eq!(self.advance(), '/');
        while !matches!(self.peek(), '\n' | '\0') {
            self.advance();
        }
        TokenKind::LineComment
    }

    /// Scans a `/* ... */` comment. Such comments nest, so a depth count is
    /// kept and only the matching closer ends the token.
    fn block_comment(&mut self) -> TokenKind {
        assert_eq!(self.advance(), '*');
        let mut depth = 1_u32;
        loop {
            match self.advance() {
                '\0' => return TokenKind::ErrorUnclosedComment,
                '*' if self.peek() == '/' => {
                    self.advance();
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                '/' if self.peek() == '*' => {
                    self.advance();
                    depth += 1;
                }
                _ => continue, // keep scanning comment...
            }
        }
        TokenKind::BlockComment
    }
}

impl Lexer<'_, '_> {
    /// Constructs a new lexer with the default state.
    fn new<'src, 'tok>(src: &'src str, tokens: &'tok mut Vec<Token>) -> Lexer<'src, 'tok> {
        Lexer {
            src,
            iter: src.chars().peekable(),
            cursor: 0,
            current_lo: 0,
            tokens,
        }
    }

    /// Starts a new token "mark" and advances the iterator.
    fn mark_advance(&mut self) -> char {
        self.current_lo = self.cursor;
        self.advance()
    }

    /// Returns the next byte and advances the iterator.
    fn advance(&mut self) -> char {
        self.iter
            .next()
            .inspect(|c| self.cursor += c.len_utf8())
            .unwrap_or('\0')
    }

    /// Advances and returns the provided value.
    fn advance_with<T>(&mut self, value: T) -> T {
        self.advance();
        value
    }

    /// Returns the next byte (with its span) and advances the iterator.
    fn advance_with_span(&mut self) -> (char, Span) {
        let lo = self.cursor;
        let char = self.advance();
        let hi = lo + char.len_utf8();
        let span = Span::new_of_bounds(lo..hi);
        (char, span)
    }

    /// Returns the next character without advancing the iterator.
    fn peek(&mut self) -> char {
        self.iter.peek().copied().unwrap_or('\0')
    }

    /// Returns the character after the next one without advancing the
    /// iterator.
    fn peek2(&self) -> char {
        self.iter.clone().nth(1).unwrap_or('\0')
    }

    /// Returns the current span.
    fn span(&self) -> Span {
        Span::new_of_bounds(self.current_lo..self.cursor)
    }

    /// Returns the substring of the current marked bounds.
    fn substr(&self) -> &str {
        self.span().substr(self.src)
    }

    /// Produces a token using the marked bounds.
    fn produce(&mut self, kind: TokenKind) {
        self.produce_spanned(kind, self.span());
    }

    /// Produces a token with the provided span.
    fn produce_spanned(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token::new(kind, span));
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_suffix(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub mod extract {
    use super::*;

    /// Parses the numeric value of a number token. All numeric literals,
    /// including the radix-prefixed integer forms, evaluate to an `f64`.
    ///
    /// Returns `None` when a radix form doesn't fit an `u64`.
    pub fn number(token: Token, src: &str) -> Option<f64> {
        debug_assert_eq!(token.kind, TokenKind::Number);
        let s = token.span().substr(src);
        let in_radix = |radix: u32| u64::from_str_radix(&s[2..], radix).ok().map(|v| v as f64);
        match s.as_bytes() {
            [b'0', b'x' | b'X', ..] => in_radix(16),
            [b'0', b'o' | b'O', ..] => in_radix(8),
            [b'0', b'b' | b'B', ..] => in_radix(2),
            _ => s.parse().ok(),
        }
    }

    pub fn ident(token: Token, src: &str) -> &str {
        debug_assert_eq!(token.kind, TokenKind::Identifier);
        token.span().substr(src)
    }

    pub fn string(token: Token, src: &str) -> Box<str> {
        debug_assert_eq!(token.kind, TokenKind::Str);
        let s = token.span().offset(1, -1).substr(src);
        s.to_string().into_boxed_str()
    }

    pub fn escaped_string(token: Token, src: &str) -> Box<str> {
        debug_assert_eq!(token.kind, TokenKind::EscapedStr);
        let s = token.span().offset(1, -1).substr(src);
        perform_escape(s).into_boxed_str()
    }

    /// Returns the name of a special variable token, without the `$` sigil.
    pub fn special_name(token: Token, src: &str) -> &str {
        debug_assert_eq!(token.kind, TokenKind::Special);
        token.span().offset(1, 0).substr(src)
    }

    /// Returns the name of a command token, without the `@` sigil.
    pub fn command_name(token: Token, src: &str) -> &str {
        debug_assert_eq!(token.kind, TokenKind::Command);
        token.span().offset(1, 0).substr(src)
    }
}

/// Performs the escape of a string which is known to contain at least one
/// escape sequence.
///
/// Sequences the lexer has already flagged as invalid degrade here rather
/// than fail: an unknown escape keeps the escaped character and a malformed
/// `\xNN` is dropped.
fn perform_escape(raw: &str) -> String {
    let mut buf = String::with_capacity(raw.len());
    let mut iter = raw.chars();
    while let Some(char) = iter.next() {
        if char != '\\' {
            buf.push(char);
            continue;
        }
        match iter.next() {
            Some('b') => buf.push('\x08'), // backspace
            Some('t') => buf.push('\t'),   // tab
            Some('n') => buf.push('\n'),   // newline
            Some('v') => buf.push('\x0b'), // vertical tab
            Some('f') => buf.push('\x0c'), // form feed
            Some('r') => buf.push('\r'),   // carriage return
            Some('0') => buf.push('\0'),   // nul
            Some('x') => {
                let hi = iter.next().and_then(|c| c.to_digit(16));
                let lo = iter.next().and_then(|c| c.to_digit(16));
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    buf.push(char::from(u8::try_from(hi << 4 | lo).unwrap()));
                }
            }
            // Unicode escapes are passed through verbatim; decoding them is
            // the target runtime's business.
            Some('u') => buf.push_str("\\u"),
            Some(other) => buf.push(other),
            None => {}
        }
    }
    buf.shrink_to_fit();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tour_no_errors() {
        let input = include_str!("../demos/tour.weave");
        let has_errors = lex_in_new(input).into_iter().any(|t| t.kind.is_error());
        assert!(!has_errors);
    }

    #[test]
    fn test_extract_values() {
        let src = r#"0xFF 0b1010 1.5e2 "a\x41\u0041b""#;
        let tokens: Vec<_> = lex_in_new(src)
            .into_iter()
            .filter(|t| !t.kind.is_trivia() && !t.is_eof())
            .collect();
        assert_eq!(extract::number(tokens[0], src), Some(255.0));
        assert_eq!(extract::number(tokens[1], src), Some(10.0));
        assert_eq!(extract::number(tokens[2], src), Some(150.0));
        assert_eq!(extract::escaped_string(tokens[3], src), "aA\\u0041b".into());
    }

    #[test]
    fn tests_with_span() {
        use TokenKind::*;
        let cases = cases!(match .. {
            "+-*/%" => [
                (Plus, 0..1),
                (Minus, 1..2),
                (Star, 2..3),
                (Slash, 3..4),
                (Percent, 4..5),
                (Eof, 5..5),
            ],
            "** * << <= < = == != >> >= >" => [
                (StarStar, 0..2),
                (Whitespace, 2..3),
                (Star, 3..4),
                (Whitespace, 4..5),
                (Shl, 5..7),
                (Whitespace, 7..8),
                (LessEq, 8..10),
                (Whitespace, 10..11),
                (Less, 11..12),
                (Whitespace, 12..13),
                (Assign, 13..14),
                (Whitespace, 14..15),
                (EqEq, 15..17),
                (Whitespace, 17..18),
                (BangEq, 18..20),
                (Whitespace, 20..21),
                (Shr, 21..23),
                (Whitespace, 23..24),
                (GreaterEq, 24..26),
                (Whitespace, 26..27),
                (Greater, 27..28),
                (Eof, 28..28),
            ],
            "&& & || | ^ ~ !" => [
                (AndAnd, 0..2),
                (Whitespace, 2..3),
                (Amp, 3..4),
                (Whitespace, 4..5),
                (OrOr, 5..7),
                (Whitespace, 7..8),
                (Pipe, 8..9),
                (Whitespace, 9..10),
                (Caret, 10..11),
                (Whitespace, 11..12),
                (Tilde, 12..13),
                (Whitespace, 13..14),
                (Bang, 14..15),
                (Eof, 15..15),
            ],
            "set st Set emit em fn let" => [
                (Set, 0..3),
                (Whitespace, 3..4),
                (Set, 4..6),
                (Whitespace, 6..7),
                (Identifier, 7..10),
                (Whitespace, 10..11),
                (Emit, 11..15),
                (Whitespace, 15..16),
                (Emit, 16..18),
                (Whitespace, 18..19),
                (Fn, 19..21),
                (Whitespace, 21..22),
                (Let, 22..25),
                (Eof, 25..25),
            ],
            "1 1.5 2e10 1.5e-3 0xFF 0o17 0b1010" => [
                (Number, 0..1),
                (Whitespace, 1..2),
                (Number, 2..5),
                (Whitespace, 5..6),
                (Number, 6..10),
                (Whitespace, 10..11),
                (Number, 11..17),
                (Whitespace, 17..18),
                (Number, 18..22),
                (Whitespace, 22..23),
                (Number, 23..27),
                (Whitespace, 27..28),
                (Number, 28..34),
                (Eof, 34..34),
            ],
            "1.x 0x 0xG" => [
                (Number, 0..1),
                (Dot, 1..2),
                (Identifier, 2..3),
                (Whitespace, 3..4),
                (ErrorMalformedNumber, 4..6),
                (Whitespace, 6..7),
                (ErrorMalformedNumber, 7..9),
                (Identifier, 9..10),
                (Eof, 10..10),
            ],
            "/* a /* b */ c */ 1" => [
                (BlockComment, 0..17),
                (Whitespace, 17..18),
                (Number, 18..19),
                (Eof, 19..19),
            ],
            "// hey\n1 // eof" => [
                (LineComment, 0..6),
                (Whitespace, 6..7),
                (Number, 7..8),
                (Whitespace, 8..9),
                (LineComment, 9..15),
                (Eof, 15..15),
            ],
            "/* open /* deep */" => [
                //
                (ErrorUnclosedComment, 0..18),
                (Eof, 18..18),
            ],
            r#""hi" 'yo' "mix'd" 'q"t'"# => [
                (Str, 0..4),
                (Whitespace, 4..5),
                (Str, 5..9),
                (Whitespace, 9..10),
                (Str, 10..17),
                (Whitespace, 17..18),
                (Str, 18..23),
                (Eof, 23..23),
            ],
            r#""a\nb" "\x41" "\u0041" "a\qb""# => [
                (EscapedStr, 0..6),
                (Whitespace, 6..7),
                (EscapedStr, 7..13),
                (Whitespace, 13..14),
                (EscapedStr, 14..22),
                (Whitespace, 22..23),
                (ErrorInvalidEscape, 26..27),
                (EscapedStr, 23..29),
                (Eof, 29..29),
            ],
            "\"ab\ncd\" \"a\\\nb\" \"oi" => [
                (ErrorUnescapedLineBreak, 3..4),
                (Str, 0..7),
                (Whitespace, 7..8),
                (EscapedStr, 8..14),
                (Whitespace, 14..15),
                (ErrorUnclosedString, 15..18),
                (Eof, 18..18),
            ],
            "$title $nope $ @page @wat @" => [
                (Special, 0..6),
                (Whitespace, 6..7),
                (ErrorUnknownSpecial, 7..12),
                (Whitespace, 12..13),
                (ErrorUnknownSpecial, 13..14),
                (Whitespace, 14..15),
                (Command, 15..20),
                (Whitespace, 20..21),
                (Command, 21..25),
                (Whitespace, 25..26),
                (ErrorUnexpectedChar, 26..27),
                (Eof, 27..27),
            ],
            "(){}[],;:.? a?b:c" => [
                (LParen, 0..1),
                (RParen, 1..2),
                (LBrace, 2..3),
                (RBrace, 3..4),
                (LBracket, 4..5),
                (RBracket, 5..6),
                (Comma, 6..7),
                (Semicolon, 7..8),
                (Colon, 8..9),
                (Dot, 9..10),
                (Question, 10..11),
                (Whitespace, 11..12),
                (Identifier, 12..13),
                (Question, 13..14),
                (Identifier, 14..15),
                (Colon, 15..16),
                (Identifier, 16..17),
                (Eof, 17..17),
            ],
        });

        for (input, tokens) in cases {
            let lexed = lex_in_new(input);
            assert_eq!(lexed, tokens.as_slice());
        }
    }

    macro_rules! cases {
        (match .. {
            $($str:expr => [$(($kind:expr, $range:expr)),* $(,)?]),* $(,)?
        }) => {{
            &[$((
                $str,
                vec![
                    $(Token::new($kind, Span::new_of_bounds($range.start..$range.end))),*
                ],
            )),*]
        }};
    }
    use cases;
}
