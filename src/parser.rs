use crate::{
    ast::{
        Access, BinaryOperator, Binding, Class, Expr, ExprKind, Field, Function, Ident, Member,
        Modifiers, Program, SetTarget, Signature, Stmt, StmtKind, StyleProperty, StyleRule,
        UnaryOperator,
    },
    lexer::{self, extract},
    token::{Span, Spanned, Token, TokenKind, COMMANDS},
    util::intern::Interner,
};

type Result<T, E = ()> = std::result::Result<T, E>;

pub type ParseResult<T> = Result<T, (T, Vec<Spanned<Error>>)>;

pub fn parse_program(
    src: &str,
    tokens: &mut Vec<Token>,
    ident_interner: &mut Interner,
) -> ParseResult<Program> {
    parse(
        src,
        tokens,
        ident_interner,
        Parser::parse_program,
        Program::default,
    )
}

pub fn parse_expr(
    src: &str,
    tokens: &mut Vec<Token>,
    ident_interner: &mut Interner,
) -> ParseResult<Expr> {
    let default = || Expr::dummy(Span::new_of_length(src.len(), 0));
    parse(src, tokens, ident_interner, Parser::parse_expr, default)
}

fn parse<'src, 'tok, 'ident, T>(
    src: &'src str,
    tokens: &'tok mut Vec<Token>,
    ident_interner: &'ident mut Interner,
    f: impl for<'a> FnOnce(&'a mut Parser<'src, 'tok, 'ident>) -> Result<T>,
    default: impl FnOnce() -> T,
) -> ParseResult<T> {
    assert!(tokens.is_empty());

    // Lex and parse
    lexer::lex(src, tokens);
    let mut p = Parser::new(src, tokens, ident_interner);
    let parse_result = f(&mut p);

    // Error handling
    let success = parse_result.is_ok();
    let el = parse_result.unwrap_or_else(|()| default());
    if p.errors.is_empty() {
        assert!(success);
        Ok(el)
    } else {
        Err((el, p.errors))
    }
}

struct Parser<'src, 'tok, 'ident> {
    src: &'src str,
    tokens: &'tok mut Vec<Token>,
    ident_interner: &'ident mut Interner,
    cursor: usize,
    errors: Vec<Spanned<Error>>,
}

impl Parser<'_, '_, '_> {
    fn parse_program(&mut self) -> Result<Program> {
        let mut stmts = Vec::with_capacity(16);
        while self.except([]) {
            if let Ok(parsed) = self.synchronize(&[TokenKind::Semicolon], &[], Parser::parse_decl) {
                stmts.push(parsed);
            }
        }
        self.consume(TokenKind::Eof)?;
        Ok(Program { stmts })
    }

    /// Parses a declaration, or falls through to [`Parser::parse_stmt`].
    /// Declarations are only allowed at the top level and directly inside
    /// braced blocks, not as unbraced control-flow bodies.
    fn parse_decl(&mut self) -> Result<Stmt> {
        match self.peek().kind {
            TokenKind::Let | TokenKind::Const => self.parse_var_decl(),
            TokenKind::Fn => self.parse_fn_decl(),
            TokenKind::Class => self.parse_class_decl(),
            TokenKind::Struct => self.parse_struct_decl(),
            TokenKind::Interface => self.parse_interface_decl(),
            TokenKind::Style => self.parse_style_decl(),
            _ => self.parse_stmt(),
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek().kind {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break => self.parse_terminal_stmt(TokenKind::Break, StmtKind::Break),
            TokenKind::Continue => {
                self.parse_terminal_stmt(TokenKind::Continue, StmtKind::Continue)
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Set => self.parse_set(),
            TokenKind::Emit => self.parse_emit(),
            TokenKind::Link => self.parse_link(),
            TokenKind::Open => self.parse_target_stmt(TokenKind::Open, StmtKind::Open),
            TokenKind::Navigate => self.parse_target_stmt(TokenKind::Navigate, StmtKind::Navigate),
            TokenKind::Block => self.parse_named_block(),
            TokenKind::Apply => self.parse_apply(),
            TokenKind::Command => self.parse_command(),
            TokenKind::LBrace => self.parse_block_stmt(),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt> {
        let start = self.consume_any(&[TokenKind::Let, TokenKind::Const])?;
        let constant = start.kind == TokenKind::Const;
        let name = self.parse_ident()?;
        let initializer = self.parse_initializer()?;
        if constant && initializer.is_none() {
            self.error(name.span.wrap(Error::ConstWithoutInitializer));
        }
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::VarDecl(Binding {
                name,
                constant,
                initializer,
            }),
            span: start.span().to(end.span()),
        })
    }

    fn parse_fn_decl(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Fn)?;
        let (function, end_span) = self.parse_fn_rest()?;
        Ok(Stmt {
            kind: StmtKind::FnDecl(function),
            span: start.span().to(end_span),
        })
    }

    /// Parses the remainder of a function declaration, after the `fn` keyword
    /// has already been consumed.
    fn parse_fn_rest(&mut self) -> Result<(Function, Span)> {
        let name = self.parse_ident()?;
        self.consume(TokenKind::LParen)?;
        let params =
            self.parse_list(TokenKind::RParen, TokenKind::Comma, None, Parser::parse_ident)?;
        self.consume(TokenKind::RParen)?;
        let (body, end) = self.parse_braced_body()?;
        Ok((Function { name, params, body }, end.span()))
    }

    fn parse_class_decl(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Class)?;
        let name = self.parse_ident()?;

        let extends = if self.take(TokenKind::Extends) {
            Some(self.parse_ident()?)
        } else {
            None
        };

        let implements = if self.take(TokenKind::Implements) {
            self.parse_list(
                TokenKind::LBrace,
                TokenKind::Comma,
                Some(Error::EmptyImplements),
                Parser::parse_ident,
            )?
        } else {
            Vec::new()
        };

        let (members, end) = self.parse_braced_list(Parser::parse_member)?;
        Ok(Stmt {
            kind: StmtKind::ClassDecl(Class {
                name,
                extends,
                implements,
                members,
            }),
            span: start.span().to(end.span()),
        })
    }

    fn parse_member(&mut self) -> Result<Member> {
        let access = match self.peek().kind {
            TokenKind::Public => self.advance_with(Access::Public),
            TokenKind::Private => self.advance_with(Access::Private),
            TokenKind::Protected => self.advance_with(Access::Protected),
            _ => Access::default(),
        };

        let mut modifiers = Modifiers::default();
        loop {
            match self.peek().kind {
                TokenKind::Static => modifiers.is_static = true,
                TokenKind::Virtual => modifiers.is_virtual = true,
                TokenKind::Override => modifiers.is_override = true,
                TokenKind::Abstract => modifiers.is_abstract = true,
                TokenKind::Final => modifiers.is_final = true,
                _ => break,
            }
            self.advance();
        }

        if self.take(TokenKind::Fn) {
            let (function, _) = self.parse_fn_rest()?;
            Ok(Member::Method {
                access,
                modifiers,
                function,
            })
        } else {
            let field = self.parse_field()?;
            Ok(Member::Field {
                access,
                modifiers,
                field,
            })
        }
    }

    /// Parses `ID [':' ID] ['=' expr] ';'`.
    fn parse_field(&mut self) -> Result<Field> {
        let name = self.parse_ident()?;
        let ty = if self.take(TokenKind::Colon) {
            Some(self.parse_ident()?)
        } else {
            None
        };
        let initializer = self.parse_initializer()?;
        self.consume(TokenKind::Semicolon)?;
        Ok(Field {
            name,
            ty,
            initializer,
        })
    }

    fn parse_struct_decl(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Struct)?;
        let name = self.parse_ident()?;
        let (fields, end) = self.parse_braced_list(Parser::parse_field)?;
        Ok(Stmt {
            kind: StmtKind::StructDecl { name, fields },
            span: start.span().to(end.span()),
        })
    }

    fn parse_interface_decl(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Interface)?;
        let name = self.parse_ident()?;
        let (methods, end) = self.parse_braced_list(Parser::parse_signature)?;
        Ok(Stmt {
            kind: StmtKind::InterfaceDecl { name, methods },
            span: start.span().to(end.span()),
        })
    }

    fn parse_signature(&mut self) -> Result<Signature> {
        self.consume(TokenKind::Fn)?;
        let name = self.parse_ident()?;
        self.consume(TokenKind::LParen)?;
        let params =
            self.parse_list(TokenKind::RParen, TokenKind::Comma, None, Parser::parse_ident)?;
        self.consume(TokenKind::RParen)?;
        self.consume(TokenKind::Semicolon)?;
        Ok(Signature { name, params })
    }

    fn parse_style_decl(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Style)?;
        let (rule, end) = self.parse_style_rule()?;
        Ok(Stmt {
            kind: StmtKind::StyleDecl(rule),
            span: start.span().to(end.span()),
        })
    }

    /// Parses `selectors '{' style-item* '}'`, returning the rule and the
    /// closing brace. The leading `style` keyword (if any) must have been
    /// consumed already; nested rules don't repeat it.
    fn parse_style_rule(&mut self) -> Result<(StyleRule, Token)> {
        let first = self.parse_selector()?;
        self.parse_style_rule_from(first)
    }

    fn parse_style_rule_from(&mut self, first: Ident) -> Result<(StyleRule, Token)> {
        let mut selectors = vec![first];
        while self.take(TokenKind::Comma) {
            selectors.push(self.parse_selector()?);
        }
        self.consume(TokenKind::LBrace)?;

        let mut properties = Vec::new();
        let mut children = Vec::new();
        while self.except([TokenKind::RBrace]) {
            let checkpoint = self.cursor;
            let parsed = self.synchronize(&[TokenKind::Semicolon], &[TokenKind::RBrace], |p| {
                p.parse_style_item(&mut properties, &mut children)
            });
            if parsed.is_err() && self.cursor == checkpoint {
                // Recovery stopped without consuming anything; skip the
                // offending token so the loop makes progress.
                self.advance();
            }
        }
        let end = self.consume(TokenKind::RBrace)?;

        let rule = StyleRule {
            selectors,
            properties,
            children,
        };
        Ok((rule, end))
    }

    /// Parses a single item in a style rule body: either a `name: value;`
    /// property or a nested rule. Both may start with an identifier, so the
    /// decision is made after it: a `:` means property, anything else is
    /// read as the start of a nested selector list.
    fn parse_style_item(
        &mut self,
        properties: &mut Vec<StyleProperty>,
        children: &mut Vec<StyleRule>,
    ) -> Result<()> {
        if self.is(TokenKind::Dot) {
            let first = self.parse_selector()?;
            let (child, _) = self.parse_style_rule_from(first)?;
            children.push(child);
            return Ok(());
        }

        let name = self.parse_ident()?;
        if self.take(TokenKind::Colon) {
            let value = self.parse_expr()?;
            self.consume(TokenKind::Semicolon)?;
            properties.push(StyleProperty { name, value });
        } else {
            let (child, _) = self.parse_style_rule_from(name)?;
            children.push(child);
        }
        Ok(())
    }

    /// Parses a style selector: an identifier, optionally prefixed with a
    /// dot. The prefix is kept as part of the interned selector name.
    fn parse_selector(&mut self) -> Result<Ident> {
        if self.is(TokenKind::Dot) {
            let dot = self.advance();
            let name_token = self.consume(TokenKind::Identifier)?;
            let text = format!(".{}", extract::ident(name_token, self.src));
            return Ok(Ident {
                name: self.ident_interner.intern(&text),
                span: dot.span().to(name_token.span()),
            });
        }
        self.parse_ident()
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::If)?;
        self.consume(TokenKind::LParen)?;
        let predicate = self.parse_expr()?;
        self.consume(TokenKind::RParen)?;
        let then_branch = Box::new(self.parse_stmt()?);

        let (else_branch, end_span) = if self.take(TokenKind::Else) {
            let else_stmt = self.parse_stmt()?;
            let span = else_stmt.span;
            (Some(Box::new(else_stmt)), span)
        } else {
            (None, then_branch.span)
        };

        Ok(Stmt {
            kind: StmtKind::If {
                predicate,
                then_branch,
                else_branch,
            },
            span: start.span().to(end_span),
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::While)?;
        self.consume(TokenKind::LParen)?;
        let predicate = self.parse_expr()?;
        self.consume(TokenKind::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        let span = start.span().to(body.span);
        Ok(Stmt {
            kind: StmtKind::While { predicate, body },
            span,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::For)?;
        if self.is(TokenKind::LParen) {
            self.parse_c_style_for(start)
        } else {
            self.parse_for_in(start)
        }
    }

    fn parse_c_style_for(&mut self, start: Token) -> Result<Stmt> {
        self.consume(TokenKind::LParen)?;
        let init = if self.take(TokenKind::Semicolon) {
            None
        } else if matches!(self.peek().kind, TokenKind::Let | TokenKind::Const) {
            // The initializer statement consumes its own `;`
            Some(Box::new(self.parse_var_decl()?))
        } else {
            Some(Box::new(self.parse_expr_stmt()?))
        };

        let condition = if self.is(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.consume(TokenKind::Semicolon)?;

        let increment = if self.is(TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.consume(TokenKind::RParen)?;

        let body = Box::new(self.parse_stmt()?);
        let span = start.span().to(body.span);
        Ok(Stmt {
            kind: StmtKind::For {
                init,
                condition,
                increment,
                body,
            },
            span,
        })
    }

    fn parse_for_in(&mut self, start: Token) -> Result<Stmt> {
        let binding = self.parse_ident()?;
        self.consume(TokenKind::In)?;
        let iterable = self.parse_expr()?;
        let (body, end) = self.parse_braced_body()?;
        Ok(Stmt {
            kind: StmtKind::ForIn {
                binding,
                iterable,
                body,
            },
            span: start.span().to(end.span()),
        })
    }

    /// Parses a single-keyword statement, such as `break;`.
    fn parse_terminal_stmt(&mut self, keyword: TokenKind, kind: StmtKind) -> Result<Stmt> {
        let start = self.consume(keyword)?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind,
            span: start.span().to(end.span()),
        })
    }

    fn parse_return(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Return)?;
        let value = if self.is(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Return(value),
            span: start.span().to(end.span()),
        })
    }

    fn parse_set(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Set)?;
        let target = if self.is(TokenKind::Special) {
            let token = self.advance();
            SetTarget::Special(self.intern_special(token))
        } else {
            SetTarget::Name(self.parse_ident()?)
        };
        self.consume(TokenKind::Assign)?;
        let value = self.parse_expr()?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Set { target, value },
            span: start.span().to(end.span()),
        })
    }

    fn parse_emit(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Emit)?;
        let values = self.parse_list(
            TokenKind::Semicolon,
            TokenKind::Comma,
            Some(Error::EmptyEmit),
            Parser::parse_expr,
        )?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Emit { values },
            span: start.span().to(end.span()),
        })
    }

    fn parse_link(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Link)?;
        // The id must stop before the `=`, which would otherwise be taken
        // as an assignment operator. Binding power 3 is the tier right
        // above assignment.
        let id = self.parse_expr_bp(3)?;
        self.consume(TokenKind::Assign)?;
        let url = self.parse_expr()?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Link { id, url },
            span: start.span().to(end.span()),
        })
    }

    /// Parses a statement of the shape `keyword expr ;`, such as `open` and
    /// `navigate`.
    fn parse_target_stmt(
        &mut self,
        keyword: TokenKind,
        kind: impl FnOnce(Expr) -> StmtKind,
    ) -> Result<Stmt> {
        let start = self.consume(keyword)?;
        let target = self.parse_expr()?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: kind(target),
            span: start.span().to(end.span()),
        })
    }

    fn parse_named_block(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Block)?;
        let name = self.parse_ident()?;
        let (body, end) = self.parse_braced_body()?;
        Ok(Stmt {
            kind: StmtKind::NamedBlock { name, body },
            span: start.span().to(end.span()),
        })
    }

    fn parse_apply(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Apply)?;
        let style = self.parse_selector()?;
        self.consume(TokenKind::To)?;
        let target = self.parse_expr()?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Apply { style, target },
            span: start.span().to(end.span()),
        })
    }

    fn parse_command(&mut self) -> Result<Stmt> {
        let start = self.consume(TokenKind::Command)?;
        let command = extract::command_name(start, self.src);
        if !COMMANDS.contains(command) {
            self.error(start.span().wrap(Error::UnknownCommand));
        }
        let name = Ident {
            name: self.ident_interner.intern(command),
            span: start.span(),
        };
        let args =
            self.parse_list(TokenKind::Semicolon, TokenKind::Comma, None, Parser::parse_expr)?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Command { name, args },
            span: start.span().to(end.span()),
        })
    }

    fn parse_block_stmt(&mut self) -> Result<Stmt> {
        let start = self.peek();
        let (body, end) = self.parse_braced_body()?;
        Ok(Stmt {
            kind: StmtKind::Block(body),
            span: start.span().to(end.span()),
        })
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt> {
        let expr = self.parse_expr()?;
        let end = self.consume(TokenKind::Semicolon)?;
        let span = expr.span.to(end.span());
        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            span,
        })
    }

    /// Parses `'{' decl* '}'`, returning the body and the closing brace.
    fn parse_braced_body(&mut self) -> Result<(Vec<Stmt>, Token)> {
        self.parse_braced_list(Parser::parse_decl)
    }

    fn parse_initializer(&mut self) -> Result<Option<Expr>> {
        if !self.take(TokenKind::Assign) {
            return Ok(None);
        }
        let expr = self.parse_expr()?;
        Ok(Some(expr))
    }

    fn parse_ident(&mut self) -> Result<Ident> {
        let token = self.consume(TokenKind::Identifier)?;
        Ok(Ident {
            name: self.ident_interner.intern(extract::ident(token, self.src)),
            span: token.span(),
        })
    }

    fn intern_special(&mut self, token: Token) -> Ident {
        Ident {
            name: self
                .ident_interner
                .intern(extract::special_name(token, self.src)),
            span: token.span(),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let lhs_token = self.advance();
        let mut lhs = self.parse_nud(lhs_token)?;

        loop {
            let op_token = self.peek();

            if let Some((lbp, rbp)) = Self::infix_binding_power(op_token.kind) {
                if lbp < min_bp {
                    // Operator binds less tightly than the minimum required
                    break;
                }

                self.advance(); // Operator
                lhs = self.parse_led(op_token, lhs, rbp)?;
            } else {
                // Not an infix operator or binds too loosely
                break;
            }
        }

        Ok(lhs)
    }

    /// nud: Parses tokens that start an expression
    /// (prefix operators, literals, grouping)
    fn parse_nud(&mut self, token: Token) -> Result<Expr> {
        let (kind, span) = match token.kind {
            TokenKind::Identifier => {
                let ident = Ident {
                    name: self.ident_interner.intern(extract::ident(token, self.src)),
                    span: token.span(),
                };
                (ExprKind::Id(ident), token.span())
            }
            TokenKind::Special => {
                let ident = self.intern_special(token);
                (ExprKind::Special(ident), token.span())
            }
            TokenKind::Number => {
                let Some(parsed) = extract::number(token, self.src) else {
                    self.error(token.span().wrap(Error::NumberTooLarge));
                    return Err(());
                };
                (ExprKind::Number(parsed), token.span())
            }
            TokenKind::Str => (
                ExprKind::Str(extract::string(token, self.src)),
                token.span(),
            ),
            TokenKind::EscapedStr => (
                ExprKind::Str(extract::escaped_string(token, self.src)),
                token.span(),
            ),
            TokenKind::True => (ExprKind::Bool(true), token.span()),
            TokenKind::False => (ExprKind::Bool(false), token.span()),
            TokenKind::Nil => (ExprKind::Nil, token.span()),

            // Grouping: ( expr )
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                let end = self.consume(TokenKind::RParen)?;
                (ExprKind::Paren(Box::new(expr)), token.span().to(end.span()))
            }

            // Allocation: new Class ( [args] )
            TokenKind::New => {
                let class = self.parse_ident()?;
                self.consume(TokenKind::LParen)?;
                let args = self.parse_list(TokenKind::RParen, TokenKind::Comma, None, |p| {
                    p.parse_expr()
                })?;
                let end = self.consume(TokenKind::RParen)?;
                let new = ExprKind::New { class, args };
                (new, token.span().to(end.span()))
            }

            // Prefix operators: !, -, ~, +
            kind @ (TokenKind::Bang | TokenKind::Minus | TokenKind::Tilde | TokenKind::Plus) => {
                let op = match kind {
                    TokenKind::Bang => UnaryOperator::Not,
                    TokenKind::Minus => UnaryOperator::Neg,
                    TokenKind::Tilde => UnaryOperator::BitNot,
                    TokenKind::Plus => UnaryOperator::Plus,
                    _ => unreachable!(),
                };
                // SAFETY: Should have prefix due to above match
                let ((), rbp) = Self::prefix_binding_power(kind).unwrap();

                let expr = self.parse_expr_bp(rbp)?;

                let span = token.span().to(expr.span);
                let unary = ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                };
                (unary, span)
            }

            other => {
                let error = Error::UnexpectedTokenInExpr { token: other };
                self.error(token.span().wrap(error));
                return Err(());
            }
        };

        Ok(Expr { kind, span })
    }

    /// led: Parses tokens that follow a left-hand-side expression
    /// (infix/postfix operators)
    fn parse_led(&mut self, op_token: Token, lhs: Expr, rbp: u8) -> Result<Expr> {
        let (kind, span) = match op_token.kind {
            // Binary operators
            kind @ (TokenKind::OrOr
            | TokenKind::AndAnd
            | TokenKind::EqEq
            | TokenKind::BangEq
            | TokenKind::Less
            | TokenKind::LessEq
            | TokenKind::Greater
            | TokenKind::GreaterEq
            | TokenKind::Pipe
            | TokenKind::Caret
            | TokenKind::Amp
            | TokenKind::Shl
            | TokenKind::Shr
            | TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::StarStar) => {
                let op = match kind {
                    TokenKind::OrOr => BinaryOperator::Or,
                    TokenKind::AndAnd => BinaryOperator::And,
                    TokenKind::EqEq => BinaryOperator::Eq,
                    TokenKind::BangEq => BinaryOperator::Neq,
                    TokenKind::Less => BinaryOperator::Less,
                    TokenKind::LessEq => BinaryOperator::LessEq,
                    TokenKind::Greater => BinaryOperator::Greater,
                    TokenKind::GreaterEq => BinaryOperator::GreaterEq,
                    TokenKind::Pipe => BinaryOperator::BitOr,
                    TokenKind::Caret => BinaryOperator::BitXor,
                    TokenKind::Amp => BinaryOperator::BitAnd,
                    TokenKind::Shl => BinaryOperator::Shl,
                    TokenKind::Shr => BinaryOperator::Shr,
                    TokenKind::Plus => BinaryOperator::Add,
                    TokenKind::Minus => BinaryOperator::Sub,
                    TokenKind::Star => BinaryOperator::Mul,
                    TokenKind::Slash => BinaryOperator::Div,
                    TokenKind::Percent => BinaryOperator::Rem,
                    TokenKind::StarStar => BinaryOperator::Pow,
                    _ => unreachable!(),
                };
                // Parse right operand with correct precedence
                let rhs = self.parse_expr_bp(rbp)?;

                let span = lhs.span.to(rhs.span);
                let binary = ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
                (binary, span)
            }

            // Assignment: place = expr
            TokenKind::Assign => {
                // Check if lhs is a valid place expression
                if !matches!(
                    lhs.kind,
                    ExprKind::Id(_)
                        | ExprKind::Special(_)
                        | ExprKind::Member { .. }
                        | ExprKind::Index { .. }
                ) {
                    self.error(lhs.span.wrap(Error::InvalidAssignmentTarget));
                    return Err(());
                }

                let value = self.parse_expr_bp(rbp)?;
                let span = lhs.span.to(value.span);
                let assign = ExprKind::Assignment {
                    target: Box::new(lhs),
                    value: Box::new(value),
                };
                (assign, span)
            }

            // Ternary conditional: expr ? expr : expr
            TokenKind::Question => {
                let then_arm = self.parse_expr()?;
                self.consume(TokenKind::Colon)?;
                let else_arm = self.parse_expr_bp(rbp)?;

                let span = lhs.span.to(else_arm.span);
                let ternary = ExprKind::Ternary {
                    predicate: Box::new(lhs),
                    then_arm: Box::new(then_arm),
                    else_arm: Box::new(else_arm),
                };
                (ternary, span)
            }

            // Call: expr ( [args] )
            TokenKind::LParen => {
                let args = self.parse_list(TokenKind::RParen, TokenKind::Comma, None, |p| {
                    p.parse_expr()
                })?;
                let end = self.consume(TokenKind::RParen)?;

                let span = lhs.span.to(end.span());
                let call = ExprKind::Call {
                    callee: Box::new(lhs),
                    args,
                };
                (call, span)
            }

            // Member access: expr . ID
            TokenKind::Dot => {
                let field = self.parse_ident()?;
                let span = lhs.span.to(field.span);
                let member = ExprKind::Member {
                    object: Box::new(lhs),
                    field,
                };
                (member, span)
            }

            // Indexing: expr [ expr ]
            TokenKind::LBracket => {
                let index = self.parse_expr()?;
                let end = self.consume(TokenKind::RBracket)?;

                let span = lhs.span.to(end.span());
                let idx = ExprKind::Index {
                    object: Box::new(lhs),
                    index: Box::new(index),
                };
                (idx, span)
            }

            other => {
                let error = Error::UnexpectedOperator { actual: other };
                self.error(op_token.span().wrap(error));
                return Err(());
            }
        };

        Ok(Expr { kind, span })
    }

    /// Parses `item (delim item)*` until `end_delim` is found. Does **NOT**
    /// consume the end delimiter.
    fn parse_list<T>(
        &mut self,
        end_delim: TokenKind,
        separator: TokenKind,
        require_one: Option<Error>,
        parse_item: impl Fn(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        debug_assert_ne!(end_delim, separator);

        let mut items = Vec::new();
        while self.except([end_delim]) {
            let item = self.synchronize(&[separator], &[end_delim], |p| parse_item(p))?;
            items.push(item);

            // After consuming an item, we must consume the separator.
            if !self.take(separator) {
                if self.is(end_delim) {
                    // If, however, it is not present, then we check if the end
                    // delimiter is current. If so, we can stop.
                    break;
                }
                // However, if the current token is not the separator nor
                // the end delimiter, we must return an error.
                let c = self.peek();
                self.error(c.span().wrap(Error::UnexpectedAny {
                    actual: c.kind,
                    expected: Box::from([separator, end_delim]),
                }));
            }
        }

        let next = self.peek();
        assert!(next.kind == end_delim || next.kind == TokenKind::Eof);
        if let Some(error) = require_one {
            if items.is_empty() {
                self.error(next.span().wrap(error));
                return Err(());
            }
        }

        Ok(items)
    }

    /// Parses `'{' item* '}'` where each item handles its own terminator,
    /// returning the collected items and the closing brace. Items are
    /// re-synchronized at `;` boundaries.
    fn parse_braced_list<T>(
        &mut self,
        mut parse_item: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<(Vec<T>, Token)> {
        self.consume(TokenKind::LBrace)?;
        let mut items = Vec::new();
        while self.except([TokenKind::RBrace]) {
            let checkpoint = self.cursor;
            if let Ok(item) = self.synchronize(
                &[TokenKind::Semicolon],
                &[TokenKind::RBrace],
                |p| parse_item(p),
            ) {
                items.push(item);
            } else if self.cursor == checkpoint {
                // Recovery stopped without consuming anything, e.g. on a
                // statement keyword that cannot start an item. Skip the
                // offending token so the loop makes progress.
                self.advance();
            }
        }
        let end = self.consume(TokenKind::RBrace)?;
        Ok((items, end))
    }

    fn infix_binding_power(kind: TokenKind) -> Option<(u8, u8)> {
        let bp = match kind {
            // Assignment (right-associative)
            TokenKind::Assign => (2, 1),

            // Ternary conditional (right-associative)
            TokenKind::Question => (4, 3),

            // Logical or
            TokenKind::OrOr => (5, 6),

            // Logical and
            TokenKind::AndAnd => (7, 8),

            // Equality
            TokenKind::EqEq | TokenKind::BangEq => (9, 10),

            // Comparisons
            TokenKind::Less | TokenKind::LessEq | TokenKind::Greater | TokenKind::GreaterEq => {
                (11, 12)
            }

            // Bitwise or
            TokenKind::Pipe => (13, 14),

            // Bitwise xor
            TokenKind::Caret => (15, 16),

            // Bitwise and
            TokenKind::Amp => (17, 18),

            // Shifts
            TokenKind::Shl | TokenKind::Shr => (19, 20),

            // Addition/Subtraction
            TokenKind::Plus | TokenKind::Minus => (21, 22),

            // Multiplication/Division/Remainder
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => (23, 24),

            // Exponentiation (right-associative; unary operators bind
            // tighter, so -2 ** 2 is (-2) ** 2)
            TokenKind::StarStar => (26, 25),

            // Call, member access and indexing (postfix)
            TokenKind::LParen | TokenKind::Dot | TokenKind::LBracket => (29, 30),

            _ => return None,
        };
        Some(bp)
    }

    // Prefix operators:
    fn prefix_binding_power(kind: TokenKind) -> Option<((), u8)> {
        let bp = match kind {
            // Negations (logical, arithmetic, bitwise) and unary plus
            TokenKind::Bang | TokenKind::Minus | TokenKind::Tilde | TokenKind::Plus => ((), 27),

            // Other tokens are not prefix operators handled by binding power
            // (Literals, IDs, (, new are handled directly in nud)
            _ => return None,
        };
        Some(bp)
    }
}

impl Parser<'_, '_, '_> {
    pub fn new<'src, 'tok, 'ident>(
        src: &'src str,
        tokens: &'tok mut Vec<Token>,
        ident_interner: &'ident mut Interner,
    ) -> Parser<'src, 'tok, 'ident> {
        let mut p = Parser {
            src,
            tokens,
            ident_interner,
            cursor: 0,
            errors: Vec::with_capacity(8),
        };
        p.setup();
        p
    }

    /// Adds an error.
    fn error(&mut self, error: Spanned<Error>) {
        self.errors.push(error);
    }

    /// Setups the parser: records a diagnostic for every error token the
    /// lexer produced and skips to the first significant token.
    fn setup(&mut self) {
        for token in self.tokens.iter() {
            if token.kind.is_error() {
                self.errors.push(token.span().wrap(Error::Lexer(token.kind)));
            }
        }
        while self.is_skippable() {
            self.cursor += 1;
        }
    }

    /// Whether the current token is skipped over without being seen by the
    /// grammar. Error tokens were already reported in [`Parser::setup`].
    fn is_skippable(&self) -> bool {
        let kind = self.peek().kind;
        kind.is_trivia() || kind.is_error()
    }

    /// Returns the current token.
    #[inline]
    fn peek(&self) -> Token {
        match self.tokens.get(self.cursor) {
            Some(token) => *token,
            None => Token::eof_for(self.src),
        }
    }

    /// Returns the current token and advances. Skips any trivia.
    fn advance(&mut self) -> Token {
        let c = self.peek(); // Before any advancement
        while {
            self.cursor += 1;
            self.is_skippable()
        } {}
        c
    }

    /// Advances and returns the provided value.
    fn advance_with<T>(&mut self, value: T) -> T {
        self.advance();
        value
    }

    /// Checks whether the current token matches the given one.
    fn is(&self, expect: TokenKind) -> bool {
        self.peek().kind == expect
    }

    /// Advances if the current token matches the provided one, returning true.
    /// If not, returns false and doesn't advance.
    fn take(&mut self, expect: TokenKind) -> bool {
        if self.is(expect) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Advances if the current token matches the provided one, returning it.
    /// If not, records an error.
    fn consume(&mut self, expect: TokenKind) -> Result<Token> {
        let c = self.peek();
        if self.is(expect) {
            self.advance();
            Ok(c)
        } else {
            self.error(c.span().wrap(Error::Unexpected {
                actual: c.kind,
                expected: expect,
            }));
            Err(())
        }
    }

    /// Advances if the current token matches any of the provided tokens,
    /// returning it. If not, records an error.
    fn consume_any(&mut self, expect: &'static [TokenKind]) -> Result<Token> {
        for t in expect {
            if self.is(*t) {
                return Ok(self.advance());
            }
        }
        let c = self.peek();
        self.error(c.span().wrap(Error::UnexpectedAny {
            actual: c.kind,
            expected: Box::from(expect),
        }));
        Err(())
    }

    /// Returns true while the current token does *not* match one of the
    /// provided ones. [`TokenKind::Eof`] is implicitly included in the list.
    ///
    /// This won't advance the cursor.
    fn except(&mut self, except: impl IntoIterator<Item = TokenKind>) -> bool {
        let c = self.peek();
        for e in except {
            if c.kind == e {
                return false;
            }
        }
        if c.kind == TokenKind::Eof {
            return false;
        }
        true
    }

    fn synchronize<T>(
        &mut self,
        cont_cond: &[TokenKind],
        stop_cond: &[TokenKind],
        mut f: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<T> {
        'outer: loop {
            if let Ok(val) = f(self) {
                break Ok(val);
            }
            // In the case of an error, try to advance until find a token
            // specified in `cont_cond` (in which case we retry), in
            // `stop_cond`, or which may start a statement (in which cases
            // we stop).
            loop {
                let c = self.peek().kind;
                // Check whether must stop
                if c == TokenKind::Eof || c.starts_stmt() || stop_cond.contains(&c) {
                    break 'outer Err(());
                }
                // The token advancement must be AFTER stopping. If we break
                // out, the caller should advance (to follow the convention).
                self.advance();
                // Check whether can retry
                if cont_cond.contains(&c) {
                    continue 'outer;
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    InvalidAssignmentTarget,
    UnexpectedTokenInExpr {
        token: TokenKind,
    },
    Unexpected {
        actual: TokenKind,
        expected: TokenKind,
    },
    UnexpectedAny {
        actual: TokenKind,
        expected: Box<[TokenKind]>,
    },
    UnexpectedOperator {
        actual: TokenKind,
    },
    ConstWithoutInitializer,
    EmptyEmit,
    EmptyImplements,
    UnknownCommand,
    NumberTooLarge,
    /// A token kind which holds the [`TokenKind::is_error`] property.
    Lexer(TokenKind),
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    pub fn parse_program(src: &str) -> (Interner, Program) {
        let mut i = Interner::with_capacity(32);
        let prog = super::parse_program(src, &mut Vec::with_capacity(512), &mut i)
            .expect("failed to parse");
        (i, prog)
    }

    #[expect(dead_code)]
    pub fn parse_expr(src: &str) -> (Interner, Expr) {
        let mut i = Interner::with_capacity(32);
        let expr =
            super::parse_expr(src, &mut Vec::with_capacity(512), &mut i).expect("failed to parse");
        (i, expr)
    }
}
