//! Renders the AST back to surface syntax in a canonical form: four-space
//! indentation, full keywords for the legacy shorthands, and braced bodies
//! for every control-flow statement. Printing a parsed program and parsing
//! the result again reaches a fixpoint after one round.

use std::io::Write;

use crate::{ast::*, util::intern::Interner};

const INDENT_WIDTH: usize = 4;

pub fn print_program_string(idents: &Interner, program: &Program) -> String {
    let mut buf = Vec::with_capacity(1024);
    print_program(&mut buf, idents, program).unwrap();
    String::from_utf8(buf).unwrap()
}

pub fn print_program(
    w: &mut impl Write,
    idents: &Interner,
    program: &Program,
) -> std::io::Result<()> {
    for stmt in &program.stmts {
        print_stmt(w, idents, 0, stmt)?;
    }
    Ok(())
}

fn print_stmt(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    stmt: &Stmt,
) -> std::io::Result<()> {
    match &stmt.kind {
        StmtKind::VarDecl(binding) => {
            sp(w, i)?;
            print_var_decl(w, idents, binding)?;
            writeln!(w)?;
        }
        StmtKind::FnDecl(function) => {
            sp(w, i)?;
            write!(w, "fn {}", idents.get(function.name))?;
            print_params(w, idents, &function.params)?;
            print_braced(w, idents, i, &function.body)?;
            writeln!(w)?;
        }
        StmtKind::ClassDecl(class) => {
            sp(w, i)?;
            write!(w, "class {}", idents.get(class.name))?;
            if let Some(extends) = class.extends {
                write!(w, " extends {}", idents.get(extends))?;
            }
            if !class.implements.is_empty() {
                write!(w, " implements ")?;
                for (idx, interface) in class.implements.iter().enumerate() {
                    if idx > 0 {
                        write!(w, ", ")?;
                    }
                    write!(w, "{}", idents.get(interface))?;
                }
            }
            writeln!(w, " {{")?;
            for member in &class.members {
                print_member(w, idents, i + 1, member)?;
            }
            sp(w, i)?;
            writeln!(w, "}}")?;
        }
        StmtKind::StructDecl { name, fields } => {
            sp(w, i)?;
            writeln!(w, "struct {} {{", idents.get(name))?;
            for field in fields {
                sp(w, i + 1)?;
                print_field(w, idents, field)?;
                writeln!(w)?;
            }
            sp(w, i)?;
            writeln!(w, "}}")?;
        }
        StmtKind::InterfaceDecl { name, methods } => {
            sp(w, i)?;
            writeln!(w, "interface {} {{", idents.get(name))?;
            for method in methods {
                sp(w, i + 1)?;
                write!(w, "fn {}", idents.get(method.name))?;
                print_params(w, idents, &method.params)?;
                writeln!(w, ";")?;
            }
            sp(w, i)?;
            writeln!(w, "}}")?;
        }
        StmtKind::StyleDecl(rule) => print_style_rule(w, idents, i, rule, true)?,
        StmtKind::Block(stmts) => {
            sp(w, i)?;
            writeln!(w, "{{")?;
            for stmt in stmts {
                print_stmt(w, idents, i + 1, stmt)?;
            }
            sp(w, i)?;
            writeln!(w, "}}")?;
        }
        StmtKind::If {
            predicate,
            then_branch,
            else_branch,
        } => {
            sp(w, i)?;
            print_if(w, idents, i, predicate, then_branch, else_branch.as_deref())?;
            writeln!(w)?;
        }
        StmtKind::While { predicate, body } => {
            sp(w, i)?;
            write!(w, "while (")?;
            print_expr(w, idents, predicate)?;
            write!(w, ")")?;
            print_body(w, idents, i, body)?;
            writeln!(w)?;
        }
        StmtKind::For {
            init,
            condition,
            increment,
            body,
        } => {
            sp(w, i)?;
            write!(w, "for (")?;
            match init {
                Some(init) => print_for_init(w, idents, init)?,
                None => write!(w, ";")?,
            }
            match condition {
                Some(condition) => {
                    write!(w, " ")?;
                    print_expr(w, idents, condition)?;
                    write!(w, ";")?;
                }
                None => write!(w, ";")?,
            }
            if let Some(increment) = increment {
                write!(w, " ")?;
                print_expr(w, idents, increment)?;
            }
            write!(w, ")")?;
            print_body(w, idents, i, body)?;
            writeln!(w)?;
        }
        StmtKind::ForIn {
            binding,
            iterable,
            body,
        } => {
            sp(w, i)?;
            write!(w, "for {} in ", idents.get(binding))?;
            print_expr(w, idents, iterable)?;
            writeln!(w, " {{")?;
            for stmt in body {
                print_stmt(w, idents, i + 1, stmt)?;
            }
            sp(w, i)?;
            writeln!(w, "}}")?;
        }
        StmtKind::Break => {
            sp(w, i)?;
            writeln!(w, "break;")?;
        }
        StmtKind::Continue => {
            sp(w, i)?;
            writeln!(w, "continue;")?;
        }
        StmtKind::Return(value) => {
            sp(w, i)?;
            write!(w, "return")?;
            if let Some(value) = value {
                write!(w, " ")?;
                print_expr(w, idents, value)?;
            }
            writeln!(w, ";")?;
        }
        StmtKind::Set { target, value } => {
            sp(w, i)?;
            match target {
                SetTarget::Name(name) => write!(w, "set {} = ", idents.get(name))?,
                SetTarget::Special(name) => write!(w, "set ${} = ", idents.get(name))?,
            }
            print_expr(w, idents, value)?;
            writeln!(w, ";")?;
        }
        StmtKind::Emit { values } => {
            sp(w, i)?;
            write!(w, "emit ")?;
            for (idx, value) in values.iter().enumerate() {
                if idx > 0 {
                    write!(w, ", ")?;
                }
                print_expr(w, idents, value)?;
            }
            writeln!(w, ";")?;
        }
        StmtKind::Link { id, url } => {
            sp(w, i)?;
            write!(w, "link ")?;
            print_expr(w, idents, id)?;
            write!(w, " = ")?;
            print_expr(w, idents, url)?;
            writeln!(w, ";")?;
        }
        StmtKind::Open(target) => {
            sp(w, i)?;
            write!(w, "open ")?;
            print_expr(w, idents, target)?;
            writeln!(w, ";")?;
        }
        StmtKind::Navigate(target) => {
            sp(w, i)?;
            write!(w, "navigate ")?;
            print_expr(w, idents, target)?;
            writeln!(w, ";")?;
        }
        StmtKind::NamedBlock { name, body } => {
            sp(w, i)?;
            writeln!(w, "block {} {{", idents.get(name))?;
            for stmt in body {
                print_stmt(w, idents, i + 1, stmt)?;
            }
            sp(w, i)?;
            writeln!(w, "}}")?;
        }
        StmtKind::Apply { style, target } => {
            sp(w, i)?;
            write!(w, "apply {} to ", idents.get(style))?;
            print_expr(w, idents, target)?;
            writeln!(w, ";")?;
        }
        StmtKind::Command { name, args } => {
            sp(w, i)?;
            write!(w, "@{}", idents.get(name))?;
            if !args.is_empty() {
                write!(w, " ")?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(w, ", ")?;
                    }
                    print_expr(w, idents, arg)?;
                }
            }
            writeln!(w, ";")?;
        }
        StmtKind::Expr(expr) => {
            sp(w, i)?;
            print_expr(w, idents, expr)?;
            writeln!(w, ";")?;
        }
    }
    Ok(())
}

/// `if (..) { .. }` with `else if` chains flattened onto one line each.
/// Writes no trailing newline so a chained call can continue the line.
fn print_if(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    predicate: &Expr,
    then_branch: &Stmt,
    else_branch: Option<&Stmt>,
) -> std::io::Result<()> {
    write!(w, "if (")?;
    print_expr(w, idents, predicate)?;
    write!(w, ")")?;
    print_body(w, idents, i, then_branch)?;
    if let Some(else_branch) = else_branch {
        if let StmtKind::If {
            predicate,
            then_branch,
            else_branch,
        } = &else_branch.kind
        {
            write!(w, " else ")?;
            return print_if(w, idents, i, predicate, then_branch, else_branch.as_deref());
        }
        write!(w, " else")?;
        print_body(w, idents, i, else_branch)?;
    }
    Ok(())
}

/// A control-flow body. Always braced, so single-statement bodies
/// canonicalize to blocks. Writes no trailing newline.
fn print_body(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    body: &Stmt,
) -> std::io::Result<()> {
    writeln!(w, " {{")?;
    match &body.kind {
        StmtKind::Block(stmts) => {
            for stmt in stmts {
                print_stmt(w, idents, i + 1, stmt)?;
            }
        }
        _ => print_stmt(w, idents, i + 1, body)?,
    }
    sp(w, i)?;
    write!(w, "}}")
}

fn print_for_init(w: &mut impl Write, idents: &Interner, init: &Stmt) -> std::io::Result<()> {
    match &init.kind {
        StmtKind::VarDecl(binding) => print_var_decl(w, idents, binding),
        StmtKind::Expr(expr) => {
            print_expr(w, idents, expr)?;
            write!(w, ";")
        }
        // Anything else cannot appear in a `for` header.
        _ => write!(w, ";"),
    }
}

fn print_var_decl(w: &mut impl Write, idents: &Interner, binding: &Binding) -> std::io::Result<()> {
    let keyword = if binding.constant { "const" } else { "let" };
    write!(w, "{keyword} {}", idents.get(binding.name))?;
    if let Some(initializer) = &binding.initializer {
        write!(w, " = ")?;
        print_expr(w, idents, initializer)?;
    }
    write!(w, ";")
}

fn print_member(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    member: &Member,
) -> std::io::Result<()> {
    match member {
        Member::Field {
            access,
            modifiers,
            field,
        } => {
            sp(w, i)?;
            print_access(w, *access)?;
            print_modifiers(w, *modifiers)?;
            print_field(w, idents, field)?;
            writeln!(w)?;
        }
        Member::Method {
            access,
            modifiers,
            function,
        } => {
            sp(w, i)?;
            print_access(w, *access)?;
            print_modifiers(w, *modifiers)?;
            write!(w, "fn {}", idents.get(function.name))?;
            print_params(w, idents, &function.params)?;
            print_braced(w, idents, i, &function.body)?;
            writeln!(w)?;
        }
    }
    Ok(())
}

fn print_field(w: &mut impl Write, idents: &Interner, field: &Field) -> std::io::Result<()> {
    write!(w, "{}", idents.get(field.name))?;
    if let Some(ty) = field.ty {
        write!(w, ": {}", idents.get(ty))?;
    }
    if let Some(initializer) = &field.initializer {
        write!(w, " = ")?;
        print_expr(w, idents, initializer)?;
    }
    write!(w, ";")
}

fn print_style_rule(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    rule: &StyleRule,
    top: bool,
) -> std::io::Result<()> {
    sp(w, i)?;
    // Nested rules carry no `style` keyword in the surface syntax.
    if top {
        write!(w, "style ")?;
    }
    for (idx, selector) in rule.selectors.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        write!(w, "{}", idents.get(selector))?;
    }
    writeln!(w, " {{")?;
    for property in &rule.properties {
        sp(w, i + 1)?;
        write!(w, "{}: ", idents.get(property.name))?;
        print_expr(w, idents, &property.value)?;
        writeln!(w, ";")?;
    }
    for child in &rule.children {
        print_style_rule(w, idents, i + 1, child, false)?;
    }
    sp(w, i)?;
    writeln!(w, "}}")?;
    Ok(())
}

/// A statement list in braces, starting on the current line. Writes no
/// trailing newline.
fn print_braced(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    body: &[Stmt],
) -> std::io::Result<()> {
    writeln!(w, " {{")?;
    for stmt in body {
        print_stmt(w, idents, i + 1, stmt)?;
    }
    sp(w, i)?;
    write!(w, "}}")
}

pub fn print_expr(w: &mut impl Write, idents: &Interner, expr: &Expr) -> std::io::Result<()> {
    match &expr.kind {
        ExprKind::Assignment { target, value } => {
            print_expr(w, idents, target)?;
            write!(w, " = ")?;
            print_expr(w, idents, value)?;
        }
        ExprKind::Ternary {
            predicate,
            then_arm,
            else_arm,
        } => {
            print_expr(w, idents, predicate)?;
            write!(w, " ? ")?;
            print_expr(w, idents, then_arm)?;
            write!(w, " : ")?;
            print_expr(w, idents, else_arm)?;
        }
        ExprKind::Unary {
            op,
            expr: inner_expr,
        } => {
            write!(w, "{}", unary_op_token(*op))?;
            print_expr(w, idents, inner_expr)?;
        }
        ExprKind::Binary { op, lhs, rhs } => {
            print_expr(w, idents, lhs)?;
            write!(w, " {} ", binary_op_token(*op))?;
            print_expr(w, idents, rhs)?;
        }
        ExprKind::Call { callee, args } => {
            print_expr(w, idents, callee)?;
            print_args(w, idents, args)?;
        }
        ExprKind::Member { object, field } => {
            print_expr(w, idents, object)?;
            write!(w, ".{}", idents.get(field))?;
        }
        ExprKind::Index { object, index } => {
            print_expr(w, idents, object)?;
            write!(w, "[")?;
            print_expr(w, idents, index)?;
            write!(w, "]")?;
        }
        ExprKind::New { class, args } => {
            write!(w, "new {}", idents.get(class))?;
            print_args(w, idents, args)?;
        }
        ExprKind::Paren(inner_expr) => {
            write!(w, "(")?;
            print_expr(w, idents, inner_expr)?;
            write!(w, ")")?;
        }
        ExprKind::Id(name) => write!(w, "{}", idents.get(name))?,
        ExprKind::Special(name) => write!(w, "${}", idents.get(name))?,
        ExprKind::Number(value) => print_number(w, *value)?,
        ExprKind::Str(value) => print_str(w, value)?,
        ExprKind::Bool(value) => write!(w, "{value}")?,
        ExprKind::Nil => write!(w, "nil")?,
        // Error recovery placeholder; never produced by a clean parse.
        ExprKind::Dummy => write!(w, "nil")?,
    }
    Ok(())
}

fn print_args(w: &mut impl Write, idents: &Interner, args: &[Expr]) -> std::io::Result<()> {
    write!(w, "(")?;
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        print_expr(w, idents, arg)?;
    }
    write!(w, ")")
}

fn print_params(w: &mut impl Write, idents: &Interner, params: &[Ident]) -> std::io::Result<()> {
    write!(w, "(")?;
    for (idx, param) in params.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        write!(w, "{}", idents.get(param))?;
    }
    write!(w, ")")
}

/// A numeric literal. `{value}` would spell the non-finite values as bare
/// identifiers (`inf`, `NaN`), so infinity renders as an overflowing
/// exponent and `NaN` as a zero division.
fn print_number(w: &mut impl Write, value: f64) -> std::io::Result<()> {
    if value.is_finite() {
        write!(w, "{value}")
    } else if value.is_nan() {
        write!(w, "(0 / 0)")
    } else if value.is_sign_positive() {
        write!(w, "1e999")
    } else {
        write!(w, "-1e999")
    }
}

/// A double-quoted string literal. Only escape sequences the lexer accepts
/// are produced: the named single-character forms where one exists, `\xNN`
/// for the remaining control characters, everything else verbatim.
fn print_str(w: &mut impl Write, value: &str) -> std::io::Result<()> {
    write!(w, "\"")?;
    for c in value.chars() {
        match c {
            '"' => write!(w, "\\\"")?,
            '\\' => write!(w, "\\\\")?,
            '\n' => write!(w, "\\n")?,
            '\t' => write!(w, "\\t")?,
            '\r' => write!(w, "\\r")?,
            '\0' => write!(w, "\\0")?,
            '\x08' => write!(w, "\\b")?,
            '\x0b' => write!(w, "\\v")?,
            '\x0c' => write!(w, "\\f")?,
            c if c.is_ascii_control() => write!(w, "\\x{:02x}", u32::from(c))?,
            c => write!(w, "{c}")?,
        }
    }
    write!(w, "\"")
}

fn print_access(w: &mut impl Write, access: Access) -> std::io::Result<()> {
    match access {
        Access::Public => Ok(()),
        Access::Private => write!(w, "private "),
        Access::Protected => write!(w, "protected "),
    }
}

fn print_modifiers(w: &mut impl Write, modifiers: Modifiers) -> std::io::Result<()> {
    if modifiers.is_static {
        write!(w, "static ")?;
    }
    if modifiers.is_virtual {
        write!(w, "virtual ")?;
    }
    if modifiers.is_override {
        write!(w, "override ")?;
    }
    if modifiers.is_abstract {
        write!(w, "abstract ")?;
    }
    if modifiers.is_final {
        write!(w, "final ")?;
    }
    Ok(())
}

fn binary_op_token(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::Or => "||",
        BinaryOperator::And => "&&",
        BinaryOperator::Eq => "==",
        BinaryOperator::Neq => "!=",
        BinaryOperator::Less => "<",
        BinaryOperator::LessEq => "<=",
        BinaryOperator::Greater => ">",
        BinaryOperator::GreaterEq => ">=",
        BinaryOperator::BitOr => "|",
        BinaryOperator::BitXor => "^",
        BinaryOperator::BitAnd => "&",
        BinaryOperator::Shl => "<<",
        BinaryOperator::Shr => ">>",
        BinaryOperator::Add => "+",
        BinaryOperator::Sub => "-",
        BinaryOperator::Mul => "*",
        BinaryOperator::Div => "/",
        BinaryOperator::Rem => "%",
        BinaryOperator::Pow => "**",
    }
}

fn unary_op_token(op: UnaryOperator) -> &'static str {
    match op {
        UnaryOperator::Not => "!",
        UnaryOperator::Neg => "-",
        UnaryOperator::BitNot => "~",
        UnaryOperator::Plus => "+",
    }
}

fn sp(w: &mut impl Write, i: usize) -> std::io::Result<()> {
    write!(w, "{:width$}", "", width = i * INDENT_WIDTH)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser;

    fn render(src: &str) -> String {
        let (i, program) = parser::test_utils::parse_program(src);
        print_program_string(&i, &program)
    }

    #[track_caller]
    fn assert_stable(src: &str) {
        let first = render(src);
        let second = render(&first);
        assert_eq!(second, first);
    }

    #[test]
    fn renders_canonical_source() {
        assert_eq!(
            render("if(ok)emit 1;else em 2;"),
            indoc! {r#"
                if (ok) {
                    emit 1;
                } else {
                    emit 2;
                }
            "#}
        );
    }

    #[test]
    fn declarations_reach_a_fixpoint() {
        assert_stable("let x = 1;");
        assert_stable(r#"const greeting = "hi";"#);
        assert_stable("let x;");
        assert_stable("fn add(a, b) { return a + b; }");
        assert_stable("class Point extends Object implements A { x = 0; private fn m(a) {} }");
        assert_stable("class A { protected static final limit: number = 9; }");
        assert_stable("struct P { x: number; y; }");
        assert_stable("interface I { fn draw(ctx); }");
        assert_stable(r#"style banner, .hero { color: "red"; .title { size: 2; } }"#);
    }

    #[test]
    fn control_flow_reaches_a_fixpoint() {
        assert_stable("if (ok) emit 1; else emit 2;");
        assert_stable("if (a) {} else if (b) {} else {}");
        assert_stable("while (i < 3) set i = i + 1;");
        assert_stable("for (let i = 0; i < 3; i = i + 1) { emit i; }");
        assert_stable("for (;;) { break; }");
        assert_stable("for item in items { emit item; continue; }");
        assert_stable("{ let x = 1; { emit x; } }");
    }

    #[test]
    fn page_statements_reach_a_fixpoint() {
        assert_stable(r#"set $title = "Home";"#);
        assert_stable(r#"link "docs" = "/docs"; open "/intro"; navigate "/next";"#);
        assert_stable(r#"block nav { emit "menu"; } apply .wide to nav;"#);
        assert_stable(r#"@page "index", 2;"#);
    }

    #[test]
    fn expressions_reach_a_fixpoint() {
        assert_stable("emit a ? b : c, -x, !y, ~z, +w;");
        assert_stable("emit (1 + 2) * 3 ** 4, xs[0], obj.f, obj.m(1), new P(1, 2), nil, true;");
        assert_stable("x = y = 5;");
        assert_stable("emit a || b && c, a | b ^ c & d, a << 1 >> 2, a % b / c;");
        assert_stable("emit a == b, a != b, a <= b, a >= b, $title;");
        assert_stable(r#"emit "quote \" and\nbreak";"#);
        assert_stable(r#"emit "bs\b ff\f vt\v nul\0 esc\x1b del\x7f";"#);
        assert_stable(r#"emit "back\\slash", 'single "double"';"#);
        assert_stable(r#"emit "pass\u0041through";"#);
        assert_stable("emit 1e309, 0.002, 12.5;");
    }

    #[test]
    fn renders_control_escapes_the_lexer_reads_back() {
        assert_eq!(
            render(r#"emit "a\bz", "del\x7f", "plain\x41", 1e309;"#),
            "emit \"a\\bz\", \"del\\x7f\", \"plainA\", 1e999;\n"
        );
    }

    #[test]
    fn nonfinite_numbers_have_a_source_spelling() {
        use crate::token::Span;

        let idents = Interner::with_capacity(1);
        let expr = Expr {
            kind: ExprKind::Number(f64::NAN),
            span: Span::new_of_length(0, 0),
        };
        let mut buf = Vec::new();
        print_expr(&mut buf, &idents, &expr).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "(0 / 0)");
    }
}
