//! Renders the AST as an indented tree, one node per line. Statement lines
//! carry no spans; expression lines end with their source span.

use std::io::Write;

use crate::{ast::*, util::intern::Interner};

const INDENT_WIDTH: usize = 2;

pub fn print_program_string(idents: &Interner, program: &Program) -> String {
    let mut buf = Vec::with_capacity(1024);
    print_program(&mut buf, idents, program).unwrap();
    String::from_utf8(buf).unwrap()
}

pub fn print_expr_string(idents: &Interner, expr: &Expr) -> String {
    let mut buf = Vec::with_capacity(512);
    print_expr(&mut buf, idents, 0, expr).unwrap();
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
            let keyword = if binding.constant { "const" } else { "let" };
            writeln!(w, "{keyword} {}", idents.get(binding.name))?;
            if let Some(initializer) = &binding.initializer {
                print_expr(w, idents, i + 1, initializer)?;
            }
        }
        StmtKind::FnDecl(function) => {
            sp(w, i)?;
            write!(w, "fn {}", idents.get(function.name))?;
            print_params(w, idents, &function.params)?;
            writeln!(w)?;
            for stmt in &function.body {
                print_stmt(w, idents, i + 1, stmt)?;
            }
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
            writeln!(w)?;
            for member in &class.members {
                print_member(w, idents, i + 1, member)?;
            }
        }
        StmtKind::StructDecl { name, fields } => {
            sp(w, i)?;
            writeln!(w, "struct {}", idents.get(name))?;
            for field in fields {
                print_field(w, idents, i + 1, field)?;
            }
        }
        StmtKind::InterfaceDecl { name, methods } => {
            sp(w, i)?;
            writeln!(w, "interface {}", idents.get(name))?;
            for method in methods {
                sp(w, i + 1)?;
                write!(w, "method {}", idents.get(method.name))?;
                print_params(w, idents, &method.params)?;
                writeln!(w)?;
            }
        }
        StmtKind::StyleDecl(rule) => print_style(w, idents, i, rule)?,
        StmtKind::Block(stmts) => {
            sp(w, i)?;
            writeln!(w, "block")?;
            for stmt in stmts {
                print_stmt(w, idents, i + 1, stmt)?;
            }
        }
        StmtKind::If {
            predicate,
            then_branch,
            else_branch,
        } => {
            sp(w, i)?;
            writeln!(w, "if")?;
            print_expr(w, idents, i + 1, predicate)?;
            print_stmt(w, idents, i + 1, then_branch)?;
            if let Some(else_branch) = else_branch {
                print_stmt(w, idents, i + 1, else_branch)?;
            }
        }
        StmtKind::While { predicate, body } => {
            sp(w, i)?;
            writeln!(w, "while")?;
            print_expr(w, idents, i + 1, predicate)?;
            print_stmt(w, idents, i + 1, body)?;
        }
        StmtKind::For {
            init,
            condition,
            increment,
            body,
        } => {
            sp(w, i)?;
            writeln!(w, "for")?;
            if let Some(init) = init {
                sp(w, i + 1)?;
                writeln!(w, "init")?;
                print_stmt(w, idents, i + 2, init)?;
            }
            if let Some(condition) = condition {
                sp(w, i + 1)?;
                writeln!(w, "condition")?;
                print_expr(w, idents, i + 2, condition)?;
            }
            if let Some(increment) = increment {
                sp(w, i + 1)?;
                writeln!(w, "increment")?;
                print_expr(w, idents, i + 2, increment)?;
            }
            sp(w, i + 1)?;
            writeln!(w, "body")?;
            print_stmt(w, idents, i + 2, body)?;
        }
        StmtKind::ForIn {
            binding,
            iterable,
            body,
        } => {
            sp(w, i)?;
            writeln!(w, "for-in {}", idents.get(binding))?;
            print_expr(w, idents, i + 1, iterable)?;
            for stmt in body {
                print_stmt(w, idents, i + 1, stmt)?;
            }
        }
        StmtKind::Break => {
            sp(w, i)?;
            writeln!(w, "break")?;
        }
        StmtKind::Continue => {
            sp(w, i)?;
            writeln!(w, "continue")?;
        }
        StmtKind::Return(value) => {
            sp(w, i)?;
            writeln!(w, "return")?;
            if let Some(value) = value {
                print_expr(w, idents, i + 1, value)?;
            }
        }
        StmtKind::Set { target, value } => {
            sp(w, i)?;
            match target {
                SetTarget::Name(name) => writeln!(w, "set {}", idents.get(name))?,
                SetTarget::Special(name) => writeln!(w, "set ${}", idents.get(name))?,
            }
            print_expr(w, idents, i + 1, value)?;
        }
        StmtKind::Emit { values } => {
            sp(w, i)?;
            writeln!(w, "emit")?;
            for value in values {
                print_expr(w, idents, i + 1, value)?;
            }
        }
        StmtKind::Link { id, url } => {
            sp(w, i)?;
            writeln!(w, "link")?;
            print_expr(w, idents, i + 1, id)?;
            print_expr(w, idents, i + 1, url)?;
        }
        StmtKind::Open(target) => {
            sp(w, i)?;
            writeln!(w, "open")?;
            print_expr(w, idents, i + 1, target)?;
        }
        StmtKind::Navigate(target) => {
            sp(w, i)?;
            writeln!(w, "navigate")?;
            print_expr(w, idents, i + 1, target)?;
        }
        StmtKind::NamedBlock { name, body } => {
            sp(w, i)?;
            writeln!(w, "block {}", idents.get(name))?;
            for stmt in body {
                print_stmt(w, idents, i + 1, stmt)?;
            }
        }
        StmtKind::Apply { style, target } => {
            sp(w, i)?;
            writeln!(w, "apply {}", idents.get(style))?;
            print_expr(w, idents, i + 1, target)?;
        }
        StmtKind::Command { name, args } => {
            sp(w, i)?;
            writeln!(w, "command @{}", idents.get(name))?;
            for arg in args {
                print_expr(w, idents, i + 1, arg)?;
            }
        }
        StmtKind::Expr(expr) => print_expr(w, idents, i, expr)?,
    }
    Ok(())
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
            write!(w, "field {}", idents.get(field.name))?;
            if let Some(ty) = field.ty {
                write!(w, ": {}", idents.get(ty))?;
            }
            writeln!(w)?;
            if let Some(initializer) = &field.initializer {
                print_expr(w, idents, i + 1, initializer)?;
            }
        }
        Member::Method {
            access,
            modifiers,
            function,
        } => {
            sp(w, i)?;
            print_access(w, *access)?;
            print_modifiers(w, *modifiers)?;
            write!(w, "method {}", idents.get(function.name))?;
            print_params(w, idents, &function.params)?;
            writeln!(w)?;
            for stmt in &function.body {
                print_stmt(w, idents, i + 1, stmt)?;
            }
        }
    }
    Ok(())
}

fn print_field(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    field: &Field,
) -> std::io::Result<()> {
    sp(w, i)?;
    write!(w, "field {}", idents.get(field.name))?;
    if let Some(ty) = field.ty {
        write!(w, ": {}", idents.get(ty))?;
    }
    writeln!(w)?;
    if let Some(initializer) = &field.initializer {
        print_expr(w, idents, i + 1, initializer)?;
    }
    Ok(())
}

fn print_style(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    rule: &StyleRule,
) -> std::io::Result<()> {
    sp(w, i)?;
    write!(w, "style ")?;
    for (idx, selector) in rule.selectors.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        write!(w, "{}", idents.get(selector))?;
    }
    writeln!(w)?;
    for property in &rule.properties {
        sp(w, i + 1)?;
        writeln!(w, "property {}", idents.get(property.name))?;
        print_expr(w, idents, i + 2, &property.value)?;
    }
    for child in &rule.children {
        print_style(w, idents, i + 1, child)?;
    }
    Ok(())
}

pub fn print_expr(
    w: &mut impl Write,
    idents: &Interner,
    i: usize,
    expr: &Expr,
) -> std::io::Result<()> {
    sp(w, i)?;
    let span = expr.span;
    match &expr.kind {
        ExprKind::Assignment { target, value } => {
            writeln!(w, "assignment ({span})")?;
            print_expr(w, idents, i + 1, target)?;
            print_expr(w, idents, i + 1, value)?;
        }
        ExprKind::Ternary {
            predicate,
            then_arm,
            else_arm,
        } => {
            writeln!(w, "ternary ({span})")?;
            print_expr(w, idents, i + 1, predicate)?;
            print_expr(w, idents, i + 1, then_arm)?;
            print_expr(w, idents, i + 1, else_arm)?;
        }
        ExprKind::Unary {
            op,
            expr: inner_expr,
        } => {
            writeln!(w, "unary {op:?} ({span})")?;
            print_expr(w, idents, i + 1, inner_expr)?;
        }
        ExprKind::Binary { op, lhs, rhs } => {
            writeln!(w, "binary {op:?} ({span})")?;
            print_expr(w, idents, i + 1, lhs)?;
            print_expr(w, idents, i + 1, rhs)?;
        }
        ExprKind::Call { callee, args } => {
            writeln!(w, "call ({span})")?;
            print_expr(w, idents, i + 1, callee)?;
            if !args.is_empty() {
                sp(w, i + 1)?;
                writeln!(w, "arguments")?;
                for arg in args {
                    print_expr(w, idents, i + 2, arg)?;
                }
            }
        }
        ExprKind::Member { object, field } => {
            writeln!(w, "member {} ({span})", idents.get(field))?;
            print_expr(w, idents, i + 1, object)?;
        }
        ExprKind::Index { object, index } => {
            writeln!(w, "index ({span})")?;
            print_expr(w, idents, i + 1, object)?;
            print_expr(w, idents, i + 1, index)?;
        }
        ExprKind::New { class, args } => {
            writeln!(w, "new {} ({span})", idents.get(class))?;
            if !args.is_empty() {
                sp(w, i + 1)?;
                writeln!(w, "arguments")?;
                for arg in args {
                    print_expr(w, idents, i + 2, arg)?;
                }
            }
        }
        ExprKind::Paren(inner_expr) => {
            writeln!(w, "paren ({span})")?;
            print_expr(w, idents, i + 1, inner_expr)?;
        }
        ExprKind::Id(name) => {
            writeln!(w, "ident {} ({span})", idents.get(name))?;
        }
        ExprKind::Special(name) => {
            writeln!(w, "special ${} ({span})", idents.get(name))?;
        }
        ExprKind::Number(value) => {
            writeln!(w, "number {value} ({span})")?;
        }
        ExprKind::Str(value) => {
            writeln!(w, "string {value:?} ({span})")?;
        }
        ExprKind::Bool(value) => {
            writeln!(w, "bool {value} ({span})")?;
        }
        ExprKind::Nil => {
            writeln!(w, "nil ({span})")?;
        }
        ExprKind::Dummy => {
            writeln!(w, "dummy ({span})")?;
        }
    }
    Ok(())
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

fn sp(w: &mut impl Write, i: usize) -> std::io::Result<()> {
    write!(w, "{:width$}", "", width = i * INDENT_WIDTH)
}
