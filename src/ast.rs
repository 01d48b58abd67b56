// program ::= decl* EOF
// decl ::= var-decl | fn-decl | class-decl | struct-decl | interface-decl
//        | style-decl | stmt
//
// var-decl ::= ('let' | 'const') ID ['=' expr] ';'
// fn-decl ::= 'fn' ID '(' [ID (',' ID)*] ')' block-stmt
// class-decl ::= 'class' ID ['extends' ID] ['implements' ID (',' ID)*]
//               '{' member* '}'
// member ::= [access] modifier* (field | method)
// access ::= 'public' | 'private' | 'protected'
// modifier ::= 'static' | 'virtual' | 'override' | 'abstract' | 'final'
// field ::= ID [':' ID] ['=' expr] ';'
// method ::= 'fn' ID '(' [ID (',' ID)*] ')' block-stmt
// struct-decl ::= 'struct' ID '{' field* '}'
// interface-decl ::= 'interface' ID
//                    '{' ('fn' ID '(' [ID (',' ID)*] ')' ';')* '}'
// style-decl ::= 'style' selectors '{' style-item* '}'
// selectors ::= selector (',' selector)*
// selector ::= ['.'] ID
// style-item ::= ID ':' expr ';'
//             | selectors '{' style-item* '}'
//
// stmt ::= block-stmt | if | while | for | for-in
//        | 'break' ';' | 'continue' ';' | 'return' [expr] ';'
//        | set | emit | link | open | navigate | named-block | apply
//        | command | expr ';'
// block-stmt ::= '{' decl* '}'
// if ::= 'if' '(' expr ')' stmt ['else' stmt]
// while ::= 'while' '(' expr ')' stmt
// for ::= 'for' '(' (var-decl | expr ';' | ';') [expr] ';' [expr] ')' stmt
// for-in ::= 'for' ID 'in' expr block-stmt
//
// set ::= ('set' | 'st') (ID | SPECIAL) '=' expr ';'
// emit ::= ('emit' | 'em') expr (',' expr)* ';'
// link ::= ('link' | 'ln') expr '=' expr ';'
// open ::= ('open' | 'op') expr ';'
// navigate ::= ('navigate' | 'nv') expr ';'
// named-block ::= ('block' | 'bk') ID block-stmt
// apply ::= ('apply' | 'ap') selector 'to' expr ';'
// command ::= COMMAND [expr (',' expr)*] ';'
//
// expr ::= assignment
// assignment ::= ternary ['=' assignment]
// ternary ::= binary ['?' expr ':' ternary]
// binary ::= (binary OP binary) | unary
// unary ::= ('!' | '-' | '~' | '+') unary | 'new' ID '(' [args] ')' | postfix
// postfix ::= primary ('(' [args] ')' | '.' ID | '[' expr ']')*
// primary ::= ID | SPECIAL | NUMBER | STRING | 'true' | 'false' | 'nil'
//           | '(' expr ')'
// args ::= expr (',' expr)*

// Precedence (lowest to highest)
//
// =           (right)
// ? :         (right)
// ||
// &&
// == !=
// < <= > >=
// |
// ^
// &
// << >>
// + -
// * / %
// **          (right)
// ! - ~ + new (prefix)
// () . []     (postfix)

use crate::{token::Span, util::intern::Symbol};

#[derive(Debug, PartialEq, Default)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, PartialEq)]
pub enum StmtKind {
    /// A `let` or `const` declaration.
    VarDecl(Binding),
    FnDecl(Function),
    ClassDecl(Class),
    StructDecl {
        name: Ident,
        fields: Vec<Field>,
    },
    InterfaceDecl {
        name: Ident,
        methods: Vec<Signature>,
    },
    StyleDecl(StyleRule),
    /// A plain `{ ... }` statement, introducing a scope.
    Block(Vec<Stmt>),
    If {
        predicate: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        predicate: Expr,
        body: Box<Stmt>,
    },
    /// A C-style `for`. The initializer is a variable declaration or an
    /// expression statement; all three header slots may be empty.
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        binding: Ident,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    /// Legacy `set` assignment. Unlike the assignment expression, the target
    /// may name a variable that doesn't exist yet, in which case a fresh
    /// binding is introduced.
    Set {
        target: SetTarget,
        value: Expr,
    },
    /// Legacy `emit`, printing each value in order.
    Emit {
        /// Non empty list of values.
        values: Vec<Expr>,
    },
    /// Legacy link registration, `link id = url;`.
    Link {
        id: Expr,
        url: Expr,
    },
    Open(Expr),
    Navigate(Expr),
    /// Legacy named block, e.g. `block nav { ... }`. Lowers to a
    /// zero-argument function.
    NamedBlock {
        name: Ident,
        body: Vec<Stmt>,
    },
    /// `apply selector to expr`, attaching a style rule to a target.
    Apply {
        style: Ident,
        target: Expr,
    },
    /// An `@name` toolchain command with its arguments.
    Command {
        name: Ident,
        args: Vec<Expr>,
    },
    Expr(Expr),
}

#[derive(Debug, PartialEq)]
pub struct Binding {
    pub name: Ident,
    pub constant: bool,
    pub initializer: Option<Expr>,
}

/// A class or struct field. The type annotation defaults to `any` when
/// absent.
#[derive(Debug, PartialEq)]
pub struct Field {
    pub name: Ident,
    pub ty: Option<Ident>,
    pub initializer: Option<Expr>,
}

#[derive(Debug, PartialEq)]
pub struct Function {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
}

/// A method signature, as declared in an interface.
#[derive(Debug, PartialEq)]
pub struct Signature {
    pub name: Ident,
    pub params: Vec<Ident>,
}

#[derive(Debug, PartialEq)]
pub struct Class {
    pub name: Ident,
    pub extends: Option<Ident>,
    pub implements: Vec<Ident>,
    pub members: Vec<Member>,
}

#[derive(Debug, PartialEq)]
pub enum Member {
    Field {
        access: Access,
        modifiers: Modifiers,
        field: Field,
    },
    Method {
        access: Access,
        modifiers: Modifiers,
        function: Function,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Public,
    Private,
    Protected,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_abstract: bool,
    pub is_final: bool,
}

/// A style rule. Rules nest; a child rule's effective selectors are each of
/// its own selectors appended to each of the parent's.
#[derive(Debug, PartialEq)]
pub struct StyleRule {
    pub selectors: Vec<Ident>,
    pub properties: Vec<StyleProperty>,
    pub children: Vec<StyleRule>,
}

#[derive(Debug, PartialEq)]
pub struct StyleProperty {
    pub name: Ident,
    pub value: Expr,
}

#[derive(Debug, PartialEq)]
pub enum SetTarget {
    Name(Ident),
    Special(Ident),
}

#[derive(Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn dummy(span: Span) -> Expr {
        Expr {
            kind: ExprKind::Dummy,
            span,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ExprKind {
    Assignment {
        /// The place being assigned. The parser only accepts identifiers,
        /// special variables, member accesses and index expressions here.
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Ternary {
        predicate: Box<Expr>,
        then_arm: Box<Expr>,
        else_arm: Box<Expr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOperator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: Ident,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    New {
        class: Ident,
        args: Vec<Expr>,
    },
    Paren(Box<Expr>),
    Id(Ident),
    /// A `$name` special variable reference.
    Special(Ident),
    Number(f64),
    Str(Box<str>),
    Bool(bool),
    Nil,
    Dummy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
    BitNot,
    /// Unary `+`; lowers to its operand unchanged.
    Plus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Eq,
    Neq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ident {
    pub name: Symbol,
    pub span: Span,
}

impl From<Ident> for Symbol {
    fn from(value: Ident) -> Self {
        value.name
    }
}

impl From<&Ident> for Symbol {
    fn from(value: &Ident) -> Self {
        value.name
    }
}
