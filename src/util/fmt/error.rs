use crate::{
    codegen, parser,
    token::{Spanned, TokenKind},
    util::fmt::Show,
};

impl Show for Spanned<codegen::Error> {
    fn show(&self, f: &mut std::fmt::Formatter<'_>, ctx: &super::Context<'_>) -> std::fmt::Result {
        let i = ctx.ident_interner;
        let Spanned { span, inner: error } = self;

        if f.alternate() {
            write!(f, "{span}: ")?;
        }

        use codegen::Error::*;
        match error {
            UndefinedName(name) => {
                let name = i.get(name);
                write!(f, "{name} is not defined")
            }
            AssignToConst(name) => {
                let name = i.get(name);
                write!(f, "cannot assign to constant {name}")
            }
            NotCallable => write!(f, "expression is not callable"),
            ArityMismatch {
                callee,
                expected,
                actual,
            } => {
                let callee = i.get(callee);
                write!(
                    f,
                    "{callee} expects {expected} arguments, but got {actual}"
                )
            }
            BreakOutsideLoop => write!(f, "break outside of a loop"),
            ContinueOutsideLoop => write!(f, "continue outside of a loop"),
            UnknownClass(name) => {
                let name = i.get(name);
                write!(f, "class {name} is not defined")
            }
            NotAClass(name) => {
                let name = i.get(name);
                write!(f, "{name} is not a class")
            }
            ExtendsStruct(name) => {
                let name = i.get(name);
                write!(f, "cannot extend struct {name}")
            }
            UnknownInterface(name) => {
                let name = i.get(name);
                write!(f, "interface {name} is not defined")
            }
            UnknownMethod { class, method } => {
                let method = i.get(method);
                let class = i.get(class);
                write!(f, "undefined method {method} on class {class}")
            }
            UnknownField { class, field } => {
                let field = i.get(field);
                let class = i.get(class);
                write!(f, "undefined field {field} on class {class}")
            }
            MemberOnNonObject(name) => {
                let name = i.get(name);
                write!(f, "member {name} on a value with no statically known class")
            }
            DuplicateType(name) => {
                let name = i.get(name);
                write!(f, "type {name} is already defined")
            }
            DuplicateFunction(name) => {
                let name = i.get(name);
                write!(f, "function {name} is already defined")
            }
            DuplicateField(name) => {
                let name = i.get(name);
                write!(f, "field {name} is already defined")
            }
            DuplicateMethod(name) => {
                let name = i.get(name);
                write!(f, "method {name} is already defined")
            }
            LoweredNameClash(name) => {
                write!(f, "declaration lowers to {name}, which is already taken")
            }
            InterfaceViolation { interface, method } => {
                let method = i.get(method);
                let interface = i.get(interface);
                write!(f, "missing method {method} required by interface {interface}")
            }
            ReservedName(name) => {
                let name = i.get(name);
                write!(f, "{name} is reserved for the program entry")
            }
            NestedDecl => write!(f, "declarations must appear at the top level"),
        }
    }
}

impl Show for Spanned<parser::Error> {
    fn show(&self, f: &mut std::fmt::Formatter<'_>, _: &super::Context<'_>) -> std::fmt::Result {
        let Spanned { span, inner: error } = self;

        if f.alternate() {
            write!(f, "{span}: ")?;
        }

        use parser::Error::*;
        match error {
            InvalidAssignmentTarget => write!(f, "invalid assignment target"),
            UnexpectedTokenInExpr { token } => {
                write!(f, "unexpected token {token:?} in expression")
            }
            Unexpected { actual, expected } => {
                write!(f, "expected token {expected:?}, but got {actual:?}")
            }
            UnexpectedAny { actual, expected } => {
                write!(f, "expected one of {expected:?}, but got {actual:?}")
            }
            UnexpectedOperator { actual } => write!(f, "unexpected operator {actual:?}"),
            ConstWithoutInitializer => write!(f, "const declaration without initializer"),
            EmptyEmit => write!(f, "emit without values"),
            EmptyImplements => write!(f, "implements without interface names"),
            UnknownCommand => write!(f, "unknown command"),
            NumberTooLarge => write!(f, "number literal out of range"),
            Lexer(TokenKind::ErrorUnexpectedChar) => write!(f, "unexpected character"),
            Lexer(TokenKind::ErrorUnclosedString) => write!(f, "unclosed string"),
            Lexer(TokenKind::ErrorUnclosedComment) => write!(f, "unclosed comment"),
            Lexer(TokenKind::ErrorUnescapedLineBreak) => write!(f, "unescaped line break"),
            Lexer(TokenKind::ErrorInvalidEscape) => write!(f, "invalid escape sequence"),
            Lexer(TokenKind::ErrorUnknownSpecial) => write!(f, "unknown special variable"),
            Lexer(TokenKind::ErrorMalformedNumber) => write!(f, "malformed number literal"),
            Lexer(_) => unreachable!("not error token"),
        }
    }
}
