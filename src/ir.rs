//! The generated intermediate representation: functions made of basic
//! blocks, a deduplicating constant pool, and the declared runtime surface,
//! all rendered to text through `Display`.

use std::{
    collections::{HashMap, HashSet},
    fmt, mem,
    rc::Rc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstRef(pub u32);

impl fmt::Display for ConstRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct IrModule {
    pub name: Box<str>,
    pub constants: ConstantPool,
    /// Runtime primitives referenced by the module, in first-use order.
    pub runtime: Vec<RuntimeFn>,
    /// One struct type per class layout.
    pub structs: Vec<StructType>,
    /// Global cell names; the cell index is the position in this list.
    pub globals: Vec<Box<str>>,
    pub functions: Vec<Function>,
    /// Index of the entry function.
    pub entry: usize,
}

impl IrModule {
    pub fn new(name: impl Into<Box<str>>) -> IrModule {
        IrModule {
            name: name.into(),
            constants: ConstantPool::new(),
            runtime: Vec::new(),
            structs: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            entry: 0,
        }
    }

    /// Records a runtime primitive the module calls. Duplicates are kept
    /// out so the declaration list stays in first-use order.
    pub fn declare_runtime(&mut self, runtime: RuntimeFn) {
        if !self.runtime.contains(&runtime) {
            self.runtime.push(runtime);
        }
    }

    /// Appends a function and returns its index.
    pub fn add_function(&mut self, function: Function) -> usize {
        self.functions.push(function);
        self.functions.len() - 1
    }
}

/// The structural layout of a class, as seen by a downstream emitter. The
/// dispatch slot is implicit: every object carries it at slot zero, ahead
/// of the names listed here.
#[derive(Debug, Clone)]
pub struct StructType {
    pub name: Box<str>,
    pub fields: Vec<Box<str>>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Box<str>,
    /// Parameter count; parameters arrive in `%0 .. %params`.
    pub params: u32,
    pub blocks: Vec<Block>,
    /// Total virtual register count, parameters included.
    pub vregs: u32,
}

impl Function {
    fn label(&self, block: BlockRef) -> &str {
        &self.blocks[block.0 as usize].label
    }
}

/// A sealed basic block. Its terminator is part of the value, so a block
/// with zero or two terminators cannot be represented.
#[derive(Debug, Clone)]
pub struct Block {
    pub label: Box<str>,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone)]
pub enum Terminator {
    Br {
        target: BlockRef,
    },
    BrIf {
        cond: VReg,
        then_tgt: BlockRef,
        else_tgt: BlockRef,
    },
    /// Returns `value`, or nil when absent.
    Ret {
        value: Option<VReg>,
    },
}

#[derive(Debug, Clone)]
pub enum Instruction {
    /// Loads a pooled constant.
    Const { dst: VReg, src: ConstRef },
    Bool { dst: VReg, imm: bool },
    Nil { dst: VReg },
    Mov { dst: VReg, src: VReg },
    Unary { dst: VReg, op: UnaryOp, src: VReg },
    Binary { dst: VReg, op: BinaryOp, a: VReg, b: VReg },
    /// Reads a local stack slot.
    Load { dst: VReg, slot: u32 },
    Store { slot: u32, src: VReg },
    LoadGlobal { dst: VReg, cell: u32 },
    StoreGlobal { cell: u32, src: VReg },
    /// Allocates an object of the named class.
    New { dst: VReg, class: Box<str> },
    /// Reads an object field by slot index.
    GetField { dst: VReg, object: VReg, index: u32 },
    SetField { object: VReg, index: u32, src: VReg },
    Call {
        dst: Option<VReg>,
        callee: Callee,
        args: Vec<VReg>,
    },
}

#[derive(Debug, Clone)]
pub enum Callee {
    /// A function defined in this module, by name.
    Function(Box<str>),
    Runtime(RuntimeFn),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Function(name) => write!(f, "{name}"),
            Callee::Runtime(runtime) => write!(f, "@{}", runtime.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
            UnaryOp::BNot => "bnot",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::Pow => "pow",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::BAnd => "band",
            BinaryOp::BOr => "bor",
            BinaryOp::BXor => "bxor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
        })
    }
}

/// The runtime-support surface the generated module may call into. The
/// module declares the subset it actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFn {
    Print,
    PrintLn,
    Truthy,
    StrLen,
    Alloc,
    StrCopy,
    StrCat,
    LinkCreate,
    LinkOpen,
    LinkNavigate,
    StyleRule,
    StyleApply,
    IndexGet,
    IndexSet,
    IterNew,
    IterHas,
    IterNext,
    Command,
}

impl RuntimeFn {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeFn::Print => "print",
            RuntimeFn::PrintLn => "print_ln",
            RuntimeFn::Truthy => "truthy",
            RuntimeFn::StrLen => "str_len",
            RuntimeFn::Alloc => "alloc",
            RuntimeFn::StrCopy => "str_copy",
            RuntimeFn::StrCat => "str_cat",
            RuntimeFn::LinkCreate => "link_create",
            RuntimeFn::LinkOpen => "link_open",
            RuntimeFn::LinkNavigate => "link_navigate",
            RuntimeFn::StyleRule => "style_rule",
            RuntimeFn::StyleApply => "style_apply",
            RuntimeFn::IndexGet => "index_get",
            RuntimeFn::IndexSet => "index_set",
            RuntimeFn::IterNew => "iter_new",
            RuntimeFn::IterHas => "iter_has",
            RuntimeFn::IterNext => "iter_next",
            RuntimeFn::Command => "command",
        }
    }

    /// Fixed parameter count, or `None` for the variadic `command`.
    pub fn arity(self) -> Option<u32> {
        match self {
            RuntimeFn::PrintLn => Some(0),
            RuntimeFn::Print
            | RuntimeFn::Truthy
            | RuntimeFn::StrLen
            | RuntimeFn::Alloc
            | RuntimeFn::LinkOpen
            | RuntimeFn::LinkNavigate
            | RuntimeFn::IterNew
            | RuntimeFn::IterHas
            | RuntimeFn::IterNext => Some(1),
            RuntimeFn::StrCopy
            | RuntimeFn::StrCat
            | RuntimeFn::LinkCreate
            | RuntimeFn::StyleApply
            | RuntimeFn::IndexGet => Some(2),
            RuntimeFn::StyleRule | RuntimeFn::IndexSet => Some(3),
            RuntimeFn::Command => None,
        }
    }
}

/// Deduplicating pool over literal constants. Numbers are keyed by their
/// bit pattern, strings by value: interning an equal value twice yields the
/// same slot, and distinct values never share one.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    nums: HashMap<u64, ConstRef>,
    strs: HashMap<Rc<str>, ConstRef>,
    values: Vec<Constant>,
}

#[derive(Debug, Clone)]
pub enum Constant {
    Num(f64),
    Str(Rc<str>),
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool::default()
    }

    pub fn intern_num(&mut self, value: f64) -> ConstRef {
        if let Some(&slot) = self.nums.get(&value.to_bits()) {
            return slot;
        }
        let slot = ConstRef(self.values.len() as u32);
        self.nums.insert(value.to_bits(), slot);
        self.values.push(Constant::Num(value));
        slot
    }

    pub fn intern_str(&mut self, value: &str) -> ConstRef {
        if let Some(&slot) = self.strs.get(value) {
            return slot;
        }
        let slot = ConstRef(self.values.len() as u32);
        let value: Rc<str> = Rc::from(value);
        self.strs.insert(Rc::clone(&value), slot);
        self.values.push(Constant::Str(value));
        slot
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstRef, &Constant)> {
        self.values
            .iter()
            .enumerate()
            .map(|(ix, constant)| (ConstRef(ix as u32), constant))
    }
}

/// Builds one function's control-flow graph.
///
/// Only an [`OpenBlock`] accepts instructions. Sealing a block through
/// [`br`](FuncBuilder::br), [`br_if`](FuncBuilder::br_if) or
/// [`ret`](FuncBuilder::ret) consumes it together with its terminator, so
/// emitting past a terminator does not compile, and every sealed block has
/// exactly one terminator by construction.
#[derive(Debug)]
pub struct FuncBuilder {
    name: Box<str>,
    params: u32,
    vregs: u32,
    slots: Vec<Slot>,
}

#[derive(Debug)]
enum Slot {
    /// Created but not yet sealed; holds the label for diagnostics.
    Pending(Box<str>),
    Sealed(Block),
}

impl FuncBuilder {
    pub fn new(name: impl Into<Box<str>>, params: u32) -> FuncBuilder {
        FuncBuilder {
            name: name.into(),
            params,
            // Parameters occupy the first `params` registers.
            vregs: params,
            slots: Vec::new(),
        }
    }

    /// Allocates a fresh virtual register.
    pub fn new_vreg(&mut self) -> VReg {
        let vreg = VReg(self.vregs);
        self.vregs += 1;
        vreg
    }

    /// Creates a block and hands back its open form. The first block
    /// created is the function's entry. The label is suffixed with the
    /// block index so labels stay unique within the function.
    pub fn new_block(&mut self, label: &str) -> OpenBlock {
        let id = BlockRef(self.slots.len() as u32);
        self.slots.push(Slot::Pending(format!("{label}{}", id.0).into()));
        OpenBlock {
            id,
            instructions: Vec::new(),
        }
    }

    /// Seals `block` with an unconditional branch.
    pub fn br(&mut self, block: OpenBlock, target: BlockRef) {
        self.seal(block, Terminator::Br { target });
    }

    /// Seals `block` with a conditional branch.
    pub fn br_if(&mut self, block: OpenBlock, cond: VReg, then_tgt: BlockRef, else_tgt: BlockRef) {
        self.seal(
            block,
            Terminator::BrIf {
                cond,
                then_tgt,
                else_tgt,
            },
        );
    }

    /// Seals `block` with a return.
    pub fn ret(&mut self, block: OpenBlock, value: Option<VReg>) {
        self.seal(block, Terminator::Ret { value });
    }

    fn seal(&mut self, block: OpenBlock, terminator: Terminator) {
        let slot = &mut self.slots[block.id.0 as usize];
        let Slot::Pending(label) = slot else {
            // A block can only be sealed through its unique `OpenBlock`.
            unreachable!("block sealed twice");
        };
        *slot = Slot::Sealed(Block {
            label: mem::take(label),
            instructions: block.instructions,
            terminator,
        });
    }

    /// Finalizes the function.
    ///
    /// Panics if no block was ever created or if some block was never
    /// sealed; both indicate a bug in the caller.
    pub fn finish(self) -> Function {
        assert!(
            !self.slots.is_empty(),
            "function `{}` has no entry block",
            self.name
        );
        let blocks = self
            .slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Sealed(block) => block,
                Slot::Pending(label) => panic!("block `{label}` was never sealed"),
            })
            .collect();
        Function {
            name: self.name,
            params: self.params,
            blocks,
            vregs: self.vregs,
        }
    }
}

/// A block that still accepts instructions. Sealing it (see [`FuncBuilder`])
/// takes ownership, after which it cannot be touched again.
#[derive(Debug)]
pub struct OpenBlock {
    id: BlockRef,
    instructions: Vec<Instruction>,
}

impl OpenBlock {
    pub fn id(&self) -> BlockRef {
        self.id
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }
}

/// Re-checks the structural invariants of a generated module: the entry
/// function exists, function names are unique, every branch target and
/// operand register is in range, constants come from the pool, and every
/// callee is defined (or declared, for runtime primitives) with a matching
/// arity.
pub fn validate(module: &IrModule) -> Result<(), String> {
    if module.functions.get(module.entry).is_none() {
        return Err(format!("entry function {} out of range", module.entry));
    }
    // Calls resolve by name, so a duplicate would shadow its namesake.
    let mut names = HashSet::with_capacity(module.functions.len());
    for function in &module.functions {
        if !names.insert(&function.name) {
            return Err(format!("duplicate function `{}`", function.name));
        }
    }
    for function in &module.functions {
        validate_function(module, function)?;
    }
    Ok(())
}

fn validate_function(module: &IrModule, function: &Function) -> Result<(), String> {
    let fail = |message: String| Err(format!("fn {}: {message}", function.name));
    let check_vreg = |vreg: VReg| {
        if vreg.0 < function.vregs {
            Ok(())
        } else {
            fail(format!("vreg {vreg} out of range"))
        }
    };
    let check_block = |block: BlockRef| {
        if (block.0 as usize) < function.blocks.len() {
            Ok(())
        } else {
            fail(format!("branch to unknown block {}", block.0))
        }
    };
    let check_cell = |cell: u32| {
        if (cell as usize) < module.globals.len() {
            Ok(())
        } else {
            fail(format!("global cell g{cell} out of range"))
        }
    };

    if function.blocks.is_empty() {
        return fail("no blocks".into());
    }
    for block in &function.blocks {
        for instruction in &block.instructions {
            match instruction {
                Instruction::Const { dst, src } => {
                    check_vreg(*dst)?;
                    if (src.0 as usize) >= module.constants.len() {
                        return fail(format!("constant {src} not in pool"));
                    }
                }
                Instruction::Bool { dst, .. } | Instruction::Nil { dst } => check_vreg(*dst)?,
                Instruction::Mov { dst, src } | Instruction::Unary { dst, src, .. } => {
                    check_vreg(*dst)?;
                    check_vreg(*src)?;
                }
                Instruction::Binary { dst, a, b, .. } => {
                    check_vreg(*dst)?;
                    check_vreg(*a)?;
                    check_vreg(*b)?;
                }
                Instruction::Load { dst, .. } => check_vreg(*dst)?,
                Instruction::Store { src, .. } => check_vreg(*src)?,
                Instruction::LoadGlobal { dst, cell } => {
                    check_vreg(*dst)?;
                    check_cell(*cell)?;
                }
                Instruction::StoreGlobal { cell, src } => {
                    check_vreg(*src)?;
                    check_cell(*cell)?;
                }
                Instruction::New { dst, class } => {
                    check_vreg(*dst)?;
                    if !module.structs.iter().any(|s| s.name == *class) {
                        return fail(format!("new of unknown class `{class}`"));
                    }
                }
                Instruction::GetField { dst, object, .. } => {
                    check_vreg(*dst)?;
                    check_vreg(*object)?;
                }
                Instruction::SetField { object, src, .. } => {
                    check_vreg(*object)?;
                    check_vreg(*src)?;
                }
                Instruction::Call { dst, callee, args } => {
                    if let Some(dst) = dst {
                        check_vreg(*dst)?;
                    }
                    for arg in args {
                        check_vreg(*arg)?;
                    }
                    match callee {
                        Callee::Function(name) => {
                            let Some(target) =
                                module.functions.iter().find(|f| f.name == *name)
                            else {
                                return fail(format!("call to unknown function `{name}`"));
                            };
                            if args.len() as u32 != target.params {
                                return fail(format!(
                                    "call to `{name}` with {} args, expected {}",
                                    args.len(),
                                    target.params
                                ));
                            }
                        }
                        Callee::Runtime(runtime) => {
                            if !module.runtime.contains(runtime) {
                                return fail(format!(
                                    "call to undeclared runtime fn @{}",
                                    runtime.name()
                                ));
                            }
                            if let Some(arity) = runtime.arity() {
                                if args.len() as u32 != arity {
                                    return fail(format!(
                                        "call to @{} with {} args, expected {arity}",
                                        runtime.name(),
                                        args.len()
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }
        match &block.terminator {
            Terminator::Br { target } => check_block(*target)?,
            Terminator::BrIf {
                cond,
                then_tgt,
                else_tgt,
            } => {
                check_vreg(*cond)?;
                check_block(*then_tgt)?;
                check_block(*else_tgt)?;
            }
            Terminator::Ret { value } => {
                if let Some(value) = value {
                    check_vreg(*value)?;
                }
            }
        }
    }
    Ok(())
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} {{", self.name)?;

        let mut wrote = false;
        if !self.constants.is_empty() {
            for (slot, constant) in self.constants.iter() {
                match constant {
                    Constant::Num(value) => writeln!(f, "  const {slot}: num = {value}")?,
                    Constant::Str(value) => writeln!(f, "  const {slot}: str = {value:?}")?,
                }
            }
            wrote = true;
        }
        if !self.runtime.is_empty() {
            if wrote {
                writeln!(f)?;
            }
            for runtime in &self.runtime {
                match runtime.arity() {
                    Some(arity) => writeln!(f, "  declare @{}({arity})", runtime.name())?,
                    None => writeln!(f, "  declare @{}(...)", runtime.name())?,
                }
            }
            wrote = true;
        }
        if !self.structs.is_empty() {
            if wrote {
                writeln!(f)?;
            }
            for s in &self.structs {
                write!(f, "  struct {} {{ dispatch", s.name)?;
                for field in &s.fields {
                    write!(f, ", {field}")?;
                }
                writeln!(f, " }}")?;
            }
            wrote = true;
        }
        if !self.globals.is_empty() {
            if wrote {
                writeln!(f)?;
            }
            for global in &self.globals {
                writeln!(f, "  global {global}")?;
            }
            wrote = true;
        }
        if !self.functions.is_empty() {
            if wrote {
                writeln!(f)?;
            }
            for function in &self.functions {
                write!(f, "{function}")?;
            }
        }

        writeln!(f, "}}")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  fn {}(", self.name)?;
        for param in 0..self.params {
            if param > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", VReg(param))?;
        }
        writeln!(f, ") {{")?;

        for block in &self.blocks {
            writeln!(f, "    {}:", block.label)?;
            for instruction in &block.instructions {
                writeln!(f, "      {instruction}")?;
            }
            match &block.terminator {
                Terminator::Br { target } => writeln!(f, "      br {}", self.label(*target))?,
                Terminator::BrIf {
                    cond,
                    then_tgt,
                    else_tgt,
                } => writeln!(
                    f,
                    "      br_if {cond}, {}, {}",
                    self.label(*then_tgt),
                    self.label(*else_tgt)
                )?,
                Terminator::Ret { value: Some(value) } => writeln!(f, "      ret {value}")?,
                Terminator::Ret { value: None } => writeln!(f, "      ret")?,
            }
        }

        writeln!(f, "  }}")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Const { dst, src } => write!(f, "{dst} = const {src}"),
            Instruction::Bool { dst, imm } => write!(f, "{dst} = bool {imm}"),
            Instruction::Nil { dst } => write!(f, "{dst} = nil"),
            Instruction::Mov { dst, src } => write!(f, "{dst} = mov {src}"),
            Instruction::Unary { dst, op, src } => write!(f, "{dst} = {op} {src}"),
            Instruction::Binary { dst, op, a, b } => write!(f, "{dst} = {op} {a}, {b}"),
            Instruction::Load { dst, slot } => write!(f, "{dst} = load l{slot}"),
            Instruction::Store { slot, src } => write!(f, "store l{slot}, {src}"),
            Instruction::LoadGlobal { dst, cell } => write!(f, "{dst} = load.global g{cell}"),
            Instruction::StoreGlobal { cell, src } => write!(f, "store.global g{cell}, {src}"),
            Instruction::New { dst, class } => write!(f, "{dst} = new {class}"),
            Instruction::GetField { dst, object, index } => {
                write!(f, "{dst} = getf {object}, {index}")
            }
            Instruction::SetField { object, index, src } => {
                write!(f, "setf {object}, {index}, {src}")
            }
            Instruction::Call { dst, callee, args } => {
                if let Some(dst) = dst {
                    write!(f, "{dst} = ")?;
                }
                write!(f, "call {callee}(")?;
                for (ix, arg) in args.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn constant_pool_dedups_by_value() {
        let mut pool = ConstantPool::new();

        let banner = pool.intern_str("banner");
        let banner_again = pool.intern_str("banner");
        let hero = pool.intern_str("hero");
        assert_eq!(banner, banner_again);
        assert_ne!(banner, hero);

        let ten = pool.intern_num(10.0);
        let ten_again = pool.intern_num(10.0);
        let five = pool.intern_num(5.0);
        assert_eq!(ten, ten_again);
        assert_ne!(ten, five);

        // Numbers are keyed by bit pattern.
        assert_ne!(pool.intern_num(0.0), pool.intern_num(-0.0));

        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn builds_a_diamond_that_validates() {
        let mut fb = FuncBuilder::new("main", 0);
        let mut entry = fb.new_block("entry");
        let mut then_side = fb.new_block("then");
        let mut else_side = fb.new_block("else");
        let merge = fb.new_block("merge");

        let cond = fb.new_vreg();
        entry.emit(Instruction::Bool {
            dst: cond,
            imm: true,
        });
        fb.br_if(entry, cond, then_side.id(), else_side.id());

        let a = fb.new_vreg();
        then_side.emit(Instruction::Nil { dst: a });
        fb.br(then_side, merge.id());

        let b = fb.new_vreg();
        else_side.emit(Instruction::Nil { dst: b });
        fb.br(else_side, merge.id());

        fb.ret(merge, None);

        let function = fb.finish();
        assert_eq!(function.blocks.len(), 4);

        let mut module = IrModule::new("main");
        module.entry = module.add_function(function);
        assert_eq!(validate(&module), Ok(()));
    }

    #[test]
    #[should_panic(expected = "never sealed")]
    fn finishing_with_an_unsealed_block_panics() {
        let mut fb = FuncBuilder::new("broken", 0);
        let entry = fb.new_block("entry");
        let _orphan = fb.new_block("merge");
        fb.ret(entry, None);
        fb.finish();
    }

    #[test]
    fn validate_flags_out_of_range_operands() {
        let mut fb = FuncBuilder::new("main", 0);
        let mut entry = fb.new_block("entry");
        entry.emit(Instruction::Mov {
            dst: VReg(7),
            src: VReg(8),
        });
        fb.ret(entry, None);

        let mut module = IrModule::new("main");
        module.entry = module.add_function(fb.finish());
        assert!(validate(&module).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_function_names() {
        let ret_nil = || {
            let mut fb = FuncBuilder::new("twice", 0);
            let entry = fb.new_block("entry");
            fb.ret(entry, None);
            fb.finish()
        };

        let mut module = IrModule::new("main");
        module.entry = module.add_function(ret_nil());
        assert_eq!(validate(&module), Ok(()));

        module.add_function(ret_nil());
        assert!(validate(&module).is_err());
    }

    #[test]
    fn validate_requires_runtime_declarations() {
        let mut fb = FuncBuilder::new("main", 0);
        let mut entry = fb.new_block("entry");
        let value = fb.new_vreg();
        entry.emit(Instruction::Nil { dst: value });
        entry.emit(Instruction::Call {
            dst: None,
            callee: Callee::Runtime(RuntimeFn::Print),
            args: vec![value],
        });
        fb.ret(entry, None);

        let mut module = IrModule::new("main");
        module.entry = module.add_function(fb.finish());
        assert!(validate(&module).is_err());

        module.declare_runtime(RuntimeFn::Print);
        assert_eq!(validate(&module), Ok(()));
    }

    #[test]
    fn renders_module_text() {
        let mut module = IrModule::new("main");
        let ten = module.constants.intern_num(10.0);
        module.globals.push("x".into());
        module.declare_runtime(RuntimeFn::Print);
        module.declare_runtime(RuntimeFn::PrintLn);
        module.declare_runtime(RuntimeFn::Print);

        let mut fb = FuncBuilder::new("main", 0);
        let mut entry = fb.new_block("entry");
        let value = fb.new_vreg();
        entry.emit(Instruction::Const {
            dst: value,
            src: ten,
        });
        entry.emit(Instruction::StoreGlobal { cell: 0, src: value });
        let loaded = fb.new_vreg();
        entry.emit(Instruction::LoadGlobal {
            dst: loaded,
            cell: 0,
        });
        entry.emit(Instruction::Call {
            dst: None,
            callee: Callee::Runtime(RuntimeFn::Print),
            args: vec![loaded],
        });
        entry.emit(Instruction::Call {
            dst: None,
            callee: Callee::Runtime(RuntimeFn::PrintLn),
            args: vec![],
        });
        fb.ret(entry, None);
        module.entry = module.add_function(fb.finish());

        assert_eq!(
            module.to_string(),
            indoc! {r#"
                module main {
                  const c0: num = 10

                  declare @print(1)
                  declare @print_ln(0)

                  global x

                  fn main() {
                    entry0:
                      %0 = const c0
                      store.global g0, %0
                      %1 = load.global g0
                      call @print(%1)
                      call @print_ln()
                      ret
                  }
                }
            "#}
        );
    }
}
