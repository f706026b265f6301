//! Typed three-address program representation consumed by the engine.
//!
//! A [`Program`] is a list of types and a list of functions. Each function
//! owns its variables and a list of basic blocks; every block ends with a
//! terminator instruction (`Jmp`, `Cond`, `Ret` or `Abort`). Nothing here
//! parses source code; programs are assembled with [`ProgramBuilder`] and
//! [`FncBuilder`].
//!
//! ```rust
//! use fa_rs::program::{FncBuilder, Insn, Operand, ProgramBuilder};
//!
//! let mut program = ProgramBuilder::new();
//! let int = program.int();
//!
//! let mut main = FncBuilder::new("main");
//! let x = main.var("x", int);
//! let entry = main.block("entry");
//! main.push(entry, Insn::assign(Operand::var(x, int), Operand::int(1, int)));
//! main.push(entry, Insn::ret());
//! program.function(main.build());
//!
//! let program = program.build();
//! assert!(program.fnc_by_name("main").is_some());
//! ```
use std::fmt;

use crate::label::SelData;

/// Source location of an instruction.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct Location {
    pub file: Option<String>,
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:", file, self.line),
            None => write!(f, "<unknown location>:"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(pub usize);

impl TypeRef {
    /// The `void` type; always the first type of a program.
    pub const VOID: TypeRef = TypeRef(0);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Int,
    Bool,
    Ptr(TypeRef),
    Struct(Vec<Field>),
    Fnc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub name: Option<String>,
    pub size: usize,
    pub kind: TypeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub ty: TypeRef,
}

/// One step of an operand's access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// Follow the pointer.
    Deref,
    /// Move to the field at the given byte offset.
    Item(usize),
    /// Take the address.
    Ref,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Int(i64),
    Bool(bool),
    Null,
    Fnc(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand, e.g. the ignored result of a call.
    Void,
    Var(VarId),
    Cst(Constant),
}

/// Operand: a variable or constant followed by an access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    /// Type of the whole operand, i.e. after all accessors.
    pub ty: TypeRef,
    pub accessors: Vec<Accessor>,
}

impl Operand {
    pub fn void() -> Self {
        Self {
            kind: OperandKind::Void,
            ty: TypeRef::VOID,
            accessors: vec![],
        }
    }
    pub fn var(var: VarId, ty: TypeRef) -> Self {
        Self {
            kind: OperandKind::Var(var),
            ty,
            accessors: vec![],
        }
    }
    pub fn cst(cst: Constant, ty: TypeRef) -> Self {
        Self {
            kind: OperandKind::Cst(cst),
            ty,
            accessors: vec![],
        }
    }
    pub fn int(value: i64, ty: TypeRef) -> Self {
        Self::cst(Constant::Int(value), ty)
    }
    pub fn null(ty: TypeRef) -> Self {
        Self::cst(Constant::Null, ty)
    }
    pub fn fnc(name: impl Into<String>) -> Self {
        Self::cst(Constant::Fnc(name.into()), TypeRef::VOID)
    }

    /// `(*self).offset` with the resulting type `ty`.
    pub fn field(mut self, offset: usize, ty: TypeRef) -> Self {
        self.accessors.push(Accessor::Deref);
        self.accessors.push(Accessor::Item(offset));
        self.ty = ty;
        self
    }

    /// `*self` with the resulting type `ty`.
    pub fn deref(mut self, ty: TypeRef) -> Self {
        self.accessors.push(Accessor::Deref);
        self.ty = ty;
        self
    }

    pub fn is_void(&self) -> bool {
        self.kind == OperandKind::Void
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Assign,
    TruthNot,
    BitNot,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Mult,
    PointerPlus,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Mult => "*",
            BinaryOp::PointerPlus => "+p",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnCode {
    Unop(UnaryOp),
    Binop(BinaryOp),
    /// Operands: destination, callee, arguments.
    Call,
    Ret,
    Jmp,
    /// Operand: condition; targets: then, else.
    Cond,
    Abort,
}

#[derive(Debug, Clone)]
pub struct Insn {
    pub code: InsnCode,
    pub operands: Vec<Operand>,
    pub targets: Vec<BlockId>,
    pub loc: Location,
    /// Variables dead after this instruction.
    pub kills: Vec<VarId>,
}

impl Insn {
    fn new(code: InsnCode, operands: Vec<Operand>, targets: Vec<BlockId>) -> Self {
        Self {
            code,
            operands,
            targets,
            loc: Location::default(),
            kills: vec![],
        }
    }

    pub fn assign(dst: Operand, src: Operand) -> Self {
        Self::unop(UnaryOp::Assign, dst, src)
    }
    pub fn unop(op: UnaryOp, dst: Operand, src: Operand) -> Self {
        Self::new(InsnCode::Unop(op), vec![dst, src], vec![])
    }
    pub fn binop(op: BinaryOp, dst: Operand, a: Operand, b: Operand) -> Self {
        Self::new(InsnCode::Binop(op), vec![dst, a, b], vec![])
    }
    pub fn call(dst: Operand, fnc: &str, args: Vec<Operand>) -> Self {
        let mut operands = vec![dst, Operand::fnc(fnc)];
        operands.extend(args);
        Self::new(InsnCode::Call, operands, vec![])
    }
    pub fn jmp(target: BlockId) -> Self {
        Self::new(InsnCode::Jmp, vec![], vec![target])
    }
    pub fn cond(cond: Operand, then_target: BlockId, else_target: BlockId) -> Self {
        Self::new(InsnCode::Cond, vec![cond], vec![then_target, else_target])
    }
    pub fn ret() -> Self {
        Self::new(InsnCode::Ret, vec![], vec![])
    }
    pub fn abort() -> Self {
        Self::new(InsnCode::Abort, vec![], vec![])
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }

    pub fn kill(mut self, vars: impl IntoIterator<Item = VarId>) -> Self {
        self.kills.extend(vars);
        self
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.code, InsnCode::Ret | InsnCode::Jmp | InsnCode::Cond | InsnCode::Abort)
    }
}

/// Unique identifier for a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub insns: Vec<Insn>,
}

#[derive(Debug, Clone)]
pub struct Fnc {
    pub name: String,
    pub vars: Vec<Var>,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
}

impl Fnc {
    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.0]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    /// Control-flow successors of a block.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).insns.last().map(|i| i.targets.clone()).unwrap_or_default()
    }

    fn describe_operand(&self, op: &Operand) -> String {
        let mut s = match &op.kind {
            OperandKind::Void => return String::new(),
            OperandKind::Var(v) => self.var(*v).name.clone(),
            OperandKind::Cst(Constant::Int(i)) => i.to_string(),
            OperandKind::Cst(Constant::Bool(b)) => b.to_string(),
            OperandKind::Cst(Constant::Null) => "NULL".to_string(),
            OperandKind::Cst(Constant::Fnc(name)) => name.clone(),
        };
        for acc in &op.accessors {
            s = match acc {
                Accessor::Deref => format!("(*{})", s),
                Accessor::Item(offset) => format!("{}.{}", s, offset),
                Accessor::Ref => format!("&{}", s),
            };
        }
        s
    }

    /// Human-readable form of an instruction of this function.
    pub fn describe_insn(&self, insn: &Insn) -> String {
        let ops: Vec<String> = insn.operands.iter().map(|o| self.describe_operand(o)).collect();
        match insn.code {
            InsnCode::Unop(UnaryOp::Assign) => format!("{} = {}", ops[0], ops[1]),
            InsnCode::Unop(UnaryOp::TruthNot) => format!("{} = !{}", ops[0], ops[1]),
            InsnCode::Unop(UnaryOp::BitNot) => format!("{} = ~{}", ops[0], ops[1]),
            InsnCode::Unop(UnaryOp::Minus) => format!("{} = -{}", ops[0], ops[1]),
            InsnCode::Binop(op) => format!("{} = {} {} {}", ops[0], ops[1], op, ops[2]),
            InsnCode::Call => {
                let call = format!("{}({})", ops[1], ops[2..].join(", "));
                if insn.operands[0].is_void() {
                    call
                } else {
                    format!("{} = {}", ops[0], call)
                }
            }
            InsnCode::Ret => "return".to_string(),
            InsnCode::Jmp => format!("goto {}", insn.targets[0]),
            InsnCode::Cond => format!("if ({}) goto {} else goto {}", ops[0], insn.targets[0], insn.targets[1]),
            InsnCode::Abort => "abort".to_string(),
        }
    }
}

/// Position of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramPoint {
    pub fnc: usize,
    pub block: BlockId,
    pub insn: usize,
}

impl ProgramPoint {
    pub fn new(fnc: usize, block: BlockId, insn: usize) -> Self {
        Self { fnc, block, insn }
    }

    /// First instruction of `block`.
    pub fn block_start(fnc: usize, block: BlockId) -> Self {
        Self::new(fnc, block, 0)
    }

    /// The following instruction in the same block.
    pub fn next(self) -> Self {
        Self { insn: self.insn + 1, ..self }
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}:{}:{}", self.fnc, self.block, self.insn)
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub types: Vec<Type>,
    pub fncs: Vec<Fnc>,
}

impl Program {
    pub fn ty(&self, r: TypeRef) -> &Type {
        &self.types[r.0]
    }

    pub fn fnc(&self, index: usize) -> &Fnc {
        &self.fncs[index]
    }

    pub fn fnc_by_name(&self, name: &str) -> Option<usize> {
        self.fncs.iter().position(|f| f.name == name)
    }

    pub fn insn(&self, point: ProgramPoint) -> &Insn {
        &self.fnc(point.fnc).block(point.block).insns[point.insn]
    }

    /// Name under which a type is known to the registry.
    pub fn type_name(&self, r: TypeRef) -> String {
        self.ty(r).name.clone().unwrap_or_else(|| format!("type{}", r.0))
    }

    /// Struct types of the program.
    pub fn structs(&self) -> impl Iterator<Item = TypeRef> + '_ {
        self.types
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t.kind, TypeKind::Struct(_)))
            .map(|(i, _)| TypeRef(i))
    }

    /// Pointed-to type of a pointer type.
    pub fn pointee(&self, r: TypeRef) -> Option<TypeRef> {
        match self.ty(r).kind {
            TypeKind::Ptr(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_void_ptr(&self, r: TypeRef) -> bool {
        self.pointee(r).is_some_and(|t| self.ty(t).kind == TypeKind::Void)
    }

    /// Selectors of a value of type `r` laid out at byte offset `base`.
    pub fn selectors(&self, r: TypeRef, base: usize) -> Vec<SelData> {
        let mut out = Vec::new();
        self.collect_selectors(r, base, &mut out);
        out
    }

    fn collect_selectors(&self, r: TypeRef, base: usize, out: &mut Vec<SelData>) {
        let ty = self.ty(r);
        match &ty.kind {
            TypeKind::Struct(fields) => {
                for field in fields {
                    self.collect_selectors(field.ty, base + field.offset, out);
                }
            }
            TypeKind::Void | TypeKind::Fnc => {}
            _ => out.push(SelData::new(base, ty.size)),
        }
    }
}

/// Builder for constructing programs.
#[derive(Debug)]
pub struct ProgramBuilder {
    types: Vec<Type>,
    fncs: Vec<Fnc>,
}

impl ProgramBuilder {
    /// Create a builder with `void`, `int` (4 bytes) and `bool` (1 byte) predefined.
    pub fn new() -> Self {
        let scalar = |name: &str, size, kind| Type {
            name: Some(name.to_string()),
            size,
            kind,
        };
        Self {
            types: vec![
                scalar("void", 0, TypeKind::Void),
                scalar("int", 4, TypeKind::Int),
                scalar("bool", 1, TypeKind::Bool),
            ],
            fncs: vec![],
        }
    }

    pub fn void(&self) -> TypeRef {
        TypeRef::VOID
    }
    pub fn int(&self) -> TypeRef {
        TypeRef(1)
    }
    pub fn bool(&self) -> TypeRef {
        TypeRef(2)
    }

    pub fn pointer(&mut self, to: TypeRef) -> TypeRef {
        self.types.push(Type {
            name: None,
            size: 8,
            kind: TypeKind::Ptr(to),
        });
        TypeRef(self.types.len() - 1)
    }

    /// Declare a struct whose fields are given later, so that it can contain
    /// pointers to itself.
    pub fn declare_struct(&mut self, name: &str) -> TypeRef {
        self.types.push(Type {
            name: Some(name.to_string()),
            size: 0,
            kind: TypeKind::Struct(vec![]),
        });
        TypeRef(self.types.len() - 1)
    }

    /// Define the fields `(name, offset, type)` of a declared struct.
    pub fn define_struct(&mut self, r: TypeRef, size: usize, fields: &[(&str, usize, TypeRef)]) {
        let ty = &mut self.types[r.0];
        ty.size = size;
        ty.kind = TypeKind::Struct(
            fields
                .iter()
                .map(|&(name, offset, ty)| Field {
                    name: name.to_string(),
                    offset,
                    ty,
                })
                .collect(),
        );
    }

    pub fn function(&mut self, fnc: Fnc) {
        self.fncs.push(fnc);
    }

    pub fn build(self) -> Program {
        Program {
            types: self.types,
            fncs: self.fncs,
        }
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a single function. The first block created is the entry.
#[derive(Debug)]
pub struct FncBuilder {
    name: String,
    vars: Vec<Var>,
    blocks: Vec<Block>,
}

impl FncBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: vec![],
            blocks: vec![],
        }
    }

    pub fn var(&mut self, name: impl Into<String>, ty: TypeRef) -> VarId {
        self.vars.push(Var { name: name.into(), ty });
        VarId(self.vars.len() - 1)
    }

    pub fn block(&mut self, name: impl Into<String>) -> BlockId {
        self.blocks.push(Block {
            name: name.into(),
            insns: vec![],
        });
        BlockId(self.blocks.len() - 1)
    }

    pub fn push(&mut self, block: BlockId, insn: Insn) {
        self.blocks[block.0].insns.push(insn);
    }

    pub fn build(self) -> Fnc {
        for block in &self.blocks {
            assert!(
                block.insns.last().is_some_and(|i| i.is_terminator()),
                "Block {} does not end with a terminator",
                block.name
            );
        }
        Fnc {
            name: self.name,
            vars: self.vars,
            blocks: self.blocks,
            entry: BlockId(0),
        }
    }
}
