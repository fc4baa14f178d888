//! JCVM instruction definitions
//!
//! Every instruction knows its own stack effect. The only exception to a
//! fixed per-opcode effect is [`Instruction::Invoke`], whose effect is derived
//! from the callee signature it carries.

use super::types::{LogicalType, StackType};
use crate::error::{Error, Result};
use std::borrow::Cow;
use std::fmt;

/// Jump target. Labels are plain integers allocated by the generation context
/// and resolved to instruction indices once per analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Arithmetic family: one-word short ops or two-word int ops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// `s*` opcodes
    Short,
    /// `i*` opcodes
    Int,
}

impl Width {
    /// Family used for values of a logical type
    pub fn of(ty: LogicalType) -> Self {
        if ty == LogicalType::Int {
            Width::Int
        } else {
            Width::Short
        }
    }

    fn prefix(&self) -> char {
        match self {
            Width::Short => 's',
            Width::Int => 'i',
        }
    }

    /// Words per value
    pub fn slots(&self) -> u16 {
        match self {
            Width::Short => 1,
            Width::Int => 2,
        }
    }
}

/// Binary arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>` (arithmetic)
    Shr,
    /// `>>>` (logical)
    Ushr,
}

impl ArithOp {
    fn suffix(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
            ArithOp::Shl => "shl",
            ArithOp::Shr => "shr",
            ArithOp::Ushr => "ushr",
        }
    }
}

/// Width conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Sign-extend the low 8 bits of a short
    S2B,
    /// Sign-extend short to int
    S2I,
    /// Truncate int to byte
    I2B,
    /// Truncate int to short
    I2S,
}

/// Element type of an array load/store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayElem {
    /// `baload` / `bastore`
    Byte,
    /// `saload` / `sastore`
    Short,
    /// `iaload` / `iastore`
    Int,
    /// `aaload` / `aastore`
    Ref,
}

impl ArrayElem {
    /// Array opcode family for an element type
    pub fn of(ty: LogicalType) -> Self {
        match ty {
            LogicalType::Byte => ArrayElem::Byte,
            LogicalType::Int => ArrayElem::Int,
            LogicalType::Short | LogicalType::Void => ArrayElem::Short,
            _ => ArrayElem::Ref,
        }
    }

    fn prefix(&self) -> char {
        match self {
            ArrayElem::Byte => 'b',
            ArrayElem::Short => 's',
            ArrayElem::Int => 'i',
            ArrayElem::Ref => 'a',
        }
    }

    fn value_slots(&self) -> u16 {
        match self {
            ArrayElem::Int => 2,
            _ => 1,
        }
    }
}

/// Kind of local variable access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalKind {
    /// `sload` / `sstore` (byte and short)
    Short,
    /// `iload` / `istore`
    Int,
    /// `aload` / `astore`
    Ref,
}

impl LocalKind {
    /// Access kind for a variable of a logical type
    pub fn of(ty: LogicalType) -> Self {
        match ty.stack_type() {
            StackType::Short => LocalKind::Short,
            StackType::Int => LocalKind::Int,
            StackType::Ref => LocalKind::Ref,
        }
    }

    fn prefix(&self) -> char {
        match self {
            LocalKind::Short => 's',
            LocalKind::Int => 'i',
            LocalKind::Ref => 'a',
        }
    }

    /// Words moved by a load or store
    pub fn slots(&self) -> u16 {
        match self {
            LocalKind::Int => 2,
            _ => 1,
        }
    }
}

/// Kind of static field access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticKind {
    /// `getstatic_a`
    Ref,
    /// `getstatic_b`
    Byte,
    /// `getstatic_s`
    Short,
    /// `getstatic_i`
    Int,
}

impl StaticKind {
    fn suffix(&self) -> char {
        match self {
            StaticKind::Ref => 'a',
            StaticKind::Byte => 'b',
            StaticKind::Short => 's',
            StaticKind::Int => 'i',
        }
    }

    fn slots(&self) -> u16 {
        match self {
            StaticKind::Int => 2,
            _ => 1,
        }
    }
}

/// Branch condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Cond {
    /// Condition that holds exactly when `self` does not
    pub fn negate(&self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
        }
    }

    /// Condition with its operands exchanged (`a < b` is `b > a`)
    pub fn swap(&self) -> Cond {
        match self {
            Cond::Lt => Cond::Gt,
            Cond::Gt => Cond::Lt,
            Cond::Le => Cond::Ge,
            Cond::Ge => Cond::Le,
            other => *other,
        }
    }

    /// Evaluate the condition on two integers
    pub fn holds(&self, left: i64, right: i64) -> bool {
        match self {
            Cond::Eq => left == right,
            Cond::Ne => left != right,
            Cond::Lt => left < right,
            Cond::Le => left <= right,
            Cond::Gt => left > right,
            Cond::Ge => left >= right,
        }
    }

    /// Source-level operator text
    pub fn symbol(&self) -> &'static str {
        match self {
            Cond::Eq => "==",
            Cond::Ne => "!=",
            Cond::Lt => "<",
            Cond::Le => "<=",
            Cond::Gt => ">",
            Cond::Ge => ">=",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        }
    }
}

/// Method dispatch convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// `invokestatic`: arguments only
    Static,
    /// `invokevirtual`: receiver plus arguments
    Virtual,
    /// `invokespecial`: receiver plus arguments
    Special,
}

/// Callee signature carried by a call instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature {
    /// Declared parameter types (excluding the receiver)
    pub params: Vec<LogicalType>,
    /// Declared return type
    pub ret: LogicalType,
    /// Dispatch convention
    pub dispatch: Dispatch,
}

impl CallSignature {
    /// Build a signature for a static call
    pub fn new_static(params: Vec<LogicalType>, ret: LogicalType) -> Self {
        Self {
            params,
            ret,
            dispatch: Dispatch::Static,
        }
    }

    /// Parse a JCA method descriptor such as `([BSSB)S`
    pub fn from_descriptor(descriptor: &str, dispatch: Dispatch) -> Result<Self> {
        let parse_err = |message: &str| Error::Parse {
            context: format!("method descriptor '{}'", descriptor),
            message: message.to_string(),
        };
        let rest = descriptor
            .strip_prefix('(')
            .ok_or_else(|| parse_err("descriptor must start with '('"))?;
        let close = rest
            .find(')')
            .ok_or_else(|| parse_err("missing ')' in descriptor"))?;
        let (args, ret) = (&rest[..close], &rest[close + 1..]);

        let mut params = Vec::new();
        let mut chars = args.char_indices().peekable();
        while let Some((pos, c)) = chars.next() {
            let ty = match c {
                'B' | 'Z' => LogicalType::Byte,
                'S' => LogicalType::Short,
                'I' => LogicalType::Int,
                '[' => match chars.next() {
                    Some((_, 'B')) | Some((_, 'Z')) => LogicalType::ByteArray,
                    Some((_, 'S')) => LogicalType::ShortArray,
                    Some((_, 'I')) => LogicalType::IntArray,
                    _ => return Err(parse_err(&format!("bad array type at {}", pos))),
                },
                'L' => {
                    loop {
                        match chars.next() {
                            Some((_, ';')) => break,
                            Some(_) => {}
                            None => return Err(parse_err("unterminated class type")),
                        }
                    }
                    LogicalType::Ref
                }
                other => {
                    return Err(parse_err(&format!(
                        "unexpected '{}' at position {}",
                        other, pos
                    )))
                }
            };
            params.push(ty);
        }

        let ret = match ret {
            "V" => LogicalType::Void,
            "B" | "Z" => LogicalType::Byte,
            "S" => LogicalType::Short,
            "I" => LogicalType::Int,
            "[B" => LogicalType::ByteArray,
            "[S" => LogicalType::ShortArray,
            "[I" => LogicalType::IntArray,
            r if r.starts_with('L') && r.ends_with(';') => LogicalType::Ref,
            other => return Err(parse_err(&format!("bad return type '{}'", other))),
        };

        Ok(Self {
            params,
            ret,
            dispatch,
        })
    }

    /// Words popped by the call, including the receiver for instance dispatch
    pub fn arg_slots(&self) -> u16 {
        let receiver = match self.dispatch {
            Dispatch::Static => 0,
            Dispatch::Virtual | Dispatch::Special => 1,
        };
        receiver + self.params.iter().map(|p| p.slot_size()).sum::<u16>()
    }

    /// Words pushed by the call
    pub fn ret_slots(&self) -> u16 {
        self.ret.slot_size()
    }

    /// JCA descriptor text, e.g. `(SI)S`
    pub fn descriptor(&self) -> String {
        let params: String = self.params.iter().map(|p| p.descriptor()).collect();
        format!("({}){}", params, self.ret.descriptor())
    }
}

/// How a method returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// `return`
    Void,
    /// `sreturn`
    Short,
    /// `ireturn`
    Int,
    /// `areturn`
    Ref,
}

impl ReturnKind {
    /// Return opcode for a function result type
    pub fn of(ty: LogicalType) -> Self {
        match ty.stack_type() {
            _ if ty == LogicalType::Void => ReturnKind::Void,
            StackType::Short => ReturnKind::Short,
            StackType::Int => ReturnKind::Int,
            StackType::Ref => ReturnKind::Ref,
        }
    }
}

/// A single JCVM instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    // Constants
    /// Push a short constant (`sconst_*`, `bspush`, `sspush`)
    SConst(i16),
    /// Push an int constant (`iconst_*`, `bipush`, `sipush`, `iipush`)
    IConst(i32),
    /// Push null
    AConstNull,

    // Locals
    /// Load a local slot
    Load(LocalKind, u16),
    /// Store into a local slot
    Store(LocalKind, u16),
    /// Add a constant to a short local in place
    SInc(u16, i16),
    /// Add a constant to an int local in place
    IInc(u16, i16),

    // Arrays
    /// `[ref, index] -> [value]`
    ArrayLoad(ArrayElem),
    /// `[ref, index, value] -> []`
    ArrayStore(ArrayElem),
    /// `[ref] -> [length]`
    ArrayLength,

    // Arithmetic
    /// Binary arithmetic of the given width
    Arith(Width, ArithOp),
    /// Negation
    Neg(Width),
    /// Width conversion
    Convert(Conversion),
    /// Compare two ints, push -1, 0 or 1 as a short
    ICmp,

    // Stack manipulation
    /// Duplicate one word
    Dup,
    /// Duplicate two words
    Dup2,
    /// Duplicate the top `m` words and insert them `n` words down
    DupX {
        /// Words duplicated
        m: u8,
        /// Insertion depth
        n: u8,
    },
    /// Swap the top `m` words with the `n` words below
    SwapX {
        /// Top words
        m: u8,
        /// Words below
        n: u8,
    },
    /// Discard one word
    Pop,
    /// Discard two words
    Pop2,

    // Statics
    /// Read a static field (constant pool index)
    GetStatic(StaticKind, u16),
    /// Write a static field (constant pool index)
    PutStatic(StaticKind, u16),

    // Control flow
    /// Compare the top short with zero and branch
    If(Cond, LabelId),
    /// Compare two shorts and branch
    IfSCmp(Cond, LabelId),
    /// Compare two references (`Eq` / `Ne` only) and branch
    IfACmp(Cond, LabelId),
    /// Branch if the reference is null
    IfNull(LabelId),
    /// Branch if the reference is not null
    IfNonNull(LabelId),
    /// Unconditional jump
    Goto(LabelId),
    /// Dense jump table over `low..=high`
    TableSwitch {
        /// Short or int scrutinee
        width: Width,
        /// Target for values outside the table
        default: LabelId,
        /// First table value
        low: i32,
        /// Last table value
        high: i32,
        /// One target per value in `low..=high`
        targets: Vec<LabelId>,
    },
    /// Sparse sorted lookup table
    LookupSwitch {
        /// Short or int scrutinee
        width: Width,
        /// Target for unmatched values
        default: LabelId,
        /// `(value, target)` pairs in ascending value order
        pairs: Vec<(i32, LabelId)>,
    },
    /// Return from the method
    Return(ReturnKind),
    /// Throw the reference on top of the stack
    AThrow,

    // Calls
    /// Call a method through a constant pool reference
    Invoke {
        /// Constant pool index of the method reference
        cp: u16,
        /// Callee signature, which determines the stack effect
        signature: CallSignature,
    },
}

impl Instruction {
    /// Push a short constant
    pub fn sconst(value: i16) -> Self {
        Instruction::SConst(value)
    }

    /// Push an int constant
    pub fn iconst(value: i32) -> Self {
        Instruction::IConst(value)
    }

    /// Push a constant of the given family
    pub fn constant(width: Width, value: i64) -> Self {
        match width {
            Width::Short => Instruction::SConst(value as i16),
            Width::Int => Instruction::IConst(value as i32),
        }
    }

    /// `dup_x` that copies a one-word value under an `[ref, index]` pair
    pub fn dup_short_under_pair() -> Self {
        Instruction::DupX { m: 1, n: 3 }
    }

    /// `dup_x` that copies a two-word value under an `[ref, index]` pair
    pub fn dup_int_under_pair() -> Self {
        Instruction::DupX { m: 2, n: 4 }
    }

    /// Standard one-word swap
    pub fn swap() -> Self {
        Instruction::SwapX { m: 1, n: 1 }
    }

    /// `(pops, pushes)` in 16-bit words
    pub fn stack_effect(&self) -> (u16, u16) {
        match self {
            Instruction::SConst(_) | Instruction::AConstNull => (0, 1),
            Instruction::IConst(_) => (0, 2),
            Instruction::Load(kind, _) => (0, kind.slots()),
            Instruction::Store(kind, _) => (kind.slots(), 0),
            Instruction::SInc(..) | Instruction::IInc(..) => (0, 0),
            Instruction::ArrayLoad(elem) => (2, elem.value_slots()),
            Instruction::ArrayStore(elem) => (2 + elem.value_slots(), 0),
            Instruction::ArrayLength => (1, 1),
            Instruction::Arith(width, op) => match (width, op) {
                (Width::Short, _) => (2, 1),
                (Width::Int, _) => (4, 2),
            },
            Instruction::Neg(width) => (width.slots(), width.slots()),
            Instruction::Convert(conv) => match conv {
                Conversion::S2B => (1, 1),
                Conversion::S2I => (1, 2),
                Conversion::I2B | Conversion::I2S => (2, 1),
            },
            Instruction::ICmp => (4, 1),
            Instruction::Dup => (1, 2),
            Instruction::Dup2 => (2, 4),
            Instruction::DupX { m, .. } => (*m as u16, 2 * *m as u16),
            Instruction::SwapX { m, n } => ((*m + *n) as u16, (*m + *n) as u16),
            Instruction::Pop => (1, 0),
            Instruction::Pop2 => (2, 0),
            Instruction::GetStatic(kind, _) => (0, kind.slots()),
            Instruction::PutStatic(kind, _) => (kind.slots(), 0),
            Instruction::If(..) | Instruction::IfNull(_) | Instruction::IfNonNull(_) => (1, 0),
            Instruction::IfSCmp(..) | Instruction::IfACmp(..) => (2, 0),
            Instruction::Goto(_) => (0, 0),
            Instruction::TableSwitch { width, .. } | Instruction::LookupSwitch { width, .. } => {
                (width.slots(), 0)
            }
            Instruction::Return(kind) => match kind {
                ReturnKind::Void => (0, 0),
                ReturnKind::Short | ReturnKind::Ref => (1, 0),
                ReturnKind::Int => (2, 0),
            },
            Instruction::AThrow => (1, 0),
            Instruction::Invoke { signature, .. } => (signature.arg_slots(), signature.ret_slots()),
        }
    }

    /// Net change in stack depth
    pub fn net_effect(&self) -> i32 {
        let (pops, pushes) = self.stack_effect();
        pushes as i32 - pops as i32
    }

    /// Conditional branches (two successors)
    pub fn is_conditional_branch(&self) -> bool {
        matches!(
            self,
            Instruction::If(..)
                | Instruction::IfSCmp(..)
                | Instruction::IfACmp(..)
                | Instruction::IfNull(_)
                | Instruction::IfNonNull(_)
        )
    }

    /// Switches (default plus case targets)
    pub fn is_switch(&self) -> bool {
        matches!(
            self,
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. }
        )
    }

    /// Returns and throws (no successors)
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Return(_) | Instruction::AThrow)
    }

    /// Any instruction after which control never falls through
    pub fn is_unconditional_transfer(&self) -> bool {
        self.is_terminator() || self.is_switch() || matches!(self, Instruction::Goto(_))
    }

    /// Any instruction that ends a basic block
    pub fn ends_block(&self) -> bool {
        self.is_conditional_branch() || self.is_unconditional_transfer()
    }

    /// All labels this instruction may jump to, default first for switches
    pub fn branch_targets(&self) -> Vec<LabelId> {
        match self {
            Instruction::If(_, l)
            | Instruction::IfSCmp(_, l)
            | Instruction::IfACmp(_, l)
            | Instruction::IfNull(l)
            | Instruction::IfNonNull(l)
            | Instruction::Goto(l) => vec![*l],
            Instruction::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Instruction::LookupSwitch { default, pairs, .. } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, l)| *l))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every reference to `from` into `to`. Returns true if changed.
    pub fn retarget(&mut self, from: LabelId, to: LabelId) -> bool {
        let mut changed = false;
        let mut swap = |l: &mut LabelId| {
            if *l == from {
                *l = to;
                changed = true;
            }
        };
        match self {
            Instruction::If(_, l)
            | Instruction::IfSCmp(_, l)
            | Instruction::IfACmp(_, l)
            | Instruction::IfNull(l)
            | Instruction::IfNonNull(l)
            | Instruction::Goto(l) => swap(l),
            Instruction::TableSwitch {
                default, targets, ..
            } => {
                swap(default);
                targets.iter_mut().for_each(swap);
            }
            Instruction::LookupSwitch { default, pairs, .. } => {
                swap(default);
                pairs.iter_mut().for_each(|(_, l)| swap(l));
            }
            _ => {}
        }
        changed
    }

    /// Assembly mnemonic, using the most compact encoding for the operands
    pub fn mnemonic(&self) -> Cow<'static, str> {
        match self {
            Instruction::SConst(v) => match v {
                -1 => "sconst_m1".into(),
                0..=5 => format!("sconst_{}", v).into(),
                -128..=127 => "bspush".into(),
                _ => "sspush".into(),
            },
            Instruction::IConst(v) => match v {
                -1 => "iconst_m1".into(),
                0..=5 => format!("iconst_{}", v).into(),
                -128..=127 => "bipush".into(),
                -32768..=32767 => "sipush".into(),
                _ => "iipush".into(),
            },
            Instruction::AConstNull => "aconst_null".into(),
            Instruction::Load(kind, slot) if *slot <= 3 => {
                format!("{}load_{}", kind.prefix(), slot).into()
            }
            Instruction::Load(kind, _) => format!("{}load", kind.prefix()).into(),
            Instruction::Store(kind, slot) if *slot <= 3 => {
                format!("{}store_{}", kind.prefix(), slot).into()
            }
            Instruction::Store(kind, _) => format!("{}store", kind.prefix()).into(),
            Instruction::SInc(_, d) if (-128..=127).contains(d) => "sinc".into(),
            Instruction::SInc(..) => "sinc_w".into(),
            Instruction::IInc(_, d) if (-128..=127).contains(d) => "iinc".into(),
            Instruction::IInc(..) => "iinc_w".into(),
            Instruction::ArrayLoad(elem) => format!("{}aload", elem.prefix()).into(),
            Instruction::ArrayStore(elem) => format!("{}astore", elem.prefix()).into(),
            Instruction::ArrayLength => "arraylength".into(),
            Instruction::Arith(width, op) => format!("{}{}", width.prefix(), op.suffix()).into(),
            Instruction::Neg(width) => format!("{}neg", width.prefix()).into(),
            Instruction::Convert(conv) => match conv {
                Conversion::S2B => "s2b".into(),
                Conversion::S2I => "s2i".into(),
                Conversion::I2B => "i2b".into(),
                Conversion::I2S => "i2s".into(),
            },
            Instruction::ICmp => "icmp".into(),
            Instruction::Dup => "dup".into(),
            Instruction::Dup2 => "dup2".into(),
            Instruction::DupX { .. } => "dup_x".into(),
            Instruction::SwapX { .. } => "swap_x".into(),
            Instruction::Pop => "pop".into(),
            Instruction::Pop2 => "pop2".into(),
            Instruction::GetStatic(kind, _) => format!("getstatic_{}", kind.suffix()).into(),
            Instruction::PutStatic(kind, _) => format!("putstatic_{}", kind.suffix()).into(),
            Instruction::If(cond, _) => format!("if{}_w", cond.suffix()).into(),
            Instruction::IfSCmp(cond, _) => format!("if_scmp{}_w", cond.suffix()).into(),
            Instruction::IfACmp(cond, _) => format!("if_acmp{}_w", cond.suffix()).into(),
            Instruction::IfNull(_) => "ifnull_w".into(),
            Instruction::IfNonNull(_) => "ifnonnull_w".into(),
            Instruction::Goto(_) => "goto_w".into(),
            Instruction::TableSwitch { width, .. } => {
                format!("{}tableswitch", width.prefix()).into()
            }
            Instruction::LookupSwitch { width, .. } => {
                format!("{}lookupswitch", width.prefix()).into()
            }
            Instruction::Return(kind) => match kind {
                ReturnKind::Void => "return".into(),
                ReturnKind::Short => "sreturn".into(),
                ReturnKind::Int => "ireturn".into(),
                ReturnKind::Ref => "areturn".into(),
            },
            Instruction::AThrow => "athrow".into(),
            Instruction::Invoke { signature, .. } => match signature.dispatch {
                Dispatch::Static => "invokestatic".into(),
                Dispatch::Virtual => "invokevirtual".into(),
                Dispatch::Special => "invokespecial".into(),
            },
        }
    }

    /// Size of the encoded instruction in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Instruction::SConst(v) => match v {
                -1..=5 => 1,
                -128..=127 => 2,
                _ => 3,
            },
            Instruction::IConst(v) => match v {
                -1..=5 => 1,
                -128..=127 => 2,
                -32768..=32767 => 3,
                _ => 5,
            },
            Instruction::Load(_, slot) | Instruction::Store(_, slot) => {
                if *slot <= 3 {
                    1
                } else {
                    2
                }
            }
            Instruction::SInc(_, d) | Instruction::IInc(_, d) => {
                if (-128..=127).contains(d) {
                    3
                } else {
                    4
                }
            }
            Instruction::DupX { .. } | Instruction::SwapX { .. } => 2,
            Instruction::GetStatic(..) | Instruction::PutStatic(..) => 3,
            Instruction::If(..)
            | Instruction::IfSCmp(..)
            | Instruction::IfACmp(..)
            | Instruction::IfNull(_)
            | Instruction::IfNonNull(_)
            | Instruction::Goto(_) => 3,
            Instruction::TableSwitch {
                width, targets, ..
            } => {
                let bound = if *width == Width::Int { 4 } else { 2 };
                1 + 2 + 2 * bound + 2 * targets.len()
            }
            Instruction::LookupSwitch { width, pairs, .. } => {
                let key = if *width == Width::Int { 4 } else { 2 };
                1 + 2 + 2 + pairs.len() * (key + 2)
            }
            Instruction::Invoke { .. } => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match self {
            Instruction::SConst(v) if !(-1..=5).contains(v) => write!(f, "{} {}", mnemonic, v),
            Instruction::IConst(v) if !(-1..=5).contains(v) => write!(f, "{} {}", mnemonic, v),
            Instruction::Load(_, slot) | Instruction::Store(_, slot) if *slot > 3 => {
                write!(f, "{} {}", mnemonic, slot)
            }
            Instruction::SInc(slot, d) | Instruction::IInc(slot, d) => {
                write!(f, "{} {} {}", mnemonic, slot, d)
            }
            Instruction::DupX { m, n } | Instruction::SwapX { m, n } => {
                write!(f, "{} 0x{:x}", mnemonic, (m << 4) | n)
            }
            Instruction::GetStatic(_, cp) | Instruction::PutStatic(_, cp) => {
                write!(f, "{} {}", mnemonic, cp)
            }
            Instruction::If(_, l)
            | Instruction::IfSCmp(_, l)
            | Instruction::IfACmp(_, l)
            | Instruction::IfNull(l)
            | Instruction::IfNonNull(l)
            | Instruction::Goto(l) => write!(f, "{} {}", mnemonic, l),
            Instruction::TableSwitch {
                default,
                low,
                high,
                targets,
                ..
            } => {
                write!(f, "{} {} {} {}", mnemonic, default, low, high)?;
                for t in targets {
                    write!(f, " {}", t)?;
                }
                Ok(())
            }
            Instruction::LookupSwitch { default, pairs, .. } => {
                write!(f, "{} {} {}", mnemonic, default, pairs.len())?;
                for (v, t) in pairs {
                    write!(f, " {} {}", v, t)?;
                }
                Ok(())
            }
            Instruction::Invoke { cp, signature } => {
                write!(f, "{} {} // {}", mnemonic, cp, signature.descriptor())
            }
            _ => write!(f, "{}", mnemonic),
        }
    }
}

/// One element of a method body: an instruction or a label definition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Item {
    /// Executable instruction
    Instr(Instruction),
    /// Label marking the next instruction
    Label(LabelId),
}

impl Item {
    /// The instruction, if this item is one
    pub fn instruction(&self) -> Option<&Instruction> {
        match self {
            Item::Instr(instr) => Some(instr),
            Item::Label(_) => None,
        }
    }

    /// The label, if this item is one
    pub fn label(&self) -> Option<LabelId> {
        match self {
            Item::Label(l) => Some(*l),
            Item::Instr(_) => None,
        }
    }
}

impl From<Instruction> for Item {
    fn from(instr: Instruction) -> Self {
        Item::Instr(instr)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Instr(instr) => write!(f, "{}", instr),
            Item::Label(l) => write!(f, "{}:", l),
        }
    }
}
