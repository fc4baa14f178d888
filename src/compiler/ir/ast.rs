//! Input IR consumed by the compiler core
//!
//! A front end produces a [`TranslationUnit`] of struct, global and function
//! declarations. Expressions and statements are closed sum types so every
//! visitor is checked for exhaustiveness. Source locations and pragmas travel
//! on the nodes themselves; the core never looks at source text.

use super::types::LogicalType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source position used for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    /// Source file, when known
    pub file: Option<String>,
    /// 1-based line number
    pub line: u32,
}

impl SourceLoc {
    /// Location with a file name
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line,
        }
    }

    /// Location with only a line number
    pub fn line(line: u32) -> Self {
        Self { file: None, line }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// Compiler hints attached to IR nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pragma {
    /// Statement-level: suppress sign-extension warnings
    IgnoreSignExtension,
    /// Function-level: cache `getstatic_a` array references in temporaries
    CacheArrayRefs,
}

// =============================================================================
// Types as written in declarations
// =============================================================================

/// Declared type before it is mapped onto a [`LogicalType`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSpec {
    /// `void`
    Void,
    /// `char` / `int8_t` / `byte`
    Byte,
    /// `short` / `int16_t`
    Short,
    /// `int` / `int32_t`
    Int,
    /// Any unsigned integer type, by its written name
    Unsigned(String),
    /// `long long` / `int64_t`
    Long,
    /// Platform handle such as `APDU` or `void*`
    Opaque(String),
    /// Pointer to another type. Pointers to primitives are array references.
    Pointer(Box<TypeSpec>),
    /// `struct Name`
    Struct(String),
}

impl TypeSpec {
    /// Primitive logical type, if this names one
    pub fn primitive(&self) -> Option<LogicalType> {
        match self {
            TypeSpec::Byte => Some(LogicalType::Byte),
            TypeSpec::Short => Some(LogicalType::Short),
            TypeSpec::Int => Some(LogicalType::Int),
            _ => None,
        }
    }

    /// Pointer to a primitive element type
    pub fn pointer_to(elem: TypeSpec) -> Self {
        TypeSpec::Pointer(Box::new(elem))
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Void => write!(f, "void"),
            TypeSpec::Byte => write!(f, "byte"),
            TypeSpec::Short => write!(f, "short"),
            TypeSpec::Int => write!(f, "int"),
            TypeSpec::Unsigned(name) => write!(f, "{}", name),
            TypeSpec::Long => write!(f, "long long"),
            TypeSpec::Opaque(name) => write!(f, "{}", name),
            TypeSpec::Pointer(inner) => write!(f, "{}*", inner),
            TypeSpec::Struct(name) => write!(f, "struct {}", name),
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
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
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
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
    /// `&&`
    LogicalAnd,
    /// `||`
    LogicalOr,
}

impl BinaryOp {
    /// Relational operators producing a 0/1 result
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// `&&` and `||`
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    /// C operator text
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `~x`
    BitNot,
    /// `!x`
    LogicalNot,
}

/// Increment and decrement forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncDecOp {
    /// `++x`
    PreInc,
    /// `--x`
    PreDec,
    /// `x++`
    PostInc,
    /// `x--`
    PostDec,
}

impl IncDecOp {
    /// `+1` or `-1`
    pub fn delta(&self) -> i16 {
        match self {
            IncDecOp::PreInc | IncDecOp::PostInc => 1,
            IncDecOp::PreDec | IncDecOp::PostDec => -1,
        }
    }

    /// Whether the updated value is the expression result
    pub fn is_prefix(&self) -> bool {
        matches!(self, IncDecOp::PreInc | IncDecOp::PreDec)
    }
}

/// Comparison operators available on wide (64-bit) values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WideCmp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// A 64-bit value as produced by an upstream optimizer.
///
/// These never reach code generation; the lowering pass either rewrites them
/// into narrow loads or rejects the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WideExpr {
    /// 64-bit constant (bit pattern)
    Const(u64),
    /// Zero extension of a narrow expression
    ZeroExtend(Box<Expr>),
    /// `left << right`
    Shl(Box<WideExpr>, Box<WideExpr>),
    /// `left >> right` (logical)
    LShr(Box<WideExpr>, Box<WideExpr>),
    /// `left & right`
    And(Box<WideExpr>, Box<WideExpr>),
    /// Reference to a single-assignment wide temporary
    Temp(String),
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal
    Const {
        /// Value
        value: i64,
        /// Literal type
        ty: LogicalType,
    },
    /// Variable reference
    Var(String),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Pre/post increment or decrement
    IncDec {
        /// Form
        op: IncDecOp,
        /// Assignable target
        target: Box<Expr>,
    },
    /// Function or intrinsic call
    Call {
        /// Callee name
        name: String,
        /// Arguments in order
        args: Vec<Expr>,
    },
    /// `array[index]`
    ArrayRef {
        /// Array expression
        array: Box<Expr>,
        /// Index expression
        index: Box<Expr>,
    },
    /// `base.field`, where base is a struct variable or struct array element
    StructRef {
        /// Struct expression
        base: Box<Expr>,
        /// Field name
        field: String,
    },
    /// `cond ? then : otherwise`
    Ternary {
        /// Condition
        cond: Box<Expr>,
        /// Value when true
        then: Box<Expr>,
        /// Value when false
        otherwise: Box<Expr>,
    },
    /// `(ty) expr`
    Cast {
        /// Target type
        ty: LogicalType,
        /// Operand
        expr: Box<Expr>,
    },
    /// Equality comparison of two wide values
    WideCompare {
        /// `==` or `!=`
        op: WideCmp,
        /// Left operand
        lhs: WideExpr,
        /// Right operand
        rhs: WideExpr,
    },
}

impl Expr {
    /// Literal with an explicit type
    pub fn constant(value: i64, ty: LogicalType) -> Self {
        Expr::Const { value, ty }
    }

    /// Short literal
    pub fn short(value: i64) -> Self {
        Expr::constant(value, LogicalType::Short)
    }

    /// Int literal
    pub fn int(value: i64) -> Self {
        Expr::constant(value, LogicalType::Int)
    }

    /// Variable reference
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    /// Binary operation
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Unary operation
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Increment or decrement
    pub fn inc_dec(op: IncDecOp, target: Expr) -> Self {
        Expr::IncDec {
            op,
            target: Box::new(target),
        }
    }

    /// `array[index]`
    pub fn index(array: Expr, index: Expr) -> Self {
        Expr::ArrayRef {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    /// `base.field`
    pub fn field(base: Expr, field: impl Into<String>) -> Self {
        Expr::StructRef {
            base: Box::new(base),
            field: field.into(),
        }
    }

    /// Call
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    /// Cast
    pub fn cast(ty: LogicalType, expr: Expr) -> Self {
        Expr::Cast {
            ty,
            expr: Box::new(expr),
        }
    }

    /// Ternary
    pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Whether evaluating the expression may change program state
    pub fn has_side_effects(&self) -> bool {
        match self {
            Expr::Const { .. } | Expr::Var(_) => false,
            Expr::Call { .. } | Expr::IncDec { .. } => true,
            Expr::Binary { left, right, .. } => left.has_side_effects() || right.has_side_effects(),
            Expr::Unary { operand, .. } => operand.has_side_effects(),
            Expr::ArrayRef { array, index } => array.has_side_effects() || index.has_side_effects(),
            Expr::StructRef { base, .. } => base.has_side_effects(),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => cond.has_side_effects() || then.has_side_effects() || otherwise.has_side_effects(),
            Expr::Cast { expr, .. } => expr.has_side_effects(),
            Expr::WideCompare { .. } => false,
        }
    }

    /// Evaluate a constant expression with 32-bit wraparound.
    ///
    /// Only literals, casts and arithmetic/bitwise operators on them fold.
    /// Division by zero does not fold.
    pub fn fold_constant(&self) -> Option<i64> {
        match self {
            Expr::Const { value, .. } => Some(*value),
            Expr::Cast { ty, expr } => expr.fold_constant().map(|v| ty.wrap(v)),
            Expr::Unary { op, operand } => {
                let v = operand.fold_constant()?;
                Some(match op {
                    UnaryOp::Neg => LogicalType::Int.wrap(-v),
                    UnaryOp::BitNot => LogicalType::Int.wrap(!v),
                    UnaryOp::LogicalNot => (v == 0) as i64,
                })
            }
            Expr::Binary { op, left, right } => {
                let l = left.fold_constant()?;
                let r = right.fold_constant()?;
                fold_binary(*op, l, r, LogicalType::Int)
            }
            _ => None,
        }
    }
}

/// Fold a binary operator on two constants, wrapping to `ty`
pub fn fold_binary(op: BinaryOp, l: i64, r: i64, ty: LogicalType) -> Option<i64> {
    // Shift amounts are masked to five bits and shifted at int width, as sshl/ishl do
    let amount = (r & 0x1F) as u32;
    let value = match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div if r != 0 => l.wrapping_div(r),
        BinaryOp::Rem if r != 0 => l.wrapping_rem(r),
        BinaryOp::Div | BinaryOp::Rem => return None,
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitOr => l | r,
        BinaryOp::BitXor => l ^ r,
        BinaryOp::Shl => (l as i32).wrapping_shl(amount) as i64,
        BinaryOp::Shr => (ty.wrap(l) as i32 >> amount) as i64,
        BinaryOp::Eq => (l == r) as i64,
        BinaryOp::Ne => (l != r) as i64,
        BinaryOp::Lt => (l < r) as i64,
        BinaryOp::Le => (l <= r) as i64,
        BinaryOp::Gt => (l > r) as i64,
        BinaryOp::Ge => (l >= r) as i64,
        BinaryOp::LogicalAnd => (l != 0 && r != 0) as i64,
        BinaryOp::LogicalOr => (l != 0 || r != 0) as i64,
    };
    Some(ty.wrap(value))
}

// =============================================================================
// Statements
// =============================================================================

/// Local variable storage request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LocalStorage {
    /// Fast slot when the budget allows
    #[default]
    Auto,
    /// Persistent memory, mangled as `function$name`
    Static,
    /// Forced onto the offload stack
    Offload,
}

/// Local variable declaration (function-level or in a `Decl` statement)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDecl {
    /// Name
    pub name: String,
    /// Declared type
    pub ty: TypeSpec,
    /// Element count for array declarations
    pub array_size: Option<i64>,
    /// Storage request
    pub storage: LocalStorage,
    /// `const` qualifier
    pub is_const: bool,
    /// Initializer expression
    pub init: Option<Expr>,
    /// Declaration site
    pub loc: Option<SourceLoc>,
}

impl LocalDecl {
    /// Scalar local with default storage
    pub fn new(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
            array_size: None,
            storage: LocalStorage::Auto,
            is_const: false,
            init: None,
            loc: None,
        }
    }

    /// Attach an initializer
    pub fn with_init(mut self, init: Expr) -> Self {
        self.init = Some(init);
        self
    }

    /// Request a storage class
    pub fn with_storage(mut self, storage: LocalStorage) -> Self {
        self.storage = storage;
        self
    }
}

/// One arm of a switch. `value == None` is the `default` arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Case value, or `None` for `default`
    pub value: Option<i64>,
    /// Statements until the next arm (fallthrough is preserved)
    pub body: Vec<Stmt>,
}

/// Statement variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `target = value` or `target op= value`
    Assign {
        /// `None` for plain assignment, the arithmetic operator for compound
        op: Option<BinaryOp>,
        /// Assignable target
        target: Expr,
        /// Right-hand side
        value: Expr,
    },
    /// `if (cond) then [else otherwise]`
    If {
        /// Condition
        cond: Expr,
        /// True branch
        then: Box<Stmt>,
        /// False branch
        otherwise: Option<Box<Stmt>>,
    },
    /// `while (cond) body`
    While {
        /// Condition
        cond: Expr,
        /// Body
        body: Box<Stmt>,
    },
    /// `do body while (cond)`
    DoWhile {
        /// Body
        body: Box<Stmt>,
        /// Condition
        cond: Expr,
    },
    /// `for (init; cond; next) body`
    For {
        /// Initializer
        init: Option<Box<Stmt>>,
        /// Condition (absent means forever)
        cond: Option<Expr>,
        /// Step
        next: Option<Box<Stmt>>,
        /// Body
        body: Box<Stmt>,
    },
    /// `return [value]`
    Return(Option<Expr>),
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `switch (scrutinee) { cases }`
    Switch {
        /// Value switched on
        scrutinee: Expr,
        /// Arms in source order
        cases: Vec<SwitchCase>,
    },
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// Expression evaluated for effect
    Expr(Expr),
    /// Local declaration
    Decl(LocalDecl),
    /// Single-assignment wide temporary consumed by lowering
    WideLet {
        /// Temporary name
        name: String,
        /// Defining expression
        value: WideExpr,
    },
    /// `;`
    Empty,
}

/// Statement with its location and attached pragmas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stmt {
    /// What the statement does
    pub kind: StmtKind,
    /// Source location
    pub loc: Option<SourceLoc>,
    /// Pragmas attached by the front end
    pub pragmas: Vec<Pragma>,
}

impl Stmt {
    /// Statement without location or pragmas
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            loc: None,
            pragmas: Vec::new(),
        }
    }

    /// Attach a location
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    /// Attach a pragma
    pub fn with_pragma(mut self, pragma: Pragma) -> Self {
        self.pragmas.push(pragma);
        self
    }

    /// Whether a pragma is attached
    pub fn has_pragma(&self, pragma: Pragma) -> bool {
        self.pragmas.contains(&pragma)
    }

    /// `target = value`
    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::new(StmtKind::Assign {
            op: None,
            target,
            value,
        })
    }

    /// `target op= value`
    pub fn compound(op: BinaryOp, target: Expr, value: Expr) -> Self {
        Stmt::new(StmtKind::Assign {
            op: Some(op),
            target,
            value,
        })
    }

    /// `return value`
    pub fn ret(value: Option<Expr>) -> Self {
        Stmt::new(StmtKind::Return(value))
    }

    /// Expression statement
    pub fn expr(expr: Expr) -> Self {
        Stmt::new(StmtKind::Expr(expr))
    }

    /// Block
    pub fn block(stmts: Vec<Stmt>) -> Self {
        Stmt::new(StmtKind::Block(stmts))
    }

    /// Declaration
    pub fn decl(decl: LocalDecl) -> Self {
        Stmt::new(StmtKind::Decl(decl))
    }

    /// `if` with optional `else`
    pub fn if_else(cond: Expr, then: Stmt, otherwise: Option<Stmt>) -> Self {
        Stmt::new(StmtKind::If {
            cond,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        })
    }

    /// `while`
    pub fn while_loop(cond: Expr, body: Stmt) -> Self {
        Stmt::new(StmtKind::While {
            cond,
            body: Box::new(body),
        })
    }

    /// Whether control can never fall off the end of this statement
    pub fn always_exits(&self) -> bool {
        match &self.kind {
            StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue => true,
            StmtKind::Block(stmts) => stmts.last().map(Stmt::always_exits).unwrap_or(false),
            StmtKind::If {
                then,
                otherwise: Some(otherwise),
                ..
            } => then.always_exits() && otherwise.always_exits(),
            _ => false,
        }
    }

    /// Whether every path through the statement ends in a `return`
    pub fn always_returns(&self) -> bool {
        match &self.kind {
            StmtKind::Return(_) => true,
            StmtKind::Block(stmts) => stmts.last().map(Stmt::always_returns).unwrap_or(false),
            StmtKind::If {
                then,
                otherwise: Some(otherwise),
                ..
            } => then.always_returns() && otherwise.always_returns(),
            _ => false,
        }
    }
}

// =============================================================================
// Declarations
// =============================================================================

/// Field of a struct declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeSpec,
    /// Element count when the field is itself an array
    pub array_size: Option<i64>,
}

/// `struct Name { fields }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDecl {
    /// Struct name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDecl>,
    /// Declaration site
    pub loc: Option<SourceLoc>,
}

/// Literal initializer of a global
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initializer {
    /// Scalar value
    Scalar(i64),
    /// Flat element list
    List(Vec<i64>),
    /// Struct array: per element, per field, the field's values
    Records(Vec<Vec<Vec<i64>>>),
}

/// Global variable, array or struct array declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDecl {
    /// Name
    pub name: String,
    /// Element (or scalar) type
    pub ty: TypeSpec,
    /// `const` qualifier
    pub is_const: bool,
    /// Element count for arrays; `Some` with no value is inferred from `init`
    pub array_size: Option<i64>,
    /// Whether the declaration is an array (size may be inferred)
    pub is_array: bool,
    /// Literal initializer
    pub init: Option<Initializer>,
    /// Declaration site
    pub loc: Option<SourceLoc>,
}

impl GlobalDecl {
    /// Scalar global
    pub fn scalar(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
            is_const: false,
            array_size: None,
            is_array: false,
            init: None,
            loc: None,
        }
    }

    /// Array global of a given size
    pub fn array(name: impl Into<String>, ty: TypeSpec, size: i64) -> Self {
        Self {
            array_size: Some(size),
            is_array: true,
            ..Self::scalar(name, ty)
        }
    }

    /// Constant array with its values (size inferred)
    pub fn const_array(name: impl Into<String>, ty: TypeSpec, values: Vec<i64>) -> Self {
        Self {
            is_const: true,
            is_array: true,
            init: Some(Initializer::List(values)),
            ..Self::scalar(name, ty)
        }
    }

    /// Constant scalar
    pub fn const_scalar(name: impl Into<String>, ty: TypeSpec, value: i64) -> Self {
        Self {
            is_const: true,
            init: Some(Initializer::Scalar(value)),
            ..Self::scalar(name, ty)
        }
    }
}

/// Function parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    /// Name
    pub name: String,
    /// Type (pointers to primitives are array references)
    pub ty: TypeSpec,
}

impl ParamDecl {
    /// Parameter
    pub fn new(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Function definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// Name
    pub name: String,
    /// Return type
    pub ret: TypeSpec,
    /// Parameters in order
    pub params: Vec<ParamDecl>,
    /// Locals declared up front (in addition to `Decl` statements)
    pub locals: Vec<LocalDecl>,
    /// Body statements
    pub body: Vec<Stmt>,
    /// Function-level pragmas
    pub pragmas: Vec<Pragma>,
    /// Definition site
    pub loc: Option<SourceLoc>,
}

impl FunctionDecl {
    /// Function with an empty body
    pub fn new(name: impl Into<String>, ret: TypeSpec, params: Vec<ParamDecl>) -> Self {
        Self {
            name: name.into(),
            ret,
            params,
            locals: Vec::new(),
            body: Vec::new(),
            pragmas: Vec::new(),
            loc: None,
        }
    }

    /// Set the body
    pub fn with_body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }

    /// Whether a pragma is attached
    pub fn has_pragma(&self, pragma: Pragma) -> bool {
        self.pragmas.contains(&pragma)
    }
}

/// One source file's worth of declarations
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TranslationUnit {
    /// Struct types
    pub structs: Vec<StructDecl>,
    /// Globals in declaration order
    pub globals: Vec<GlobalDecl>,
    /// Functions in declaration order
    pub functions: Vec<FunctionDecl>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_constant_wraps() {
        let e = Expr::binary(BinaryOp::Mul, Expr::int(0x10000), Expr::int(0x10000));
        assert_eq!(e.fold_constant(), Some(0));
        let e = Expr::cast(LogicalType::Byte, Expr::short(200));
        assert_eq!(e.fold_constant(), Some(-56));
        let e = Expr::binary(BinaryOp::Div, Expr::short(1), Expr::short(0));
        assert_eq!(e.fold_constant(), None);
    }

    #[test]
    fn test_fold_shift_uses_five_bit_amount() {
        assert_eq!(fold_binary(BinaryOp::Shl, 1, 16, LogicalType::Short), Some(0));
        assert_eq!(fold_binary(BinaryOp::Shl, 1, 15, LogicalType::Short), Some(-32768));
        assert_eq!(fold_binary(BinaryOp::Shr, -2, 20, LogicalType::Short), Some(-1));
        assert_eq!(fold_binary(BinaryOp::Shr, 0x4000, 17, LogicalType::Short), Some(0));
        // 32 wraps to 0
        assert_eq!(fold_binary(BinaryOp::Shl, 3, 32, LogicalType::Int), Some(3));
        assert_eq!(fold_binary(BinaryOp::Shl, 1, 31, LogicalType::Int), Some(i32::MIN as i64));
    }

    #[test]
    fn test_side_effects() {
        let pure = Expr::index(Expr::var("a"), Expr::binary(BinaryOp::Add, Expr::var("i"), Expr::short(1)));
        assert!(!pure.has_side_effects());
        let impure = Expr::index(Expr::var("a"), Expr::inc_dec(IncDecOp::PostInc, Expr::var("i")));
        assert!(impure.has_side_effects());
    }

    #[test]
    fn test_always_returns() {
        let ret = Stmt::ret(None);
        let both = Stmt::if_else(Expr::var("c"), ret.clone(), Some(ret.clone()));
        assert!(both.always_returns());
        let one = Stmt::if_else(Expr::var("c"), ret, None);
        assert!(!one.always_returns());
    }

    #[test]
    fn test_ast_serde() {
        let stmt = Stmt::assign(Expr::var("x"), Expr::short(3)).at(SourceLoc::new("a.c", 4));
        let json = serde_json::to_string(&stmt).unwrap();
        let back: Stmt = serde_json::from_str(&json).unwrap();
        assert_eq!(stmt, back);
    }
}
