//! Variable, array element and struct field access
//!
//! Every assignable thing resolves to a [`Place`]. Loads and stores then only
//! care about three shapes: a local slot, an element of an array held in a
//! local slot, or an element of a static storage array (persistent memory,
//! offload stack or read-only table).
//!
//! Emulated INT places are two shorts (high, low). Their address is emitted
//! once per half, so any index with side effects is first spilled into a
//! temporary slot by [`stabilize`].

use super::coercion::coerce_index;
use super::context::{Binding, GenerationContext};
use super::expr::{gen_coerced, gen_expr};
use super::{Code, Emit};
use crate::compiler::ir::{
    ArithOp, ArrayElem, Conversion, Expr, Instruction, LocalKind, LogicalType, StaticKind, Width,
};
use crate::compiler::symbols::{GlobalKind, VarLocation};
use crate::error::{Error, Result};

/// Index operand, either still an expression or already spilled
#[derive(Debug, Clone)]
pub enum IndexOperand {
    /// Evaluated where the address is emitted
    Expr(Expr),
    /// Held in a short temporary
    Temp(u16),
}

impl IndexOperand {
    fn has_side_effects(&self) -> bool {
        match self {
            IndexOperand::Expr(e) => e.has_side_effects(),
            IndexOperand::Temp(_) => false,
        }
    }
}

/// Element index inside a static storage array
#[derive(Debug, Clone)]
pub enum Address {
    /// Known element
    Fixed(u16),
    /// `SP - depth` on an offload stack
    StackRelative {
        /// Stack pointer field
        sp: u16,
        /// Distance below the current stack pointer
        depth: u16,
    },
    /// `outer * stride + inner + base`
    Indexed {
        /// Array or struct element index
        outer: IndexOperand,
        /// Elements per outer step
        stride: u16,
        /// Sub-index of an array field
        inner: Option<IndexOperand>,
        /// First element of the array or field
        base: u16,
    },
}

/// A static storage array
#[derive(Debug, Clone)]
pub struct StaticArray {
    /// Constant pool entry of the array field
    pub cp: u16,
    /// Source name for diagnostics
    pub name: String,
    /// Constant tables cannot be written
    pub read_only: bool,
}

/// Something that can be loaded from and (unless read-only) stored to
#[derive(Debug, Clone)]
pub enum Place {
    /// Local variable slot
    Slot {
        /// Slot index
        slot: u16,
        /// Declared type
        ty: LogicalType,
    },
    /// Element of an array reference held in a local slot
    Element {
        /// Slot holding the reference
        array_slot: u16,
        /// Element type
        elem: LogicalType,
        /// Element index
        index: IndexOperand,
    },
    /// Element of a static storage array
    Static {
        /// Backing array
        array: StaticArray,
        /// Logical element type
        elem: LogicalType,
        /// Element address
        address: Address,
        /// INT stored as a short pair
        emulated: bool,
    },
}

impl Place {
    /// Type of the value held
    pub fn ty(&self) -> LogicalType {
        match self {
            Place::Slot { ty, .. } => *ty,
            Place::Element { elem, .. } | Place::Static { elem, .. } => *elem,
        }
    }

    /// Whether the place is an emulated INT
    pub fn is_emulated(&self) -> bool {
        matches!(self, Place::Static { emulated: true, .. })
    }

    /// Whether the address is a `[ref, index]` pair that `dup2` can copy
    pub fn is_addressable(&self) -> bool {
        matches!(self, Place::Element { .. } | Place::Static { emulated: false, .. })
    }

    fn operands_mut(&mut self) -> Vec<&mut IndexOperand> {
        match self {
            Place::Slot { .. } => Vec::new(),
            Place::Element { index, .. } => vec![index],
            Place::Static { address, .. } => match address {
                Address::Indexed { outer, inner, .. } => {
                    let mut ops = vec![outer];
                    if let Some(inner) = inner {
                        ops.push(inner);
                    }
                    ops
                }
                _ => Vec::new(),
            },
        }
    }

    /// Fail on writes to read-only tables
    pub fn check_writable(&self) -> Result<()> {
        match self {
            Place::Static { array, .. } if array.read_only => Err(Error::codegen(format!(
                "cannot assign to read-only '{}'",
                array.name
            ))),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve an assignable expression
pub fn resolve_place(target: &Expr, ctx: &mut GenerationContext<'_>) -> Result<Place> {
    match target {
        Expr::Var(name) => resolve_var(name, ctx),
        Expr::ArrayRef { array, index } => match array.as_ref() {
            Expr::Var(name) => resolve_element(name, index, ctx),
            Expr::StructRef { base, field } => {
                resolve_field(base, field, Some(IndexOperand::Expr((**index).clone())), ctx)
            }
            other => Err(Error::codegen(format!("unsupported array expression: {:?}", other))),
        },
        Expr::StructRef { base, field } => resolve_field(base, field, None, ctx),
        other => Err(Error::codegen(format!("expression is not assignable: {:?}", other))),
    }
}

fn storage_place(
    ctx: &mut GenerationContext<'_>,
    class: crate::compiler::ir::StorageClass,
    name: &str,
    elem: LogicalType,
    address: Address,
    emulated: bool,
) -> Place {
    Place::Static {
        array: StaticArray {
            cp: ctx.pool.storage_array(class),
            name: name.to_string(),
            read_only: false,
        },
        elem,
        address,
        emulated,
    }
}

fn resolve_var(name: &str, ctx: &mut GenerationContext<'_>) -> Result<Place> {
    match ctx.lookup(name)? {
        Binding::Constant { .. } => Err(Error::codegen(format!("cannot assign to constant '{}'", name))),
        Binding::Local(VarLocation::Slot { slot, ty, .. }) => Ok(Place::Slot { slot, ty }),
        Binding::Local(VarLocation::Offload {
            class,
            offset,
            ty,
            emulated,
        }) => {
            let depth = ctx.function.frame.usage(class) - offset;
            let sp = ctx.pool.stack_pointer(class);
            Ok(storage_place(
                ctx,
                class,
                name,
                ty,
                Address::StackRelative { sp, depth },
                emulated,
            ))
        }
        Binding::Global(global) => match &global.kind {
            GlobalKind::Scalar {
                ty,
                alloc,
                emulated,
                ..
            } => Ok(storage_place(
                ctx,
                alloc.class,
                name,
                *ty,
                Address::Fixed(alloc.offset),
                *emulated,
            )),
            _ => Err(Error::codegen(format!(
                "array '{}' cannot be used as a scalar value",
                name
            ))),
        },
    }
}

fn resolve_element(name: &str, index: &Expr, ctx: &mut GenerationContext<'_>) -> Result<Place> {
    let index = IndexOperand::Expr(index.clone());
    match ctx.lookup(name)? {
        Binding::Local(VarLocation::Slot { slot, ty, .. }) => match ty.element_type() {
            Some(elem) => Ok(Place::Element {
                array_slot: slot,
                elem,
                index,
            }),
            None => Err(Error::type_error("array", format!("{} '{}'", ty, name))),
        },
        Binding::Local(VarLocation::Offload { ty, .. }) | Binding::Constant { ty, .. } => {
            Err(Error::type_error("array", format!("{} '{}'", ty, name)))
        }
        Binding::Global(global) => match &global.kind {
            GlobalKind::Array {
                elem,
                alloc,
                emulated,
                ..
            } => Ok(storage_place(
                ctx,
                alloc.class,
                name,
                *elem,
                Address::Indexed {
                    outer: index,
                    stride: 1,
                    inner: None,
                    base: alloc.offset,
                },
                *emulated,
            )),
            GlobalKind::ConstArray {
                elem,
                class,
                emulated,
                ..
            } => Ok(Place::Static {
                array: StaticArray {
                    cp: ctx.pool.const_table(&global.name, *class),
                    name: name.to_string(),
                    read_only: true,
                },
                elem: *elem,
                address: Address::Indexed {
                    outer: index,
                    stride: 1,
                    inner: None,
                    base: 0,
                },
                emulated: *emulated,
            }),
            GlobalKind::StructArray { .. } | GlobalKind::ConstStructArray { .. } => Err(
                Error::codegen(format!("struct array '{}' must be accessed through a field", name)),
            ),
            GlobalKind::Scalar { ty, .. } | GlobalKind::Constant { ty, .. } => {
                Err(Error::type_error("array", format!("{} '{}'", ty, name)))
            }
        },
    }
}

/// `s[j].f`, `s.f`, or with `inner`, `s[j].f[i]`
fn resolve_field(
    base: &Expr,
    field: &str,
    inner: Option<IndexOperand>,
    ctx: &mut GenerationContext<'_>,
) -> Result<Place> {
    let (name, outer) = match base {
        Expr::ArrayRef { array, index } => match array.as_ref() {
            Expr::Var(name) => (name.as_str(), (**index).clone()),
            other => return Err(Error::codegen(format!("unsupported struct base: {:?}", other))),
        },
        Expr::Var(name) => (name.as_str(), Expr::short(0)),
        other => return Err(Error::codegen(format!("unsupported struct base: {:?}", other))),
    };
    let unknown = || Error::UnknownField {
        base: name.to_string(),
        field: field.to_string(),
    };
    let global = match ctx.lookup(name)? {
        Binding::Global(global) => global,
        _ => return Err(Error::type_error("struct", format!("'{}'", name))),
    };

    let check_shape = |is_array: bool| -> Result<()> {
        match (is_array, inner.is_some()) {
            (true, false) => Err(Error::codegen(format!(
                "field '{}.{}' is an array and must be indexed",
                name, field
            ))),
            (false, true) => Err(Error::type_error("array field", format!("'{}.{}'", name, field))),
            _ => Ok(()),
        }
    };

    match &global.kind {
        GlobalKind::StructArray { fields, .. } => {
            let f = fields.iter().find(|f| f.name == field).ok_or_else(unknown)?;
            check_shape(f.is_array)?;
            Ok(storage_place(
                ctx,
                f.alloc.class,
                name,
                f.elem,
                Address::Indexed {
                    outer: IndexOperand::Expr(outer),
                    stride: f.field_array_size,
                    inner,
                    base: f.alloc.offset,
                },
                f.emulated,
            ))
        }
        GlobalKind::ConstStructArray { fields, .. } => {
            let f = fields.iter().find(|f| f.name == field).ok_or_else(unknown)?;
            check_shape(f.is_array)?;
            let key = format!("{}${}", global.name, f.name);
            Ok(Place::Static {
                array: StaticArray {
                    cp: ctx.pool.const_table(&key, f.class),
                    name: key,
                    read_only: true,
                },
                elem: f.elem,
                address: Address::Indexed {
                    outer: IndexOperand::Expr(outer),
                    stride: f.field_array_size,
                    inner,
                    base: 0,
                },
                emulated: f.emulated,
            })
        }
        _ => Err(Error::type_error("struct", format!("'{}'", name))),
    }
}

/// Spill index operands with side effects into temporaries so the address
/// can be emitted more than once
pub fn stabilize(mut place: Place, ctx: &mut GenerationContext<'_>) -> Result<(Code, Place)> {
    let mut code = Code::new();
    for operand in place.operands_mut() {
        if !operand.has_side_effects() {
            continue;
        }
        if let IndexOperand::Expr(expr) = operand {
            let (index_code, ty) = gen_expr(expr, ctx)?;
            code.extend(index_code);
            code.emit_all(coerce_index(ty)?);
            let slot = ctx.alloc_temp(1);
            code.emit(Instruction::Store(LocalKind::Short, slot));
            *operand = IndexOperand::Temp(slot);
        }
    }
    Ok((code, place))
}

// =============================================================================
// Emission
// =============================================================================

/// Push a static array reference, through the temporary cache when enabled
pub fn emit_array_ref(cp: u16, ctx: &mut GenerationContext<'_>) -> Code {
    let mut code = Code::new();
    if !ctx.caches_array_refs() {
        code.emit(Instruction::GetStatic(StaticKind::Ref, cp));
        return code;
    }
    match ctx.cached_array_ref(cp) {
        Some(slot) => code.emit(Instruction::Load(LocalKind::Ref, slot)),
        None => {
            let slot = ctx.alloc_temp(1);
            code.emit(Instruction::GetStatic(StaticKind::Ref, cp));
            code.emit(Instruction::Dup);
            code.emit(Instruction::Store(LocalKind::Ref, slot));
            ctx.cache_array_ref(cp, slot);
        }
    }
    code
}

fn emit_index_operand(operand: &IndexOperand, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    match operand {
        IndexOperand::Temp(slot) => Ok(vec![Instruction::Load(LocalKind::Short, *slot).into()]),
        IndexOperand::Expr(expr) => {
            if let Some(v) = expr.fold_constant() {
                return Ok(vec![Instruction::SConst(v as i16).into()]);
            }
            let (mut code, ty) = gen_expr(expr, ctx)?;
            code.emit_all(coerce_index(ty)?);
            Ok(code)
        }
    }
}

/// Multiply the short on the stack by a constant, shifting for powers of two
fn emit_scale(code: &mut Code, factor: u16) {
    match factor {
        1 => {}
        f if f.is_power_of_two() => {
            code.emit(Instruction::SConst(f.trailing_zeros() as i16));
            code.emit(Instruction::Arith(Width::Short, ArithOp::Shl));
        }
        f => {
            code.emit(Instruction::SConst(f as i16));
            code.emit(Instruction::Arith(Width::Short, ArithOp::Mul));
        }
    }
}

/// Element offset relative to the base when every operand is constant
fn constant_index(
    outer: &IndexOperand,
    stride: u16,
    inner: Option<&IndexOperand>,
    emulated: bool,
) -> Option<i64> {
    let fold = |op: &IndexOperand| match op {
        IndexOperand::Expr(e) => e.fold_constant(),
        IndexOperand::Temp(_) => None,
    };
    let inner = match inner {
        Some(op) => fold(op)?,
        None => 0,
    };
    let index = fold(outer)? * stride as i64 + inner;
    Some(if emulated { index * 2 } else { index })
}

/// Push the element index for one half (0 = high or only, 1 = low)
fn emit_element_index(
    address: &Address,
    emulated: bool,
    half: u16,
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    let mut code = Code::new();
    match address {
        Address::Fixed(offset) => code.emit(Instruction::SConst((offset + half) as i16)),
        Address::StackRelative { sp, depth } => {
            code.emit(Instruction::GetStatic(StaticKind::Short, *sp));
            code.emit(Instruction::SConst((depth - half) as i16));
            code.emit(Instruction::Arith(Width::Short, ArithOp::Sub));
        }
        Address::Indexed {
            outer,
            stride,
            inner,
            base,
        } => {
            if let Some(index) = constant_index(outer, *stride, inner.as_ref(), emulated) {
                code.emit(Instruction::SConst((index + (base + half) as i64) as i16));
                return Ok(code);
            }
            code.extend(emit_index_operand(outer, ctx)?);
            emit_scale(&mut code, *stride);
            if let Some(inner) = inner {
                code.extend(emit_index_operand(inner, ctx)?);
                code.emit(Instruction::Arith(Width::Short, ArithOp::Add));
            }
            if emulated {
                emit_scale(&mut code, 2);
            }
            let offset = base + half;
            if offset != 0 {
                code.emit(Instruction::SConst(offset as i16));
                code.emit(Instruction::Arith(Width::Short, ArithOp::Add));
            }
        }
    }
    Ok(code)
}

/// Push the `[ref, index]` pair of an addressable place (one half of an
/// emulated INT when `half` is given)
pub fn emit_address(place: &Place, half: u16, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    match place {
        Place::Slot { .. } => Err(Error::codegen("local slots have no array address")),
        Place::Element {
            array_slot, index, ..
        } => {
            let mut code = vec![Instruction::Load(LocalKind::Ref, *array_slot).into()];
            code.extend(emit_index_operand(index, ctx)?);
            Ok(code)
        }
        Place::Static {
            array,
            address,
            emulated,
            ..
        } => {
            let mut code = emit_array_ref(array.cp, ctx);
            code.extend(emit_element_index(address, *emulated, half, ctx)?);
            Ok(code)
        }
    }
}

/// Array opcode family of an addressable place
pub fn element_kind(place: &Place) -> ArrayElem {
    ArrayElem::of(place.ty())
}

/// Load a place's value
pub fn emit_load(place: &Place, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    match place {
        Place::Slot { slot, ty } => Ok(vec![Instruction::Load(LocalKind::of(*ty), *slot).into()]),
        Place::Static { emulated: true, .. } => {
            let mut code = emit_address(place, 0, ctx)?;
            code.emit_all([
                Instruction::ArrayLoad(ArrayElem::Short),
                Instruction::Convert(Conversion::S2I),
                Instruction::IConst(16),
                Instruction::Arith(Width::Int, ArithOp::Shl),
            ]);
            code.extend(emit_address(place, 1, ctx)?);
            code.emit_all([
                Instruction::ArrayLoad(ArrayElem::Short),
                Instruction::Convert(Conversion::S2I),
                Instruction::IConst(0xFFFF),
                Instruction::Arith(Width::Int, ArithOp::And),
                Instruction::Arith(Width::Int, ArithOp::Or),
            ]);
            Ok(code)
        }
        _ => {
            let mut code = emit_address(place, 0, ctx)?;
            code.emit(Instruction::ArrayLoad(element_kind(place)));
            Ok(code)
        }
    }
}

/// Assign `value` to a place. Code is generated in the order it executes,
/// so array references cached by the address are stored before reuse.
pub fn emit_assign(place: &Place, value: &Expr, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    place.check_writable()?;
    let ty = place.ty();
    match place {
        Place::Slot { slot, ty } => {
            let mut code = gen_coerced(value, *ty, ctx)?;
            code.emit(Instruction::Store(LocalKind::of(*ty), *slot));
            Ok(code)
        }
        Place::Static { emulated: true, .. } => {
            let (mut code, place) = stabilize(place.clone(), ctx)?;
            code.extend(gen_coerced(value, ty, ctx)?);
            code.extend(emit_split_store(&place, ctx)?);
            Ok(code)
        }
        _ => {
            let mut code = emit_address(place, 0, ctx)?;
            code.extend(gen_coerced(value, ty, ctx)?);
            code.emit(Instruction::ArrayStore(element_kind(place)));
            Ok(code)
        }
    }
}

/// Consume the INT on top of the stack into both halves of an emulated place
pub fn emit_split_store(place: &Place, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    let swap_under_pair = Instruction::SwapX { m: 2, n: 1 };
    let mut code = Code::new();
    code.emit_all([
        Instruction::Dup2,
        Instruction::IConst(16),
        Instruction::Arith(Width::Int, ArithOp::Ushr),
        Instruction::Convert(Conversion::I2S),
    ]);
    code.extend(emit_address(place, 0, ctx)?);
    code.emit_all([swap_under_pair.clone(), Instruction::ArrayStore(ArrayElem::Short)]);
    code.emit(Instruction::Convert(Conversion::I2S));
    code.extend(emit_address(place, 1, ctx)?);
    code.emit_all([swap_under_pair, Instruction::ArrayStore(ArrayElem::Short)]);
    Ok(code)
}
