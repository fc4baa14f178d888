//! Word-level JCVM simulator for integration tests
//!
//! Executes compiled methods against the static arrays described by the
//! constant pool and symbol table. Operand stack and locals are 16-bit words;
//! ints occupy two words with the high half deeper on the stack.

#![allow(dead_code)]

use jcvmc::compiler::constant_pool::CpEntryKind;
use jcvmc::compiler::ir::{
    ArithOp, ArrayElem, Conversion, Instruction, LocalKind, LogicalType, ResolvedCode,
    ReturnKind, StaticKind, StorageClass, Width,
};
use jcvmc::compiler::storage::split_int;
use jcvmc::compiler::symbols::GlobalKind;
use jcvmc::compiler::{CompileOptions, CompileResult, Compiler, TranslationUnit};
use jcvmc::config::TargetConfig;
use std::collections::BTreeMap;

/// Elements in each offload stack
const OFFLOAD_CAPACITY: usize = 1024;
/// Instructions executed before a run is abandoned
const STEP_LIMIT: usize = 1_000_000;

/// Compile a unit with default options
pub fn compile(unit: &TranslationUnit, config: &TargetConfig) -> CompileResult {
    Compiler::new(CompileOptions::default(), config.clone())
        .compile(unit)
        .expect("unit compiles")
}

/// Compile a unit with a given optimization level
pub fn compile_at(unit: &TranslationUnit, config: &TargetConfig, opt_level: u8) -> CompileResult {
    let options = CompileOptions {
        opt_level,
        ..CompileOptions::default()
    };
    Compiler::new(options, config.clone())
        .compile(unit)
        .expect("unit compiles")
}

/// One heap array
#[derive(Debug, Clone)]
pub struct Array {
    /// Element type
    pub elem: LogicalType,
    /// Element values
    pub data: Vec<i32>,
}

/// Simulated card state for one compile result
pub struct Machine<'r> {
    result: &'r CompileResult,
    /// Heap; a reference word is `index + 1`, 0 is null
    pub arrays: Vec<Array>,
    /// Static field values by constant pool index
    pub statics: BTreeMap<u16, i32>,
    /// Array id by static field name (`MEM_S`, `STACK_B`, constant table keys)
    pub named: BTreeMap<String, usize>,
    /// Instructions executed so far
    pub steps: usize,
    /// Deepest operand stack observed, in words
    pub max_depth: usize,
}

fn elem_of(type_name: &str) -> LogicalType {
    match type_name {
        "byte[]" => LogicalType::Byte,
        "int[]" => LogicalType::Int,
        _ => LogicalType::Short,
    }
}

fn class_named(name: &str) -> Option<StorageClass> {
    [
        StorageClass::StackB,
        StorageClass::StackS,
        StorageClass::StackI,
        StorageClass::MemB,
        StorageClass::MemS,
        StorageClass::MemI,
    ]
    .into_iter()
    .find(|c| c.name() == name)
}

fn wrap(value: i64, elem: LogicalType) -> i32 {
    match elem {
        LogicalType::Byte => value as i8 as i32,
        LogicalType::Short => value as i16 as i32,
        _ => value as i32,
    }
}

impl<'r> Machine<'r> {
    /// Build the card image: zeroed memory, initialized globals, constant tables
    pub fn new(result: &'r CompileResult) -> Self {
        let mut machine = Machine {
            result,
            arrays: Vec::new(),
            statics: BTreeMap::new(),
            named: BTreeMap::new(),
            steps: 0,
            max_depth: 0,
        };

        for (idx, entry) in result.constant_pool.entries().iter().enumerate() {
            if entry.kind != CpEntryKind::StaticFieldRef {
                continue;
            }
            let (type_name, path) = entry
                .value
                .split_once(' ')
                .unwrap_or(("short", entry.value.as_str()));
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            if !type_name.ends_with("[]") {
                machine.statics.insert(idx as u16, 0);
                continue;
            }
            let elem = elem_of(type_name);
            let data = machine.initial_data(&name, elem);
            machine.arrays.push(Array { elem, data });
            let id = machine.arrays.len() - 1;
            machine.named.insert(name, id);
            machine.statics.insert(idx as u16, id as i32 + 1);
        }
        machine
    }

    fn initial_data(&self, name: &str, elem: LogicalType) -> Vec<i32> {
        let symbols = &self.result.symbols;
        if let Some(class) = class_named(name) {
            if StorageClass::OFFLOAD.contains(&class) {
                return vec![0; OFFLOAD_CAPACITY];
            }
            let mut data = vec![0; symbols.size(class).max(1) as usize];
            for global in symbols.globals_in_order() {
                match &global.kind {
                    GlobalKind::Scalar {
                        alloc,
                        emulated,
                        initial: Some(v),
                        ..
                    } if alloc.class == class => {
                        write_values(&mut data, alloc.offset as usize, &[*v], *emulated, elem);
                    }
                    GlobalKind::Array {
                        alloc,
                        emulated,
                        initial: Some(values),
                        ..
                    } if alloc.class == class => {
                        write_values(&mut data, alloc.offset as usize, values, *emulated, elem);
                    }
                    _ => {}
                }
            }
            return data;
        }

        // Constant table, keyed by array name or `array$field`
        let (base, field) = match name.split_once('$') {
            Some((b, f)) => (b, Some(f)),
            None => (name, None),
        };
        let stored = symbols.global(base).and_then(|g| match (&g.kind, field) {
            (GlobalKind::ConstArray { stored, .. }, None) => Some(stored.clone()),
            (GlobalKind::ConstStructArray { fields, .. }, Some(f)) => fields
                .iter()
                .find(|fs| fs.name == f)
                .map(|fs| fs.stored.clone()),
            _ => None,
        });
        stored
            .unwrap_or_default()
            .into_iter()
            .map(|v| wrap(v, elem))
            .collect()
    }

    /// Array contents by static field name
    pub fn array(&self, name: &str) -> &[i32] {
        let id = self.named[name];
        &self.arrays[id].data
    }

    /// Mutable array contents by static field name
    pub fn array_mut(&mut self, name: &str) -> &mut Vec<i32> {
        let id = self.named[name];
        &mut self.arrays[id].data
    }

    /// Logical value of a global scalar or array element, joining short pairs
    pub fn global(&self, name: &str, index: usize) -> i64 {
        let symbol = self.result.symbols.global(name).expect("global exists");
        let (alloc, emulated) = match &symbol.kind {
            GlobalKind::Scalar { alloc, emulated, .. } | GlobalKind::Array { alloc, emulated, .. } => {
                (*alloc, *emulated)
            }
            other => panic!("not a memory global: {:?}", other),
        };
        let data = self.array(alloc.class.name());
        if emulated {
            let at = alloc.offset as usize + 2 * index;
            ((data[at] as i64) << 16) | (data[at + 1] as i64 & 0xFFFF)
        } else {
            data[alloc.offset as usize + index] as i64
        }
    }

    /// Run a function with short/int/ref arguments; returns the result value
    pub fn call(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, String> {
        let function = self
            .result
            .function(name)
            .ok_or_else(|| format!("no function '{}'", name))?;
        let symbol = self
            .result
            .symbols
            .function(name)
            .ok_or_else(|| format!("no symbol '{}'", name))?;
        if symbol.params.len() != args.len() {
            return Err(format!("'{}' takes {} arguments", name, symbol.params.len()));
        }
        let mut locals = vec![0i32; function.frame.max_locals as usize];
        let mut slot = 0;
        for ((_, ty), &value) in symbol.params.iter().zip(args) {
            if *ty == LogicalType::Int {
                locals[slot] = (value >> 16) as i16 as i32;
                locals[slot + 1] = value as i16 as i32;
                slot += 2;
            } else {
                locals[slot] = wrap(value as i64, *ty);
                slot += 1;
            }
        }
        self.run(name, locals)
    }

    fn run(&mut self, name: &str, mut locals: Vec<i32>) -> Result<Option<i32>, String> {
        let result = self.result;
        let function = result
            .function(name)
            .ok_or_else(|| format!("no function '{}'", name))?;
        let code = ResolvedCode::resolve(&function.code).map_err(|e| e.to_string())?;
        let mut stack: Vec<i32> = Vec::new();
        let mut pc = 0usize;

        macro_rules! pop {
            () => {
                stack.pop().ok_or_else(|| format!("stack underflow at {}", pc))?
            };
        }
        macro_rules! pop_int {
            () => {{
                let lo = pop!();
                let hi = pop!();
                ((hi as i32) << 16) | (lo & 0xFFFF)
            }};
        }
        macro_rules! push_int {
            ($v:expr) => {{
                let v: i32 = $v;
                stack.push((v >> 16) as i16 as i32);
                stack.push(v as i16 as i32);
            }};
        }
        macro_rules! jump {
            ($l:expr) => {{
                pc = code.target($l).map_err(|e| e.to_string())?;
                continue;
            }};
        }

        loop {
            self.steps += 1;
            if self.steps > STEP_LIMIT {
                return Err("step limit exceeded".to_string());
            }
            let instr = *code
                .instructions
                .get(pc)
                .ok_or_else(|| format!("fell off the end of '{}'", name))?;
            pc += 1;
            match instr {
                Instruction::SConst(v) => stack.push(*v as i32),
                Instruction::IConst(v) => push_int!(*v),
                Instruction::AConstNull => stack.push(0),
                Instruction::Load(kind, slot) => {
                    let s = *slot as usize;
                    stack.push(locals[s]);
                    if *kind == LocalKind::Int {
                        stack.push(locals[s + 1]);
                    }
                }
                Instruction::Store(kind, slot) => {
                    let s = *slot as usize;
                    if *kind == LocalKind::Int {
                        locals[s + 1] = pop!();
                    }
                    locals[s] = pop!();
                }
                Instruction::SInc(slot, d) => {
                    let s = *slot as usize;
                    locals[s] = (locals[s] as i16).wrapping_add(*d) as i32;
                }
                Instruction::IInc(slot, d) => {
                    let s = *slot as usize;
                    let v = ((locals[s] << 16) | (locals[s + 1] & 0xFFFF)).wrapping_add(*d as i32);
                    locals[s] = (v >> 16) as i16 as i32;
                    locals[s + 1] = v as i16 as i32;
                }
                Instruction::ArrayLoad(elem) => {
                    let index = pop!();
                    let array = self.deref(pop!())?;
                    let value = *self.arrays[array]
                        .data
                        .get(index as usize)
                        .filter(|_| index >= 0)
                        .ok_or_else(|| format!("index {} out of bounds", index))?;
                    match elem {
                        ArrayElem::Int => push_int!(value),
                        _ => stack.push(value),
                    }
                }
                Instruction::ArrayStore(elem) => {
                    let value = match elem {
                        ArrayElem::Int => pop_int!(),
                        _ => pop!(),
                    };
                    let index = pop!();
                    let array = self.deref(pop!())?;
                    let target = &mut self.arrays[array];
                    let stored = wrap(value as i64, target.elem);
                    let cell = target
                        .data
                        .get_mut(index as usize)
                        .filter(|_| index >= 0)
                        .ok_or_else(|| format!("index {} out of bounds", index))?;
                    *cell = stored;
                }
                Instruction::ArrayLength => {
                    let array = self.deref(pop!())?;
                    stack.push(self.arrays[array].data.len() as i32);
                }
                Instruction::Arith(Width::Short, op) => {
                    let b = pop!() as i16;
                    let a = pop!() as i16;
                    stack.push(arith_short(*op, a, b)? as i32);
                }
                Instruction::Arith(Width::Int, op) => {
                    let b = pop_int!();
                    let a = pop_int!();
                    push_int!(arith_int(*op, a, b)?);
                }
                Instruction::Neg(Width::Short) => {
                    let a = pop!() as i16;
                    stack.push(a.wrapping_neg() as i32);
                }
                Instruction::Neg(Width::Int) => {
                    let a = pop_int!();
                    push_int!(a.wrapping_neg());
                }
                Instruction::Convert(conv) => match conv {
                    Conversion::S2B => {
                        let v = pop!();
                        stack.push(v as i8 as i32);
                    }
                    Conversion::S2I => {
                        let v = pop!() as i16;
                        push_int!(v as i32);
                    }
                    Conversion::I2B => {
                        let v = pop_int!();
                        stack.push(v as i8 as i32);
                    }
                    Conversion::I2S => {
                        let v = pop_int!();
                        stack.push(v as i16 as i32);
                    }
                },
                Instruction::ICmp => {
                    let b = pop_int!();
                    let a = pop_int!();
                    stack.push(a.cmp(&b) as i32);
                }
                Instruction::Dup => {
                    let v = *stack.last().ok_or("dup on empty stack")?;
                    stack.push(v);
                }
                Instruction::Dup2 => {
                    let len = stack.len();
                    if len < 2 {
                        return Err("dup2 underflow".to_string());
                    }
                    let top = stack[len - 2..].to_vec();
                    stack.extend(top);
                }
                Instruction::DupX { m, n } => {
                    let (m, n) = (*m as usize, *n as usize);
                    let len = stack.len();
                    if len < m.max(n) {
                        return Err("dup_x underflow".to_string());
                    }
                    let top = stack[len - m..].to_vec();
                    let at = if n == 0 { len } else { len - n };
                    for (i, v) in top.into_iter().enumerate() {
                        stack.insert(at + i, v);
                    }
                }
                Instruction::SwapX { m, n } => {
                    let (m, n) = (*m as usize, *n as usize);
                    let len = stack.len();
                    if len < m + n {
                        return Err("swap_x underflow".to_string());
                    }
                    let top = stack.split_off(len - m);
                    let below = stack.split_off(len - m - n);
                    stack.extend(top);
                    stack.extend(below);
                }
                Instruction::Pop => {
                    pop!();
                }
                Instruction::Pop2 => {
                    pop!();
                    pop!();
                }
                Instruction::GetStatic(kind, cp) => {
                    let v = *self
                        .statics
                        .get(cp)
                        .ok_or_else(|| format!("unknown static {}", cp))?;
                    match kind {
                        StaticKind::Int => push_int!(v),
                        _ => stack.push(v),
                    }
                }
                Instruction::PutStatic(kind, cp) => {
                    let v = match kind {
                        StaticKind::Int => pop_int!(),
                        StaticKind::Short => pop!() as i16 as i32,
                        StaticKind::Byte => pop!() as i8 as i32,
                        StaticKind::Ref => pop!(),
                    };
                    self.statics.insert(*cp, v);
                }
                Instruction::If(cond, l) => {
                    let v = pop!() as i16;
                    if cond.holds(v as i64, 0) {
                        jump!(*l);
                    }
                }
                Instruction::IfSCmp(cond, l) => {
                    let b = pop!() as i16;
                    let a = pop!() as i16;
                    if cond.holds(a as i64, b as i64) {
                        jump!(*l);
                    }
                }
                Instruction::IfACmp(cond, l) => {
                    let b = pop!();
                    let a = pop!();
                    if cond.holds(a as i64, b as i64) {
                        jump!(*l);
                    }
                }
                Instruction::IfNull(l) => {
                    if pop!() == 0 {
                        jump!(*l);
                    }
                }
                Instruction::IfNonNull(l) => {
                    if pop!() != 0 {
                        jump!(*l);
                    }
                }
                Instruction::Goto(l) => jump!(*l),
                Instruction::TableSwitch {
                    width,
                    default,
                    low,
                    high,
                    targets,
                } => {
                    let v = match width {
                        Width::Short => pop!() as i16 as i32,
                        Width::Int => pop_int!(),
                    };
                    if v < *low || v > *high {
                        jump!(*default);
                    }
                    jump!(targets[(v - low) as usize]);
                }
                Instruction::LookupSwitch {
                    width,
                    default,
                    pairs,
                } => {
                    let v = match width {
                        Width::Short => pop!() as i16 as i32,
                        Width::Int => pop_int!(),
                    };
                    let target = pairs
                        .iter()
                        .find(|(k, _)| *k == v)
                        .map(|(_, l)| *l)
                        .unwrap_or(*default);
                    jump!(target);
                }
                Instruction::Return(kind) => {
                    self.max_depth = self.max_depth.max(stack.len());
                    return Ok(match kind {
                        ReturnKind::Void => None,
                        ReturnKind::Int => Some(pop_int!()),
                        ReturnKind::Short => Some(pop!() as i16 as i32),
                        ReturnKind::Ref => Some(pop!()),
                    });
                }
                Instruction::AThrow => return Err("exception thrown".to_string()),
                Instruction::Invoke { cp, signature } => {
                    let entry = result
                        .constant_pool
                        .get(*cp)
                        .ok_or_else(|| format!("unknown method ref {}", cp))?;
                    let callee = entry
                        .value
                        .split_once('/')
                        .and_then(|(_, rest)| rest.split('(').next())
                        .filter(|_| entry.kind == CpEntryKind::StaticMethodRef)
                        .filter(|s| result.function(s).is_some())
                        .ok_or_else(|| format!("cannot simulate call to {}", entry.value))?
                        .to_string();
                    let callee_fn = result.function(&callee).ok_or("missing callee")?;
                    let words = signature.arg_slots() as usize;
                    if stack.len() < words {
                        return Err("call underflow".to_string());
                    }
                    let args = stack.split_off(stack.len() - words);
                    let mut callee_locals = vec![0i32; callee_fn.frame.max_locals.max(words as u16) as usize];
                    callee_locals[..words].copy_from_slice(&args);
                    match (self.run(&callee, callee_locals)?, signature.ret) {
                        (None, _) => {}
                        (Some(v), LogicalType::Int) => push_int!(v),
                        (Some(v), _) => stack.push(v),
                    }
                }
            }
            self.max_depth = self.max_depth.max(stack.len());
        }
    }

    fn deref(&self, word: i32) -> Result<usize, String> {
        if word <= 0 || word as usize > self.arrays.len() {
            return Err(format!("bad array reference {}", word));
        }
        Ok(word as usize - 1)
    }
}

fn write_values(data: &mut [i32], offset: usize, values: &[i64], emulated: bool, elem: LogicalType) {
    for (i, &v) in values.iter().enumerate() {
        if emulated {
            let (hi, lo) = split_int(v);
            data[offset + 2 * i] = hi as i16 as i32;
            data[offset + 2 * i + 1] = lo as i16 as i32;
        } else {
            data[offset + i] = wrap(v, elem);
        }
    }
}

fn arith_short(op: ArithOp, a: i16, b: i16) -> Result<i16, String> {
    let s = (b & 0x1F) as u32;
    Ok(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div if b == 0 => return Err("division by zero".to_string()),
        ArithOp::Div => a.wrapping_div(b),
        ArithOp::Rem if b == 0 => return Err("division by zero".to_string()),
        ArithOp::Rem => a.wrapping_rem(b),
        ArithOp::And => a & b,
        ArithOp::Or => a | b,
        ArithOp::Xor => a ^ b,
        ArithOp::Shl => ((a as i32) << s) as i16,
        ArithOp::Shr => ((a as i32) >> s) as i16,
        ArithOp::Ushr => ((a as i32 as u32) >> s) as i16,
    })
}

fn arith_int(op: ArithOp, a: i32, b: i32) -> Result<i32, String> {
    let s = (b & 0x1F) as u32;
    Ok(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div if b == 0 => return Err("division by zero".to_string()),
        ArithOp::Div => a.wrapping_div(b),
        ArithOp::Rem if b == 0 => return Err("division by zero".to_string()),
        ArithOp::Rem => a.wrapping_rem(b),
        ArithOp::And => a & b,
        ArithOp::Or => a | b,
        ArithOp::Xor => a ^ b,
        ArithOp::Shl => a.wrapping_shl(s),
        ArithOp::Shr => a.wrapping_shr(s),
        ArithOp::Ushr => ((a as u32) >> s) as i32,
    })
}
