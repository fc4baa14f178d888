//! Storage allocation
//!
//! Walks every declaration of a translation unit once and gives each global,
//! struct field, parameter and local a physical home. Problems are collected
//! as the walk goes and reported together at the end, so one compile attempt
//! surfaces every declaration error at once.
//!
//! ## Placement rules
//!
//! | Declaration | Home |
//! |-------------|------|
//! | global scalar / array | `MEM_B/S/I` (emulated INT in `MEM_S` pairs) |
//! | struct array | one `MEM_*` range per field |
//! | const array | its own `CONST_*` table |
//! | const scalar | folded, no storage |
//! | parameter | first local slots |
//! | local | fast slot within budget, else `STACK_B/S/I` |
//! | static local | global named `function$name` |

use super::ir::{
    Allocation, FunctionDecl, GlobalDecl, Initializer, LocalDecl, LocalStorage, LogicalType,
    SourceLoc, Stmt, StmtKind, StorageClass, StructDecl, TranslationUnit, TypeSpec,
    MAX_ARRAY_ELEMENTS,
};
use super::symbols::{
    ConstFieldSymbol, FieldSymbol, FunctionFrame, FunctionSymbol, GlobalKind, GlobalSymbol,
    StructField, StructLayout, SymbolTable, VarLocation,
};
use crate::config::TargetConfig;
use crate::error::{Diagnostics, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Split an INT into its stored `(high, low)` short pair
pub fn split_int(value: i64) -> (i64, i64) {
    let u = (value as u64) & 0xFFFF_FFFF;
    let high = (u >> 16) as u16 as i16 as i64;
    let low = (u & 0xFFFF) as u16 as i16 as i64;
    (high, low)
}

/// Reassemble an INT from its stored short pair
pub fn join_int(high: i64, low: i64) -> i64 {
    (((high as u32) << 16) | (low as u32 & 0xFFFF)) as i32 as i64
}

/// Allocate storage for a whole translation unit
pub fn allocate_storage(unit: &TranslationUnit, config: &TargetConfig) -> Result<SymbolTable> {
    StorageAllocator::new(config).run(unit)
}

/// Assigns storage classes and offsets, collecting every error on the way
pub struct StorageAllocator<'a> {
    config: &'a TargetConfig,
    symbols: SymbolTable,
    diags: Diagnostics,
}

impl<'a> StorageAllocator<'a> {
    /// Allocator for a target
    pub fn new(config: &'a TargetConfig) -> Self {
        Self {
            config,
            symbols: SymbolTable::new(),
            diags: Diagnostics::new(),
        }
    }

    /// Reserve `count` fresh elements of `class` and return the first offset.
    ///
    /// Ranges are handed out by strictly increasing offset and never overlap.
    pub fn allocate(&mut self, class: StorageClass, count: u32) -> u16 {
        let size = self.symbols.sizes.entry(class).or_insert(0);
        let offset = *size;
        *size += count;
        u16::try_from(offset).unwrap_or(u16::MAX)
    }

    /// Walk the unit and return the finished symbol table
    pub fn run(mut self, unit: &TranslationUnit) -> Result<SymbolTable> {
        for decl in &unit.structs {
            self.declare_struct(decl);
        }
        for decl in &unit.globals {
            self.declare_global(decl);
        }
        // Signatures first, so calls to later functions resolve
        for func in &unit.functions {
            self.declare_function(func);
        }
        for func in &unit.functions {
            self.layout_frame(func);
        }
        self.check_class_totals();

        let Self { symbols, diags, .. } = self;
        diags.into_result()?;
        debug!(
            globals = symbols.globals.len(),
            functions = symbols.functions.len(),
            "storage allocation complete"
        );
        Ok(symbols)
    }

    fn error(&mut self, loc: Option<&SourceLoc>, message: impl Into<String>) {
        self.diags.push(loc.cloned(), message);
    }

    fn emulated(&self, ty: LogicalType) -> bool {
        ty == LogicalType::Int && self.config.emulates_int()
    }

    /// Map a scalar type spec, recording an error for anything unsupported
    fn primitive(&mut self, ty: &TypeSpec, context: &str, loc: Option<&SourceLoc>) -> Option<LogicalType> {
        match ty {
            TypeSpec::Byte | TypeSpec::Short | TypeSpec::Int => ty.primitive(),
            TypeSpec::Unsigned(name) => {
                self.error(loc, format!("Unsigned types not supported: '{}' in {}", name, context));
                None
            }
            TypeSpec::Long => {
                self.error(loc, format!("64-bit integer types not supported in {}", context));
                None
            }
            TypeSpec::Pointer(_) => {
                self.error(loc, format!("Pointers not supported: {}", context));
                None
            }
            other => {
                self.error(loc, format!("Unsupported type '{}' in {}", other, context));
                None
            }
        }
    }

    /// Parameter and return types: primitives, opaque references and
    /// pointers to primitives (array references)
    fn value_type(&mut self, ty: &TypeSpec, context: &str, loc: Option<&SourceLoc>) -> Option<LogicalType> {
        match ty {
            TypeSpec::Opaque(_) => Some(LogicalType::Ref),
            TypeSpec::Pointer(inner) => match inner.as_ref() {
                TypeSpec::Opaque(_) | TypeSpec::Void => Some(LogicalType::Ref),
                TypeSpec::Byte | TypeSpec::Short | TypeSpec::Int => {
                    inner.primitive().and_then(|p| p.to_array())
                }
                TypeSpec::Unsigned(name) => {
                    self.error(loc, format!("Unsigned types not supported: '{}' in {}", name, context));
                    None
                }
                other => {
                    self.error(loc, format!("Unsupported pointer type '{}*' in {}", other, context));
                    None
                }
            },
            other => self.primitive(other, context, loc),
        }
    }

    fn name_available(&mut self, name: &str, what: &str, loc: Option<&SourceLoc>) -> bool {
        if self.symbols.globals.contains_key(name) || self.symbols.functions.contains_key(name) {
            self.error(loc, format!("{} '{}' conflicts with an existing declaration", what, name));
            false
        } else {
            true
        }
    }

    fn array_len(&mut self, name: &str, size: i64, loc: Option<&SourceLoc>) -> Option<u16> {
        if size <= 0 {
            self.error(loc, format!("Array '{}' has invalid size {}", name, size));
            None
        } else if size > MAX_ARRAY_ELEMENTS as i64 {
            self.error(
                loc,
                format!("Array '{}' has {} elements; maximum is {}", name, size, MAX_ARRAY_ELEMENTS),
            );
            None
        } else {
            Some(size as u16)
        }
    }

    // =========================================================================
    // Structs
    // =========================================================================

    fn declare_struct(&mut self, decl: &StructDecl) {
        if self.symbols.structs.contains_key(&decl.name) {
            self.error(decl.loc.as_ref(), format!("Duplicate struct '{}'", decl.name));
            return;
        }
        let mut fields = Vec::new();
        let mut seen = BTreeSet::new();
        for field in &decl.fields {
            let context = format!("struct field {}.{}", decl.name, field.name);
            if !seen.insert(field.name.clone()) {
                self.error(decl.loc.as_ref(), format!("Duplicate field '{}'", context));
                continue;
            }
            let Some(elem) = self.primitive(&field.ty, &context, decl.loc.as_ref()) else {
                continue;
            };
            let array_size = match field.array_size {
                Some(size) => match self.array_len(&context, size, decl.loc.as_ref()) {
                    Some(n) => Some(n),
                    None => continue,
                },
                None => None,
            };
            fields.push(StructField {
                name: field.name.clone(),
                elem,
                array_size,
            });
        }
        self.symbols.structs.insert(
            decl.name.clone(),
            StructLayout {
                name: decl.name.clone(),
                fields,
            },
        );
    }

    // =========================================================================
    // Globals
    // =========================================================================

    fn declare_global(&mut self, decl: &GlobalDecl) {
        let loc = decl.loc.as_ref();
        if let TypeSpec::Struct(struct_name) = &decl.ty {
            self.declare_struct_global(decl, struct_name);
            return;
        }
        let context = format!("global '{}'", decl.name);
        let Some(ty) = self.primitive(&decl.ty, &context, loc) else {
            return;
        };

        if decl.is_array {
            if decl.is_const {
                self.declare_const_array(decl, ty);
            } else {
                self.declare_array(decl, ty);
            }
            return;
        }

        if decl.is_const {
            let value = match &decl.init {
                Some(Initializer::Scalar(v)) => ty.wrap(*v),
                Some(_) => {
                    self.error(loc, format!("const '{}' initializer must be a single value", decl.name));
                    return;
                }
                None => {
                    self.error(loc, format!("const '{}' requires an initializer", decl.name));
                    return;
                }
            };
            if self.name_available(&decl.name, "Constant", loc) {
                self.insert_global(decl.name.clone(), GlobalKind::Constant { ty, value }, loc);
            }
            return;
        }

        let initial = match &decl.init {
            Some(Initializer::Scalar(v)) => Some(ty.wrap(*v)),
            Some(_) => {
                self.error(loc, format!("Global '{}' initializer must be a single value", decl.name));
                return;
            }
            None => None,
        };
        if !self.name_available(&decl.name, "Global variable", loc) {
            return;
        }
        let kind = self.scalar_kind(ty, initial);
        self.insert_global(decl.name.clone(), kind, loc);
    }

    fn scalar_kind(&mut self, ty: LogicalType, initial: Option<i64>) -> GlobalKind {
        let emulated = self.emulated(ty);
        let (class, count) = if emulated {
            (StorageClass::MemS, 2)
        } else {
            (StorageClass::persistent(ty).unwrap_or(StorageClass::MemS), 1)
        };
        let offset = self.allocate(class, count);
        GlobalKind::Scalar {
            ty,
            alloc: Allocation {
                class,
                offset,
                count: count as u16,
            },
            emulated,
            initial,
        }
    }

    fn array_kind(&mut self, elem: LogicalType, len: u16, initial: Option<Vec<i64>>) -> GlobalKind {
        let emulated = self.emulated(elem);
        let (class, count) = if emulated {
            (StorageClass::MemS, len as u32 * 2)
        } else {
            (
                StorageClass::persistent(elem).unwrap_or(StorageClass::MemS),
                len as u32,
            )
        };
        let offset = self.allocate(class, count);
        GlobalKind::Array {
            elem,
            len,
            alloc: Allocation {
                class,
                offset,
                count: u16::try_from(count).unwrap_or(u16::MAX),
            },
            emulated,
            initial,
        }
    }

    fn declare_array(&mut self, decl: &GlobalDecl, elem: LogicalType) {
        let loc = decl.loc.as_ref();
        let values = match &decl.init {
            Some(Initializer::List(values)) => Some(values.clone()),
            Some(_) => {
                self.error(loc, format!("Array '{}' initializer must be a list", decl.name));
                return;
            }
            None => None,
        };
        let size = match (decl.array_size, &values) {
            (Some(size), Some(values)) if size != values.len() as i64 => {
                self.error(
                    loc,
                    format!(
                        "Array '{}' size mismatch: declared {}, got {} values",
                        decl.name,
                        size,
                        values.len()
                    ),
                );
                return;
            }
            (Some(size), _) => size,
            (None, Some(values)) => values.len() as i64,
            (None, None) => {
                self.error(loc, format!("Array '{}' must have explicit size or initializer", decl.name));
                return;
            }
        };
        let Some(len) = self.array_len(&decl.name, size, loc) else {
            return;
        };
        if !self.name_available(&decl.name, "Global array", loc) {
            return;
        }
        let initial = values.map(|v| v.into_iter().map(|x| elem.wrap(x)).collect());
        let kind = self.array_kind(elem, len, initial);
        self.insert_global(decl.name.clone(), kind, loc);
    }

    fn stored_values(&self, elem: LogicalType, values: &[i64]) -> (Vec<i64>, StorageClass, bool) {
        if self.emulated(elem) {
            let stored = values
                .iter()
                .flat_map(|&v| {
                    let (hi, lo) = split_int(v);
                    [hi, lo]
                })
                .collect();
            (stored, StorageClass::ConstS, true)
        } else {
            (
                values.to_vec(),
                StorageClass::read_only(elem).unwrap_or(StorageClass::ConstS),
                false,
            )
        }
    }

    fn declare_const_array(&mut self, decl: &GlobalDecl, elem: LogicalType) {
        let loc = decl.loc.as_ref();
        let values: Vec<i64> = match &decl.init {
            Some(Initializer::List(values)) => values.iter().map(|&v| elem.wrap(v)).collect(),
            Some(_) => {
                self.error(loc, format!("const array '{}' initializer must be a list", decl.name));
                return;
            }
            None => {
                self.error(loc, format!("const array '{}' requires an initializer", decl.name));
                return;
            }
        };
        if let Some(size) = decl.array_size {
            if size != values.len() as i64 {
                self.error(
                    loc,
                    format!(
                        "const array '{}' size mismatch: declared {}, got {} values",
                        decl.name,
                        size,
                        values.len()
                    ),
                );
                return;
            }
        }
        if self.array_len(&decl.name, values.len() as i64, loc).is_none() {
            return;
        }
        if !self.name_available(&decl.name, "Const array", loc) {
            return;
        }
        let (stored, class, emulated) = self.stored_values(elem, &values);
        self.insert_global(
            decl.name.clone(),
            GlobalKind::ConstArray {
                elem,
                values,
                stored,
                class,
                emulated,
            },
            loc,
        );
    }

    fn declare_struct_global(&mut self, decl: &GlobalDecl, struct_name: &str) {
        let loc = decl.loc.as_ref();
        let Some(layout) = self.symbols.structs.get(struct_name).cloned() else {
            self.error(loc, format!("Unknown struct type '{}' for '{}'", struct_name, decl.name));
            return;
        };

        let size = match (decl.is_array, decl.array_size, &decl.init) {
            (false, _, _) => 1,
            (true, Some(size), _) => size,
            (true, None, Some(Initializer::Records(records))) => records.len() as i64,
            (true, None, _) => {
                self.error(loc, format!("Array '{}' must have explicit size or initializer", decl.name));
                return;
            }
        };
        let Some(len) = self.array_len(&decl.name, size, loc) else {
            return;
        };

        if decl.is_const {
            self.declare_const_struct_array(decl, &layout, len);
            return;
        }
        if decl.init.is_some() {
            self.error(loc, format!("Struct array '{}' initializers must be const", decl.name));
            return;
        }
        if !self.name_available(&decl.name, "Struct array", loc) {
            return;
        }

        let mut fields = Vec::new();
        for field in &layout.fields {
            let emulated = self.emulated(field.elem);
            let per = field.per_element() as u32;
            let (class, count) = if emulated {
                (StorageClass::MemS, len as u32 * per * 2)
            } else {
                (
                    StorageClass::persistent(field.elem).unwrap_or(StorageClass::MemS),
                    len as u32 * per,
                )
            };
            let offset = self.allocate(class, count);
            fields.push(FieldSymbol {
                name: field.name.clone(),
                elem: field.elem,
                field_array_size: field.per_element(),
                is_array: field.array_size.is_some(),
                alloc: Allocation {
                    class,
                    offset,
                    count: u16::try_from(count).unwrap_or(u16::MAX),
                },
                emulated,
            });
        }
        self.insert_global(
            decl.name.clone(),
            GlobalKind::StructArray {
                struct_name: layout.name.clone(),
                len,
                fields,
            },
            loc,
        );
    }

    fn declare_const_struct_array(&mut self, decl: &GlobalDecl, layout: &StructLayout, len: u16) {
        let loc = decl.loc.as_ref();
        let records = match &decl.init {
            Some(Initializer::Records(records)) => records,
            Some(_) => {
                self.error(loc, format!("const struct array '{}' needs one record per element", decl.name));
                return;
            }
            None => {
                self.error(loc, format!("const array '{}' requires an initializer", decl.name));
                return;
            }
        };
        if records.len() != len as usize {
            self.error(
                loc,
                format!(
                    "const array '{}' size mismatch: declared {}, got {} values",
                    decl.name,
                    len,
                    records.len()
                ),
            );
            return;
        }
        for (i, record) in records.iter().enumerate() {
            if record.len() != layout.fields.len() {
                self.error(
                    loc,
                    format!(
                        "const array '{}' element {} has {} fields, struct {} has {}",
                        decl.name,
                        i,
                        record.len(),
                        layout.name,
                        layout.fields.len()
                    ),
                );
                return;
            }
            for (field, values) in layout.fields.iter().zip(record) {
                if values.len() != field.per_element() as usize {
                    self.error(
                        loc,
                        format!(
                            "const array '{}' element {} field '{}' expects {} values, got {}",
                            decl.name,
                            i,
                            field.name,
                            field.per_element(),
                            values.len()
                        ),
                    );
                    return;
                }
            }
        }
        if !self.name_available(&decl.name, "Const struct array", loc) {
            return;
        }

        // Field-major: every element's values for field 0, then field 1, ...
        let fields = layout
            .fields
            .iter()
            .enumerate()
            .map(|(fi, field)| {
                let values: Vec<i64> = records
                    .iter()
                    .flat_map(|record| record[fi].iter().map(|&v| field.elem.wrap(v)))
                    .collect();
                let (stored, class, emulated) = self.stored_values(field.elem, &values);
                ConstFieldSymbol {
                    name: field.name.clone(),
                    elem: field.elem,
                    field_array_size: field.per_element(),
                    is_array: field.array_size.is_some(),
                    values,
                    stored,
                    class,
                    emulated,
                }
            })
            .collect();
        self.insert_global(
            decl.name.clone(),
            GlobalKind::ConstStructArray {
                struct_name: layout.name.clone(),
                len,
                fields,
            },
            loc,
        );
    }

    fn insert_global(&mut self, name: String, kind: GlobalKind, loc: Option<&SourceLoc>) {
        self.symbols.global_order.push(name.clone());
        self.symbols.globals.insert(
            name.clone(),
            GlobalSymbol {
                name,
                kind,
                loc: loc.cloned(),
            },
        );
    }

    // =========================================================================
    // Functions
    // =========================================================================

    fn declare_function(&mut self, func: &FunctionDecl) {
        let loc = func.loc.as_ref();
        let ret = match &func.ret {
            TypeSpec::Void => Some(LogicalType::Void),
            other => self.value_type(other, &format!("return type of '{}'", func.name), loc),
        };

        let mut params = Vec::new();
        let mut seen = BTreeSet::new();
        for param in &func.params {
            if !seen.insert(param.name.clone()) {
                self.error(loc, format!("Duplicate parameter name: '{}'", param.name));
                continue;
            }
            if self.symbols.globals.contains_key(&param.name) {
                self.error(loc, format!("Parameter '{}' shadows global variable", param.name));
                continue;
            }
            if let Some(ty) = self.value_type(&param.ty, &format!("parameter '{}'", param.name), loc) {
                params.push((param.name.clone(), ty));
            }
        }

        let Some(ret) = ret else {
            return;
        };
        if !self.name_available(&func.name, "Function", loc) {
            return;
        }
        self.symbols.function_order.push(func.name.clone());
        self.symbols.functions.insert(
            func.name.clone(),
            FunctionSymbol {
                name: func.name.clone(),
                ret,
                params,
                frame: FunctionFrame::default(),
            },
        );
    }

    fn layout_frame(&mut self, func: &FunctionDecl) {
        let Some(params) = self
            .symbols
            .functions
            .get(&func.name)
            .map(|f| f.params.clone())
        else {
            return;
        };

        let mut frame = FunctionFrame {
            cache_array_refs: func.has_pragma(super::ir::Pragma::CacheArrayRefs),
            ..FunctionFrame::default()
        };
        let mut next_slot: u16 = 0;
        for (name, ty) in &params {
            frame.vars.insert(
                name.clone(),
                VarLocation::Slot {
                    slot: next_slot,
                    ty: *ty,
                    is_param: true,
                },
            );
            next_slot += ty.slot_size();
        }
        frame.param_slots = next_slot;

        let mut decls: Vec<&LocalDecl> = func.locals.iter().collect();
        collect_decls(&func.body, &mut decls);
        for decl in decls {
            self.place_local(func, decl, &mut frame, &mut next_slot);
        }
        frame.fast_slots = next_slot;

        if let Some(bound) = self.config.offload_bound {
            for (class, limit) in [
                (StorageClass::StackB, bound.byte),
                (StorageClass::StackS, bound.short),
                (StorageClass::StackI, bound.int),
            ] {
                let used = frame.usage(class);
                if used > limit {
                    self.error(
                        func.loc.as_ref(),
                        format!(
                            "Function '{}' needs {} {} elements; offload bound is {}",
                            func.name, used, class, limit
                        ),
                    );
                }
            }
        }

        debug!(
            function = %func.name,
            params = frame.param_slots,
            fast = frame.fast_slots,
            offload = frame.uses_offload(),
            "laid out frame"
        );
        if let Some(symbol) = self.symbols.functions.get_mut(&func.name) {
            symbol.frame = frame;
        }
    }

    fn place_local(
        &mut self,
        func: &FunctionDecl,
        decl: &LocalDecl,
        frame: &mut FunctionFrame,
        next_slot: &mut u16,
    ) {
        let loc = decl.loc.as_ref().or(func.loc.as_ref());
        let name = &decl.name;

        if self.symbols.globals.contains_key(name) {
            self.error(loc, format!("Local variable '{}' shadows global variable", name));
            return;
        }
        if let Some(VarLocation::Slot { is_param: true, .. }) = frame.vars.get(name) {
            self.error(loc, format!("Local variable '{}' shadows parameter", name));
            return;
        }
        if frame.vars.contains_key(name)
            || frame.statics.contains_key(name)
            || frame.constants.contains_key(name)
        {
            self.error(loc, format!("Duplicate local variable '{}' in function '{}'", name, func.name));
            return;
        }

        if decl.storage == LocalStorage::Static {
            self.place_static_local(func, decl, frame, loc);
            return;
        }

        if decl.array_size.is_some() {
            self.error(
                loc,
                format!("Local arrays not supported: {} (declare it static or global)", name),
            );
            return;
        }

        // Array references always live in a slot
        if let TypeSpec::Pointer(_) | TypeSpec::Opaque(_) = &decl.ty {
            if let Some(ty) = self.value_type(&decl.ty, &format!("local '{}'", name), loc) {
                frame.vars.insert(
                    name.clone(),
                    VarLocation::Slot {
                        slot: *next_slot,
                        ty,
                        is_param: false,
                    },
                );
                *next_slot += 1;
            }
            return;
        }

        let Some(ty) = self.primitive(&decl.ty, &format!("local '{}'", name), loc) else {
            return;
        };

        if decl.is_const {
            match decl.init.as_ref().and_then(|e| e.fold_constant()) {
                Some(value) => {
                    frame.constants.insert(name.clone(), (ty, ty.wrap(value)));
                }
                None => self.error(
                    loc,
                    format!("const local '{}' requires a constant initializer", name),
                ),
            }
            return;
        }

        let fits = *next_slot + ty.slot_size() <= self.config.max_local_slots;
        if decl.storage == LocalStorage::Auto && fits {
            frame.vars.insert(
                name.clone(),
                VarLocation::Slot {
                    slot: *next_slot,
                    ty,
                    is_param: false,
                },
            );
            *next_slot += ty.slot_size();
            return;
        }

        let emulated = self.emulated(ty);
        let (class, count) = if emulated {
            (StorageClass::StackS, 2)
        } else {
            (StorageClass::offload(ty).unwrap_or(StorageClass::StackS), 1)
        };
        let usage = frame.offload_usage.entry(class).or_insert(0);
        let offset = *usage;
        *usage += count;
        frame.vars.insert(
            name.clone(),
            VarLocation::Offload {
                class,
                offset,
                ty,
                emulated,
            },
        );
    }

    fn place_static_local(
        &mut self,
        func: &FunctionDecl,
        decl: &LocalDecl,
        frame: &mut FunctionFrame,
        loc: Option<&SourceLoc>,
    ) {
        let mangled = format!("{}${}", func.name, decl.name);
        let context = format!("static local '{}'", decl.name);
        let Some(ty) = self.primitive(&decl.ty, &context, loc) else {
            return;
        };
        let initial = decl.init.as_ref().and_then(|e| e.fold_constant());
        if decl.init.is_some() && initial.is_none() {
            self.error(loc, format!("{} requires a constant initializer", context));
            return;
        }
        let kind = match decl.array_size {
            Some(size) => {
                let Some(len) = self.array_len(&decl.name, size, loc) else {
                    return;
                };
                self.array_kind(ty, len, None)
            }
            None => self.scalar_kind(ty, initial.map(|v| ty.wrap(v))),
        };
        self.insert_global(mangled.clone(), kind, loc);
        frame.statics.insert(decl.name.clone(), mangled);
    }

    fn check_class_totals(&mut self) {
        let totals: Vec<(StorageClass, u32)> =
            self.symbols.sizes.iter().map(|(c, s)| (*c, *s)).collect();
        for (class, total) in totals {
            if total > MAX_ARRAY_ELEMENTS {
                self.error(
                    None,
                    format!(
                        "Memory class {} needs {} elements; maximum is {}",
                        class, total, MAX_ARRAY_ELEMENTS
                    ),
                );
            }
        }
    }
}

/// Every `Decl` statement in a body, in source order
pub fn collect_decls<'s>(stmts: &'s [Stmt], out: &mut Vec<&'s LocalDecl>) {
    for stmt in stmts {
        collect_stmt_decls(stmt, out);
    }
}

fn collect_stmt_decls<'s>(stmt: &'s Stmt, out: &mut Vec<&'s LocalDecl>) {
    match &stmt.kind {
        StmtKind::Decl(decl) => out.push(decl),
        StmtKind::Block(stmts) => collect_decls(stmts, out),
        StmtKind::If {
            then, otherwise, ..
        } => {
            collect_stmt_decls(then, out);
            if let Some(otherwise) = otherwise {
                collect_stmt_decls(otherwise, out);
            }
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            collect_stmt_decls(body, out)
        }
        StmtKind::For {
            init, next, body, ..
        } => {
            if let Some(init) = init {
                collect_stmt_decls(init, out);
            }
            if let Some(next) = next {
                collect_stmt_decls(next, out);
            }
            collect_stmt_decls(body, out);
        }
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                collect_decls(&case.body, out);
            }
        }
        StmtKind::Assign { .. }
        | StmtKind::Return(_)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Expr(_)
        | StmtKind::WideLet { .. }
        | StmtKind::Empty => {}
    }
}

/// Total shared-class usage recomputed from the allocation records
pub fn usage_by_class(symbols: &SymbolTable) -> BTreeMap<StorageClass, u32> {
    let mut usage = BTreeMap::new();
    for global in symbols.globals_in_order() {
        for alloc in global.allocations() {
            *usage.entry(alloc.class).or_insert(0) += alloc.count as u32;
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Expr, FieldDecl, ParamDecl};
    use crate::error::Error;

    fn unit(globals: Vec<GlobalDecl>) -> TranslationUnit {
        TranslationUnit {
            globals,
            ..TranslationUnit::default()
        }
    }

    #[test]
    fn test_offsets_increase_in_declaration_order() {
        let config = TargetConfig::default();
        let symbols = allocate_storage(
            &unit(vec![
                GlobalDecl::scalar("a", TypeSpec::Short),
                GlobalDecl::array("b", TypeSpec::Short, 4),
                GlobalDecl::scalar("c", TypeSpec::Byte),
                GlobalDecl::scalar("d", TypeSpec::Int),
            ]),
            &config,
        )
        .unwrap();
        let allocs = symbols.allocations_in(StorageClass::MemS);
        assert_eq!(
            allocs.iter().map(|a| (a.offset, a.count)).collect::<Vec<_>>(),
            vec![(0, 1), (1, 4), (5, 2)]
        );
        assert_eq!(symbols.size(StorageClass::MemS), 7);
        assert_eq!(symbols.size(StorageClass::MemB), 1);
    }

    #[test]
    fn test_native_int_uses_mem_i() {
        let config = TargetConfig {
            native_int: true,
            javacard_version: crate::config::JavaCardVersion::V3_0_5,
            ..TargetConfig::default()
        };
        let symbols =
            allocate_storage(&unit(vec![GlobalDecl::array("w", TypeSpec::Int, 3)]), &config).unwrap();
        assert_eq!(symbols.size(StorageClass::MemI), 3);
        assert_eq!(symbols.size(StorageClass::MemS), 0);
    }

    #[test]
    fn test_errors_are_batched() {
        let config = TargetConfig::default();
        let err = allocate_storage(
            &unit(vec![
                GlobalDecl::scalar("u", TypeSpec::Unsigned("unsigned short".into())),
                GlobalDecl::array("z", TypeSpec::Short, 0),
                GlobalDecl::array("big", TypeSpec::Byte, 40000),
                GlobalDecl::scalar("l", TypeSpec::Long),
                GlobalDecl::scalar("dup", TypeSpec::Short),
                GlobalDecl::scalar("dup", TypeSpec::Short),
            ]),
            &config,
        )
        .unwrap_err();
        match err {
            Error::Semantic(diags) => assert_eq!(diags.len(), 5),
            other => panic!("expected batch error, got {other:?}"),
        }
    }

    #[test]
    fn test_struct_array_fields() {
        let config = TargetConfig::default();
        let mut tu = unit(vec![GlobalDecl::array("pts", TypeSpec::Struct("P".into()), 3)]);
        tu.structs.push(StructDecl {
            name: "P".into(),
            fields: vec![
                FieldDecl {
                    name: "x".into(),
                    ty: TypeSpec::Short,
                    array_size: None,
                },
                FieldDecl {
                    name: "tag".into(),
                    ty: TypeSpec::Byte,
                    array_size: Some(4),
                },
            ],
            loc: None,
        });
        let symbols = allocate_storage(&tu, &config).unwrap();
        let Some(GlobalKind::StructArray { fields, .. }) = symbols.global("pts").map(|g| &g.kind)
        else {
            panic!("pts should be a struct array");
        };
        assert_eq!(fields[0].alloc.count, 3);
        assert_eq!(fields[1].alloc.count, 12);
        assert_eq!(fields[1].alloc.class, StorageClass::MemB);
    }

    #[test]
    fn test_locals_spill_to_offload() {
        let config = TargetConfig {
            max_local_slots: 3,
            ..TargetConfig::default()
        };
        let mut func = FunctionDecl::new("f", TypeSpec::Void, vec![ParamDecl::new("p", TypeSpec::Short)]);
        func.locals = vec![
            LocalDecl::new("a", TypeSpec::Short),
            LocalDecl::new("b", TypeSpec::Int),
            LocalDecl::new("c", TypeSpec::Byte),
        ];
        func.body = vec![Stmt::decl(
            LocalDecl::new("d", TypeSpec::Short).with_storage(LocalStorage::Offload),
        )];
        let tu = TranslationUnit {
            functions: vec![func],
            ..TranslationUnit::default()
        };
        let symbols = allocate_storage(&tu, &config).unwrap();
        let frame = &symbols.function("f").unwrap().frame;
        assert_eq!(frame.param_slots, 1);
        // p=0, a=1; b needs two slots and would overflow the budget
        assert_eq!(frame.fast_slots, 3);
        assert!(matches!(
            frame.vars["b"],
            VarLocation::Offload {
                class: StorageClass::StackS,
                offset: 0,
                emulated: true,
                ..
            }
        ));
        assert!(matches!(frame.vars["c"], VarLocation::Slot { slot: 2, .. }));
        assert!(matches!(
            frame.vars["d"],
            VarLocation::Offload { offset: 2, .. }
        ));
        assert_eq!(frame.usage(StorageClass::StackS), 3);
    }

    #[test]
    fn test_static_local_is_mangled() {
        let config = TargetConfig::default();
        let mut func = FunctionDecl::new("tick", TypeSpec::Void, vec![]);
        func.locals = vec![LocalDecl::new("n", TypeSpec::Short)
            .with_storage(LocalStorage::Static)
            .with_init(Expr::short(5))];
        let tu = TranslationUnit {
            functions: vec![func],
            ..TranslationUnit::default()
        };
        let symbols = allocate_storage(&tu, &config).unwrap();
        assert!(symbols.global("tick$n").is_some());
        assert_eq!(symbols.function("tick").unwrap().frame.statics["n"], "tick$n");
    }

    #[test]
    fn test_local_array_rejected() {
        let config = TargetConfig::default();
        let mut func = FunctionDecl::new("f", TypeSpec::Void, vec![]);
        let mut arr = LocalDecl::new("buf", TypeSpec::Byte);
        arr.array_size = Some(8);
        func.locals = vec![arr];
        let tu = TranslationUnit {
            functions: vec![func],
            ..TranslationUnit::default()
        };
        let err = allocate_storage(&tu, &config).unwrap_err();
        assert!(err.to_string().contains("Local arrays not supported"));
    }

    #[test]
    fn test_split_join() {
        for v in [0i64, -1, 1, 0x7FFF_FFFF, -0x8000_0000, 0x1234_5678, 0xFFFF] {
            let (hi, lo) = split_int(v);
            assert_eq!(join_int(hi, lo), v);
        }
        assert_eq!(split_int(-1), (-1, -1));
        assert_eq!(split_int(0x0001_8000), (1, -32768));
    }
}
