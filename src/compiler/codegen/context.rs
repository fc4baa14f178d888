//! Per-function generation state

use crate::compiler::constant_pool::ConstantPool;
use crate::compiler::ir::{LabelId, LogicalType, SourceLoc, Stmt};
use crate::compiler::ir::Pragma;
use crate::compiler::registry::ApiRegistry;
use crate::compiler::symbols::{FunctionSymbol, GlobalKind, GlobalSymbol, SymbolTable, VarLocation};
use crate::config::TargetConfig;
use crate::error::{Error, Result, Warning};
use std::collections::BTreeMap;
use tracing::warn;

/// What a name refers to inside the current function
#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    /// Folded constant (const local or const global scalar)
    Constant {
        /// Declared type
        ty: LogicalType,
        /// Value
        value: i64,
    },
    /// Parameter or local
    Local(VarLocation),
    /// Global or static local
    Global(&'a GlobalSymbol),
}

#[derive(Debug, Clone, Copy)]
struct BreakTarget {
    label: LabelId,
    used: bool,
}

/// Location and pragma state saved while a nested statement is generated
#[derive(Debug, Clone)]
pub struct StatementScope {
    loc: Option<SourceLoc>,
    suppress_sign_extension: bool,
}

/// Mutable state for generating one function.
///
/// Constructed fresh for every function; nothing in here survives into the
/// next one except what was added to the constant pool.
pub struct GenerationContext<'a> {
    /// Storage decisions for the whole unit
    pub symbols: &'a SymbolTable,
    /// Function being generated
    pub function: &'a FunctionSymbol,
    /// Shared constant pool
    pub pool: &'a mut ConstantPool,
    /// Platform API table
    pub registry: &'a ApiRegistry,
    /// Target settings
    pub config: &'a TargetConfig,
    next_label: u32,
    warnings: Vec<Warning>,
    next_temp: u16,
    max_temp: u16,
    array_refs: BTreeMap<u16, u16>,
    breaks: Vec<BreakTarget>,
    continues: Vec<LabelId>,
    loc: Option<SourceLoc>,
    suppress_sign_extension: bool,
}

impl<'a> GenerationContext<'a> {
    /// Fresh context for `function`
    pub fn new(
        symbols: &'a SymbolTable,
        function: &'a FunctionSymbol,
        pool: &'a mut ConstantPool,
        registry: &'a ApiRegistry,
        config: &'a TargetConfig,
    ) -> Self {
        let first_temp = function.frame.fast_slots;
        Self {
            symbols,
            function,
            pool,
            registry,
            config,
            next_label: 0,
            warnings: Vec::new(),
            next_temp: first_temp,
            max_temp: first_temp,
            array_refs: BTreeMap::new(),
            breaks: Vec::new(),
            continues: Vec::new(),
            loc: None,
            suppress_sign_extension: false,
        }
    }

    /// Allocate a label unique within this function
    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    /// Resolve a name visible in the current function
    pub fn lookup(&self, name: &str) -> Result<Binding<'a>> {
        let frame = &self.function.frame;
        if let Some(&(ty, value)) = frame.constants.get(name) {
            return Ok(Binding::Constant { ty, value });
        }
        if let Some(&loc) = frame.vars.get(name) {
            return Ok(Binding::Local(loc));
        }
        let global_name = frame.statics.get(name).map(String::as_str).unwrap_or(name);
        match self.symbols.global(global_name) {
            Some(GlobalSymbol {
                kind: GlobalKind::Constant { ty, value },
                ..
            }) => Ok(Binding::Constant {
                ty: *ty,
                value: *value,
            }),
            Some(global) => Ok(Binding::Global(global)),
            None => Err(Error::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Enter a statement: record its location and pragmas, reset per-statement
    /// temporaries, and return what to restore afterwards
    pub fn enter_statement(&mut self, stmt: &Stmt) -> StatementScope {
        let saved = StatementScope {
            loc: self.loc.clone(),
            suppress_sign_extension: self.suppress_sign_extension,
        };
        if stmt.loc.is_some() {
            self.loc = stmt.loc.clone();
        }
        self.suppress_sign_extension = stmt.has_pragma(Pragma::IgnoreSignExtension);
        self.array_refs.clear();
        self.next_temp = self.function.frame.fast_slots;
        saved
    }

    /// Leave a statement entered with [`enter_statement`](Self::enter_statement)
    pub fn leave_statement(&mut self, scope: StatementScope) {
        self.loc = scope.loc;
        self.suppress_sign_extension = scope.suppress_sign_extension;
        self.array_refs.clear();
    }

    /// Location of the statement being generated
    pub fn location(&self) -> Option<&SourceLoc> {
        self.loc.as_ref()
    }

    /// Record a sign-extension warning unless the statement suppresses it
    pub fn warn_sign_extension(&mut self, message: &str) {
        if self.suppress_sign_extension {
            return;
        }
        let warning = Warning::new(self.loc.clone(), message);
        warn!(function = %self.function.name, "{}", warning);
        self.warnings.push(warning);
    }

    /// Warnings collected so far
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Hand the collected warnings to the caller
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    // =========================================================================
    // Temporaries
    // =========================================================================

    /// Reserve local slots past the function's own locals
    pub fn alloc_temp(&mut self, slots: u16) -> u16 {
        let slot = self.next_temp;
        self.next_temp += slots;
        self.max_temp = self.max_temp.max(self.next_temp);
        slot
    }

    /// Slots used by temporaries at the high-water mark
    pub fn temp_slots(&self) -> u16 {
        self.max_temp - self.function.frame.fast_slots
    }

    /// Whether `getstatic_a` results are cached in temporaries
    pub fn caches_array_refs(&self) -> bool {
        self.function.frame.cache_array_refs
    }

    /// Temporary holding the array for a constant pool entry, if cached
    pub fn cached_array_ref(&self, cp: u16) -> Option<u16> {
        self.array_refs.get(&cp).copied()
    }

    /// Remember that `slot` holds the array for `cp`
    pub fn cache_array_ref(&mut self, cp: u16, slot: u16) {
        self.array_refs.insert(cp, slot);
    }

    /// Cache contents before a conditionally executed subexpression
    pub fn array_ref_snapshot(&self) -> BTreeMap<u16, u16> {
        self.array_refs.clone()
    }

    /// Forget entries first stored inside a conditional subexpression
    pub fn restore_array_refs(&mut self, snapshot: BTreeMap<u16, u16>) {
        self.array_refs = snapshot;
    }

    // =========================================================================
    // Break / continue targets
    // =========================================================================

    /// Enter a loop
    pub fn push_loop(&mut self, break_label: LabelId, continue_label: LabelId) {
        self.breaks.push(BreakTarget {
            label: break_label,
            used: false,
        });
        self.continues.push(continue_label);
    }

    /// Leave a loop
    pub fn pop_loop(&mut self) {
        self.breaks.pop();
        self.continues.pop();
    }

    /// Enter a switch (break only)
    pub fn push_switch(&mut self, break_label: LabelId) {
        self.breaks.push(BreakTarget {
            label: break_label,
            used: false,
        });
    }

    /// Leave a switch, returning whether any `break` targeted it
    pub fn pop_switch(&mut self) -> bool {
        self.breaks.pop().map(|b| b.used).unwrap_or(false)
    }

    /// Innermost `break` target
    pub fn break_target(&mut self) -> Result<LabelId> {
        let target = self
            .breaks
            .last_mut()
            .ok_or_else(|| Error::codegen("break statement not within loop or switch"))?;
        target.used = true;
        Ok(target.label)
    }

    /// Innermost `continue` target
    pub fn continue_target(&self) -> Result<LabelId> {
        self.continues
            .last()
            .copied()
            .ok_or_else(|| Error::codegen("continue statement not within loop"))
    }
}
