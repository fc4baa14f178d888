//! # Peephole Optimizer for JCVM Code
//!
//! Linear rewrites over a method's instruction stream:
//! - Conversion cleanup (`s2i; i2s`, `s2i; i2b`, repeated narrowing)
//! - Constant folding into conversions
//! - Arithmetic identities and strength reduction
//! - Local load/store forwarding and `sinc`/`iinc` formation
//! - Boolean materialization fused into the consuming branch
//! - Branch threading, jump-to-next and unreachable code removal
//!
//! Window patterns never span a label, so no rewrite can change what a jump
//! into the middle of the window would observe. Passes repeat until nothing
//! matches, which makes the result idempotent.

use super::ir::{
    ArithOp, Cond, Conversion, Instruction, Item, LabelId, LocalKind, Width,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Upper bound on full passes before giving up on reaching a fixed point
const MAX_PASSES: usize = 64;

/// Peephole optimizer with a configurable level (0 disables it)
pub struct PeepholeOptimizer {
    level: u8,
}

impl PeepholeOptimizer {
    /// Create an optimizer; level 0 leaves code untouched
    pub fn new(level: u8) -> Self {
        Self { level }
    }

    /// Rewrite `code` to a fixed point, returning the number of passes run
    pub fn optimize(&mut self, code: &mut Vec<Item>) -> usize {
        if self.level == 0 {
            return 0;
        }
        let before = code.len();
        let mut passes = 0;
        loop {
            if passes == MAX_PASSES {
                warn!(passes, "peephole optimizer did not reach a fixed point");
                break;
            }
            passes += 1;
            if !self.run_pass(code) {
                break;
            }
        }
        debug!(passes, before, after = code.len(), "peephole finished");
        passes
    }

    /// One full pass over every pattern. Returns true if anything changed.
    fn run_pass(&mut self, code: &mut Vec<Item>) -> bool {
        let mut changed = false;
        changed |= rewrite_windows(code, 2, rewrite_pair);
        changed |= rewrite_windows(code, 4, rewrite_increment);
        changed |= fuse_boolean_branches(code);
        changed |= thread_branches(code);
        changed |= remove_jumps_to_next(code);
        changed |= remove_unreachable(code);
        changed |= remove_unused_labels(code);
        changed
    }
}

// =============================================================================
// Window rewrites
// =============================================================================

/// Slide a window of `width` consecutive instructions (no labels inside) over
/// the stream, replacing every window `f` rewrites
fn rewrite_windows(
    code: &mut Vec<Item>,
    width: usize,
    f: impl Fn(&[&Instruction]) -> Option<Vec<Instruction>>,
) -> bool {
    let mut out = Vec::with_capacity(code.len());
    let mut changed = false;
    let mut i = 0;
    while i < code.len() {
        if i + width <= code.len() {
            let window: Option<Vec<&Instruction>> =
                code[i..i + width].iter().map(Item::instruction).collect();
            if let Some(replacement) = window.as_deref().and_then(&f) {
                out.extend(replacement.into_iter().map(Item::Instr));
                i += width;
                changed = true;
                continue;
            }
        }
        out.push(code[i].clone());
        i += 1;
    }
    if changed {
        *code = out;
    }
    changed
}

fn const_value(instr: &Instruction) -> Option<(Width, i64)> {
    match instr {
        Instruction::SConst(v) => Some((Width::Short, *v as i64)),
        Instruction::IConst(v) => Some((Width::Int, *v as i64)),
        _ => None,
    }
}

fn dup_of(kind: LocalKind) -> Instruction {
    match kind {
        LocalKind::Int => Instruction::Dup2,
        _ => Instruction::Dup,
    }
}

/// Two-instruction patterns
fn rewrite_pair(w: &[&Instruction]) -> Option<Vec<Instruction>> {
    use Conversion::*;
    use Instruction::*;
    match (w[0], w[1]) {
        // Conversions
        (Convert(S2I), Convert(I2S)) => Some(vec![]),
        (Convert(S2I), Convert(I2B)) => Some(vec![Convert(S2B)]),
        (Convert(S2B), Convert(S2B)) => Some(vec![Convert(S2B)]),
        (Convert(I2B), Convert(S2B)) => Some(vec![Convert(I2B)]),

        // Constant then conversion
        (SConst(v), Convert(S2B)) => Some(vec![SConst(*v as i8 as i16)]),
        (SConst(v), Convert(S2I)) => Some(vec![IConst(*v as i32)]),
        (IConst(v), Convert(I2S)) => Some(vec![SConst(*v as i16)]),
        (IConst(v), Convert(I2B)) => Some(vec![SConst(*v as i8 as i16)]),

        // Identities and strength reduction
        (c, Arith(width, op)) => match const_value(c) {
            Some((cw, 0)) if cw == *width => match op {
                ArithOp::Add
                | ArithOp::Sub
                | ArithOp::Or
                | ArithOp::Xor
                | ArithOp::Shl
                | ArithOp::Shr
                | ArithOp::Ushr => Some(vec![]),
                _ => None,
            },
            Some((cw, 1)) if cw == *width && *op == ArithOp::Mul => Some(vec![]),
            Some((cw, v)) if cw == *width && *op == ArithOp::Mul && v > 1 => {
                let v = v as u64;
                if v.is_power_of_two() {
                    Some(vec![
                        Instruction::constant(*width, v.trailing_zeros() as i64),
                        Arith(*width, ArithOp::Shl),
                    ])
                } else {
                    None
                }
            }
            _ => None,
        },

        // Local forwarding
        (Load(k1, a), Load(k2, b)) if k1 == k2 && a == b => {
            Some(vec![Load(*k1, *a), dup_of(*k1)])
        }
        (Store(k1, a), Load(k2, b)) if k1 == k2 && a == b => {
            Some(vec![dup_of(*k1), Store(*k1, *a)])
        }
        _ => None,
    }
}

/// `load n; const k; add|sub; store n` on the same slot
fn rewrite_increment(w: &[&Instruction]) -> Option<Vec<Instruction>> {
    use Instruction::*;
    let (kind, slot) = match (w[0], w[3]) {
        (Load(k1, a), Store(k2, b)) if k1 == k2 && a == b => (*k1, *a),
        _ => return None,
    };
    let (width, k) = const_value(w[1])?;
    let delta = match w[2] {
        Arith(aw, ArithOp::Add) if *aw == width => k,
        Arith(aw, ArithOp::Sub) if *aw == width => -k,
        _ => return None,
    };
    let delta = i16::try_from(delta).ok()?;
    match (kind, width) {
        (LocalKind::Short, Width::Short) => Some(vec![SInc(slot, delta)]),
        (LocalKind::Int, Width::Int) => Some(vec![IInc(slot, delta)]),
        _ => None,
    }
}

// =============================================================================
// Control flow rewrites
// =============================================================================

fn label_refs(code: &[Item]) -> BTreeMap<LabelId, usize> {
    let mut refs = BTreeMap::new();
    for instr in code.iter().filter_map(Item::instruction) {
        for target in instr.branch_targets() {
            *refs.entry(target).or_insert(0) += 1;
        }
    }
    refs
}

/// The same branch, jumping on the opposite outcome
fn negate_branch(instr: &Instruction, target: LabelId) -> Option<Instruction> {
    Some(match instr {
        Instruction::If(c, _) => Instruction::If(c.negate(), target),
        Instruction::IfSCmp(c, _) => Instruction::IfSCmp(c.negate(), target),
        Instruction::IfACmp(c, _) => Instruction::IfACmp(c.negate(), target),
        Instruction::IfNull(_) => Instruction::IfNonNull(target),
        Instruction::IfNonNull(_) => Instruction::IfNull(target),
        _ => return None,
    })
}

/// `B -> Lx; sconst a; goto Le; Lx: sconst b; Le: ifeq|ifne X`
/// becomes a single branch to `X` when `Lx` and `Le` have no other users
fn fuse_boolean_branches(code: &mut Vec<Item>) -> bool {
    let refs = label_refs(code);
    let single = |l: &LabelId| refs.get(l).copied() == Some(1);
    let mut changed = false;
    let mut i = 0;
    while i + 7 <= code.len() {
        let fused = match &code[i..i + 7] {
            [Item::Instr(branch), Item::Instr(Instruction::SConst(a)), Item::Instr(Instruction::Goto(le)), Item::Label(lx), Item::Instr(Instruction::SConst(b)), Item::Label(le2), Item::Instr(Instruction::If(cond @ (Cond::Eq | Cond::Ne), x))]
                if branch.is_conditional_branch()
                    && branch.branch_targets() == vec![*lx]
                    && le == le2
                    && single(lx)
                    && single(le)
                    && a != b
                    && (0..=1).contains(a)
                    && (0..=1).contains(b) =>
            {
                let jump_when_taken = (*b != 0) == (*cond == Cond::Ne);
                if jump_when_taken {
                    let mut kept = branch.clone();
                    kept.retarget(*lx, *x);
                    Some(kept)
                } else {
                    negate_branch(branch, *x)
                }
            }
            _ => None,
        };
        match fused {
            Some(instr) => {
                code.splice(i..i + 7, [Item::Instr(instr)]);
                changed = true;
                i += 1;
            }
            None => i += 1,
        }
    }
    changed
}

/// Index of the first instruction at or after each label
fn label_positions(code: &[Item]) -> BTreeMap<LabelId, usize> {
    let mut positions = BTreeMap::new();
    for (i, item) in code.iter().enumerate() {
        if let Item::Label(l) = item {
            let next = code[i..]
                .iter()
                .position(|it| matches!(it, Item::Instr(_)))
                .map(|p| i + p)
                .unwrap_or(code.len());
            positions.insert(*l, next);
        }
    }
    positions
}

/// Retarget jumps whose destination is itself an unconditional `goto`
fn thread_branches(code: &mut [Item]) -> bool {
    let positions = label_positions(code);
    let goto_at = |idx: usize| match code.get(idx) {
        Some(Item::Instr(Instruction::Goto(next))) => Some(*next),
        _ => None,
    };

    let mut redirects: BTreeMap<LabelId, LabelId> = BTreeMap::new();
    for &start in positions.keys() {
        let mut seen = BTreeSet::from([start]);
        let mut current = start;
        while let Some(next) = positions.get(&current).and_then(|&idx| goto_at(idx)) {
            if !seen.insert(next) {
                break;
            }
            current = next;
        }
        if current != start {
            redirects.insert(start, current);
        }
    }

    let mut changed = false;
    for item in code.iter_mut() {
        if let Item::Instr(instr) = item {
            for target in instr.branch_targets() {
                if let Some(&to) = redirects.get(&target) {
                    changed |= instr.retarget(target, to);
                }
            }
        }
    }
    changed
}

/// Drop `goto L` when `L` labels the next instruction
fn remove_jumps_to_next(code: &mut Vec<Item>) -> bool {
    let mut remove = Vec::new();
    for (i, item) in code.iter().enumerate() {
        if let Item::Instr(Instruction::Goto(target)) = item {
            let falls_into = code[i + 1..]
                .iter()
                .map_while(Item::label)
                .any(|l| l == *target);
            if falls_into {
                remove.push(i);
            }
        }
    }
    for &i in remove.iter().rev() {
        code.remove(i);
    }
    !remove.is_empty()
}

/// Drop instructions between an unconditional transfer and the next label
fn remove_unreachable(code: &mut Vec<Item>) -> bool {
    let before = code.len();
    let mut reachable = true;
    code.retain(|item| match item {
        Item::Label(_) => {
            reachable = true;
            true
        }
        Item::Instr(instr) => {
            let keep = reachable;
            if keep && instr.is_unconditional_transfer() {
                reachable = false;
            }
            keep
        }
    });
    code.len() != before
}

fn remove_unused_labels(code: &mut Vec<Item>) -> bool {
    let refs = label_refs(code);
    let before = code.len();
    code.retain(|item| match item {
        Item::Label(l) => refs.contains_key(l),
        Item::Instr(_) => true,
    });
    code.len() != before
}
