//! JCA-style text listings of compiled methods
//!
//! Used for inspection and golden tests. The fingerprint is a SHA-256 over the
//! method body text, so two compilations produce the same fingerprint exactly
//! when they produce the same instructions, labels and frame.

use super::constant_pool::ConstantPool;
use super::ir::{CompiledFunction, Item};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Format a single item as one listing line (without indentation)
pub fn format_item(item: &Item) -> String {
    match item {
        Item::Instr(instr) => format!("{};", instr),
        Item::Label(label) => format!("{}:", label),
    }
}

fn body_text(function: &CompiledFunction) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\t\t.stack {};", function.frame.max_stack);
    let _ = writeln!(out, "\t\t.locals {};", function.frame.max_locals);
    out.push('\n');
    for item in &function.code {
        let indent = match item {
            Item::Label(_) => "\t\t",
            Item::Instr(_) => "\t\t\t",
        };
        let _ = writeln!(out, "{}{}", indent, format_item(item));
    }
    out
}

/// Hex SHA-256 of the method body listing
pub fn code_fingerprint(function: &CompiledFunction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(function.descriptor.as_bytes());
    hasher.update(body_text(function).as_bytes());
    hex::encode(hasher.finalize())
}

/// Render one method as a JCA `.method` block
pub fn method_listing(function: &CompiledFunction, token: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\t.method public static {}{} {} {{",
        function.name, function.descriptor, token
    );
    out.push_str(&body_text(function));
    let _ = writeln!(out, "\t}}");
    out
}

/// Render the constant pool as a JCA `.constantPool` block
pub fn constant_pool_listing(pool: &ConstantPool) -> String {
    let mut out = String::from("\t.constantPool {\n");
    for (idx, entry) in pool.entries().iter().enumerate() {
        let _ = writeln!(out, "\t\t// {}", idx);
        let _ = writeln!(out, "\t\t{}", entry);
    }
    out.push_str("\t}\n");
    out
}

/// Render every method in order, each preceded by its fingerprint
pub fn listing(functions: &[CompiledFunction], pool: &ConstantPool) -> String {
    let mut out = constant_pool_listing(pool);
    for (token, function) in functions.iter().enumerate() {
        out.push('\n');
        let _ = writeln!(out, "\t// sha256 {}", code_fingerprint(function));
        out.push_str(&method_listing(function, token));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{FrameSize, Instruction, LabelId, LocalKind, ReturnKind};

    fn sample(max_stack: u16) -> CompiledFunction {
        CompiledFunction {
            name: "id".to_string(),
            descriptor: "(S)S".to_string(),
            code: vec![
                Item::Label(LabelId(0)),
                Instruction::Load(LocalKind::Short, 0).into(),
                Instruction::Return(ReturnKind::Short).into(),
            ],
            frame: FrameSize {
                max_stack,
                max_locals: 1,
            },
        }
    }

    #[test]
    fn test_method_listing() {
        let text = method_listing(&sample(3), 0);
        assert!(text.starts_with("\t.method public static id(S)S 0 {"));
        assert!(text.contains(".stack 3;"));
        assert!(text.contains(".locals 1;"));
        assert!(text.contains("\t\tL0:\n"));
        assert!(text.contains("sload_0;"));
        assert!(text.contains("sreturn;"));
    }

    #[test]
    fn test_fingerprint_tracks_frame() {
        let a = code_fingerprint(&sample(3));
        assert_eq!(a.len(), 64);
        assert_eq!(a, code_fingerprint(&sample(3)));
        assert_ne!(a, code_fingerprint(&sample(4)));
    }
}
