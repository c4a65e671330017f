//! disasm.rs — Rendus lisibles d'une image et de ses chunks.
//!
//! Sortie texte stable, pensée pour la revue humaine et les golden tests.

use std::fmt::Write as _;

use crate::bytecode::{Chunk, ConstValue, Op};
use crate::image::ClassImage;

/// Désassemble un chunk, une instruction par ligne, constantes résolues.
pub fn disassemble_chunk(chunk: &Chunk, title: &str) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "; chunk: {title} (ops: {}, consts: {})", chunk.ops.len(), chunk.consts.len());
    for (pc, op) in chunk.ops.iter().enumerate() {
        let pc = pc as u32;
        if let Some(line) = chunk.lines.line_for_pc(pc) {
            let _ = write!(s, "{pc:05}  [l.{line:>4}] ");
        } else {
            let _ = write!(s, "{pc:05}           ");
        }
        let _ = writeln!(s, "{}", render_op(chunk, op));
    }
    s
}

/// Décrit une image : identité, membres, puis chaque corps désassemblé.
pub fn describe_image(img: &ClassImage) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "class {} extends {}", img.fqn, img.super_fqn);
    for n in &img.nested {
        let _ = writeln!(s, "  nested  {n}");
    }
    for f in &img.fields {
        let _ = writeln!(s, "  field   {} {}", f.ty, f.name);
    }
    for (i, c) in img.ctors.iter().enumerate() {
        let params: Vec<String> = c.params.iter().map(ToString::to_string).collect();
        let _ = writeln!(s, "  ctor#{i}  ({})", params.join(", "));
    }
    for m in &img.methods {
        let params: Vec<String> = m.params.iter().map(ToString::to_string).collect();
        let _ = writeln!(s, "  method  {} {}({})", m.ret, m.name, params.join(", "));
    }
    for (i, c) in img.ctors.iter().enumerate() {
        let _ = write!(s, "\n{}", disassemble_chunk(&c.body, &format!("{}::<ctor#{i}>", img.fqn)));
    }
    for m in &img.methods {
        let _ = write!(s, "\n{}", disassemble_chunk(&m.body, &format!("{}::{}", img.fqn, m.name)));
    }
    s
}

fn render_op(chunk: &Chunk, op: &Op) -> String {
    use Op::*;
    match *op {
        LoadConst(ix) => match chunk.consts.get(ix) {
            Some(c @ ConstValue::Str(_)) => format!("ldc {ix}      ; {}", shorten(&c.to_string(), 60)),
            Some(c) => format!("ldc {ix}      ; {c}"),
            None => format!("ldc {ix}      ; <invalide>"),
        },
        LoadLocal(s) => format!("ldl {s}"),
        StoreLocal(s) => format!("stl {s}"),
        GetField(ix) => format!("getf {}", named(chunk, ix)),
        SetField(ix) => format!("setf {}", named(chunk, ix)),
        Invoke(ix, argc) => format!("invoke {} argc={argc}", named(chunk, ix)),
        New(ix, argc) => format!("new {} argc={argc}", named(chunk, ix)),
        SuperInit(argc) => format!("superinit argc={argc}"),
        Jump(off) => format!("jmp {off:+}"),
        JumpIfFalse(off) => format!("jz {off:+}"),
        other => other.mnemonic().to_string(),
    }
}

fn named(chunk: &Chunk, ix: u32) -> String {
    chunk.consts.get_str(ix).map_or_else(|| format!("#{ix}<invalide>"), ToString::to_string)
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{FieldImage, MethodImage, TypeRef};

    #[test]
    fn disasm_smoke() {
        let mut c = Chunk::new();
        let k = c.add_const(ConstValue::Str("yo".into()));
        c.push_op(Op::LoadConst(k), Some(1));
        c.push_op(Op::Print, Some(1));
        c.push_op(Op::ReturnVoid, Some(2));
        let txt = disassemble_chunk(&c, "demo");
        assert!(txt.contains("ldc 0"));
        assert!(txt.contains("print"));
        assert!(txt.contains("[l.   2]"));
    }

    #[test]
    fn describe_lists_members() {
        let mut img = ClassImage::new("a.B");
        img.fields.push(FieldImage { name: "x".into(), ty: TypeRef::Int });
        img.methods.push(MethodImage {
            name: "f".into(),
            params: vec![TypeRef::Str],
            ret: TypeRef::Unit,
            body: Chunk::new(),
        });
        let txt = describe_image(&img);
        assert!(txt.contains("class a.B extends sable.Object"));
        assert!(txt.contains("field   int x"));
        assert!(txt.contains("method  void f(str)"));
    }
}
