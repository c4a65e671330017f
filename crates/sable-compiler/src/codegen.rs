//! codegen.rs — Émission des images de classes à partir du lot résolu.
//!
//! Une image par classe, demandée au gestionnaire de fichiers virtuel dans
//! l'ordre d'émission (c'est cet ordre que le service restitue). Les corps
//! deviennent des chunks ; la table de lignes n'est remplie que si la
//! génération des infos de debug est active.
//!
//! Vérifié ici (le reste des noms est résolu en phase `resolve`) :
//! identifiants locaux, placement de `super(...)`, doublons de membres,
//! limites de slots/arité.

use sable_core::bytecode::{Chunk, ConstValue, Op};
use sable_core::image::{ClassImage, CtorImage, MethodImage, TypeRef};
use sable_core::encode_image;

use crate::ast::{AssignTarget, BinOp, Expr, Stmt, UnOp};
use crate::diag::Diagnostics;
use crate::resolve::{ResolvedBatch, ResolvedClass};
use crate::service::{Classpath, CompileFlags};
use crate::vfs::OutputStore;

/// Nombre maximal de slots locaux d'un corps (`this` + params + locales).
const MAX_SLOTS: usize = u8::MAX as usize;
/// Arité maximale d'un appel.
const MAX_ARITY: usize = u8::MAX as usize;

/// Émet chaque classe du lot dans le magasin de sorties. En présence de
/// diagnostics, les images fautives sont simplement omises : le service
/// échouera en bloc sur le rapport.
pub fn emit_batch(
    batch: &ResolvedBatch,
    cp: &dyn Classpath,
    flags: &CompileFlags,
    store: &mut OutputStore,
    diags: &mut Diagnostics,
) {
    for rc in &batch.classes {
        if let Some(img) = emit_class(rc, batch, cp, flags, diags) {
            let sink = store.create(&img.fqn);
            *sink = encode_image(&img);
        }
    }
}

fn emit_class(
    rc: &ResolvedClass,
    batch: &ResolvedBatch,
    cp: &dyn Classpath,
    flags: &CompileFlags,
    diags: &mut Diagnostics,
) -> Option<ClassImage> {
    let before = diags.len();

    let mut img = ClassImage::new(rc.fqn.clone());
    img.super_fqn = rc.super_fqn.clone();
    img.nested = rc.nested_fqns.clone();
    img.fields = rc.fields.clone();

    // Doublons de membres
    for (i, f) in rc.fields.iter().enumerate() {
        if rc.fields[..i].iter().any(|g| g.name == f.name) {
            diags.err(&rc.file, rc.decl.line, 1, format!("champ `{}` déclaré deux fois", f.name));
        }
    }
    for (i, sig) in rc.ctor_sigs.iter().enumerate() {
        if rc.ctor_sigs[..i].iter().any(|s| s.len() == sig.len()) {
            diags.err(
                &rc.file,
                rc.decl.ctors[i].line,
                1,
                format!("constructeurs ambigus : deux constructeurs à {} paramètre(s)", sig.len()),
            );
        }
    }
    for (i, m) in rc.decl.methods.iter().enumerate() {
        if rc.decl.methods[..i].iter().any(|n| n.name == m.name && n.params.len() == m.params.len())
        {
            diags.err(
                &rc.file,
                m.line,
                1,
                format!("méthode `{}`/{} déclarée deux fois", m.name, m.params.len()),
            );
        }
    }

    // Constructeurs (implicite par défaut si aucun n'est déclaré)
    if rc.decl.ctors.is_empty() {
        let mut body = Chunk::new();
        body.push_op(Op::SuperInit(0), None);
        body.push_op(Op::ReturnVoid, None);
        img.ctors.push(CtorImage { params: Vec::new(), body });
    } else {
        for (i, ctor) in rc.decl.ctors.iter().enumerate() {
            let params: Vec<&str> = ctor.params.iter().map(|p| p.name.as_str()).collect();
            let mut em = BodyEmitter::new(rc, batch, cp, flags, diags, &params);
            em.emit_ctor_body(&ctor.body, ctor.line);
            img.ctors.push(CtorImage {
                params: rc.ctor_sigs.get(i).cloned().unwrap_or_default(),
                body: em.chunk,
            });
        }
    }

    // Méthodes
    for (i, m) in rc.decl.methods.iter().enumerate() {
        let params: Vec<&str> = m.params.iter().map(|p| p.name.as_str()).collect();
        let mut em = BodyEmitter::new(rc, batch, cp, flags, diags, &params);
        em.emit_stmts(&m.body);
        em.chunk.push_op(Op::ReturnVoid, em.line_info(m.line));
        let (sig, ret) =
            rc.method_sigs.get(i).cloned().unwrap_or((Vec::new(), TypeRef::Unit));
        img.methods.push(MethodImage { name: m.name.clone(), params: sig, ret, body: em.chunk });
    }

    (diags.len() == before).then_some(img)
}

/* ───────────────────────── Émetteur de corps ───────────────────────── */

struct BodyEmitter<'a> {
    chunk: Chunk,
    rc: &'a ResolvedClass,
    batch: &'a ResolvedBatch,
    cp: &'a dyn Classpath,
    flags: &'a CompileFlags,
    diags: &'a mut Diagnostics,
    /// slot → nom ; slot 0 = `this`, puis paramètres, puis locales.
    locals: Vec<String>,
    cur_line: u32,
}

impl<'a> BodyEmitter<'a> {
    fn new(
        rc: &'a ResolvedClass,
        batch: &'a ResolvedBatch,
        cp: &'a dyn Classpath,
        flags: &'a CompileFlags,
        diags: &'a mut Diagnostics,
        params: &[&str],
    ) -> Self {
        let mut locals = vec!["this".to_string()];
        locals.extend(params.iter().map(ToString::to_string));
        Self { chunk: Chunk::new(), rc, batch, cp, flags, diags, locals, cur_line: 0 }
    }

    fn line_info(&self, line: u32) -> Option<u32> {
        self.flags.debug_lines.then_some(line)
    }

    fn op(&mut self, op: Op) -> u32 {
        self.chunk.push_op(op, self.line_info(self.cur_line))
    }

    fn err(&mut self, line: u32, msg: String) {
        self.diags.err(&self.rc.file, line, 1, msg);
    }

    /* ----- Corps ----- */

    fn emit_ctor_body(&mut self, body: &[Stmt], decl_line: u32) {
        let mut rest = body;
        if let Some(Stmt::Super { args, line }) = body.first() {
            self.cur_line = *line;
            let argc = self.emit_args(args, *line);
            self.op(Op::SuperInit(argc));
            rest = &body[1..];
        } else {
            // chaînage implicite vers le constructeur par défaut du parent
            self.cur_line = decl_line;
            self.op(Op::SuperInit(0));
        }
        self.emit_stmts(rest);
        self.op(Op::ReturnVoid);
    }

    fn emit_stmts(&mut self, stmts: &[Stmt]) {
        let mark = self.locals.len();
        for s in stmts {
            self.emit_stmt(s);
        }
        self.locals.truncate(mark);
    }

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Local { ty, name, init, line } => {
                self.cur_line = *line;
                match init {
                    Some(e) => self.emit_expr(e, *line),
                    None => self.emit_default(ty),
                }
                if self.locals.iter().any(|l| l == name) {
                    self.err(*line, format!("locale `{name}` déjà déclarée"));
                }
                if self.locals.len() >= MAX_SLOTS {
                    self.err(*line, "trop de variables locales".into());
                    return;
                }
                let slot = self.locals.len() as u8;
                self.locals.push(name.clone());
                self.op(Op::StoreLocal(slot));
            }
            Stmt::Assign { target, value, line } => {
                self.cur_line = *line;
                match target {
                    AssignTarget::Local(name) => {
                        self.emit_expr(value, *line);
                        match self.slot_of(name) {
                            Some(slot) => {
                                self.op(Op::StoreLocal(slot));
                            }
                            None => self.err(
                                *line,
                                format!("identifiant inconnu `{name}` (champs : `this.{name}`)"),
                            ),
                        }
                    }
                    AssignTarget::Field { recv, name } => {
                        self.emit_expr(recv, *line);
                        self.emit_expr(value, *line);
                        let ix = self.chunk.consts.add_str(name);
                        self.op(Op::SetField(ix));
                    }
                }
            }
            Stmt::Return { value, line } => {
                self.cur_line = *line;
                match value {
                    Some(e) => {
                        self.emit_expr(e, *line);
                        self.op(Op::Return);
                    }
                    None => {
                        self.op(Op::ReturnVoid);
                    }
                }
            }
            Stmt::Print { value, line } => {
                self.cur_line = *line;
                self.emit_expr(value, *line);
                self.op(Op::Print);
            }
            Stmt::If { cond, then_branch, else_branch, line } => {
                self.cur_line = *line;
                self.emit_expr(cond, *line);
                let jz = self.op(Op::JumpIfFalse(0));
                self.emit_stmts(then_branch);
                match else_branch {
                    Some(els) => {
                        let jmp = self.op(Op::Jump(0));
                        self.patch_to_here(jz);
                        self.emit_stmts(els);
                        self.patch_to_here(jmp);
                    }
                    None => self.patch_to_here(jz),
                }
            }
            Stmt::While { cond, body, line } => {
                self.cur_line = *line;
                let top = self.chunk.ops.len() as u32;
                self.emit_expr(cond, *line);
                let jz = self.op(Op::JumpIfFalse(0));
                self.emit_stmts(body);
                let back = self.op(Op::Jump(0));
                self.patch(back, top);
                self.patch_to_here(jz);
            }
            Stmt::Expr { value, line } => {
                self.cur_line = *line;
                self.emit_expr(value, *line);
                self.op(Op::Pop);
            }
            Stmt::Super { line, .. } => {
                self.err(*line, "`super(...)` n'est permis qu'en tête de constructeur".into());
            }
        }
    }

    /* ----- Expressions ----- */

    fn emit_expr(&mut self, e: &Expr, line: u32) {
        match e {
            Expr::Null => {
                self.op(Op::LoadNull);
            }
            Expr::Bool(true) => {
                self.op(Op::LoadTrue);
            }
            Expr::Bool(false) => {
                self.op(Op::LoadFalse);
            }
            Expr::Int(i) => {
                let ix = self.chunk.add_const(ConstValue::I64(*i));
                self.op(Op::LoadConst(ix));
            }
            Expr::Float(x) => {
                let ix = self.chunk.add_const(ConstValue::F64(*x));
                self.op(Op::LoadConst(ix));
            }
            Expr::Str(s) => {
                let ix = self.chunk.consts.add_str(s);
                self.op(Op::LoadConst(ix));
            }
            Expr::This => {
                self.op(Op::LoadLocal(0));
            }
            Expr::Ident(name) => match self.slot_of(name) {
                Some(slot) => {
                    self.op(Op::LoadLocal(slot));
                }
                None => self.err(
                    line,
                    format!("identifiant inconnu `{name}` (champs : `this.{name}`)"),
                ),
            },
            Expr::Field { recv, name } => {
                self.emit_expr(recv, line);
                let ix = self.chunk.consts.add_str(name);
                self.op(Op::GetField(ix));
            }
            Expr::Call { recv, name, args } => {
                self.emit_expr(recv, line);
                let argc = self.emit_args(args, line);
                let ix = self.chunk.consts.add_str(name);
                self.op(Op::Invoke(ix, argc));
            }
            Expr::New { class, args, line } => {
                // la phase resolve a déjà diagnostiqué les cibles inconnues
                let fqn = self
                    .batch
                    .lookup(class, self.rc, self.cp)
                    .unwrap_or_else(|| class.clone());
                let argc = self.emit_args(args, *line);
                let ix = self.chunk.consts.add_str(&fqn);
                self.op(Op::New(ix, argc));
            }
            Expr::Unary { op, expr } => {
                self.emit_expr(expr, line);
                match op {
                    UnOp::Neg => self.op(Op::Neg),
                    UnOp::Not => self.op(Op::Not),
                };
            }
            Expr::Binary { op, lhs, rhs } => {
                self.emit_expr(lhs, line);
                self.emit_expr(rhs, line);
                let op = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    BinOp::Div => Op::Div,
                    BinOp::Mod => Op::Mod,
                    BinOp::Eq => Op::Eq,
                    BinOp::Ne => Op::Ne,
                    BinOp::Lt => Op::Lt,
                    BinOp::Le => Op::Le,
                    BinOp::Gt => Op::Gt,
                    BinOp::Ge => Op::Ge,
                };
                self.op(op);
            }
        }
    }

    fn emit_args(&mut self, args: &[Expr], line: u32) -> u8 {
        if args.len() > MAX_ARITY {
            self.err(line, "trop d'arguments".into());
        }
        for a in args {
            self.emit_expr(a, line);
        }
        args.len().min(MAX_ARITY) as u8
    }

    /// Valeur par défaut d'une locale non initialisée.
    fn emit_default(&mut self, ty: &crate::ast::TypeExpr) {
        use crate::ast::TypeExpr;
        match ty {
            TypeExpr::Int => {
                let ix = self.chunk.add_const(ConstValue::I64(0));
                self.op(Op::LoadConst(ix));
            }
            TypeExpr::Float => {
                let ix = self.chunk.add_const(ConstValue::F64(0.0));
                self.op(Op::LoadConst(ix));
            }
            TypeExpr::Bool => {
                self.op(Op::LoadFalse);
            }
            _ => {
                self.op(Op::LoadNull);
            }
        }
    }

    fn slot_of(&self, name: &str) -> Option<u8> {
        self.locals.iter().rposition(|l| l == name).map(|i| i as u8)
    }

    /* ----- Sauts ----- */

    fn patch_to_here(&mut self, at: u32) {
        let here = self.chunk.ops.len() as u32;
        self.patch(at, here);
    }

    fn patch(&mut self, at: u32, target: u32) {
        let rel = i64::from(target) - i64::from(at) - 1;
        let rel = rel as i32;
        match self.chunk.ops[at as usize] {
            Op::Jump(_) => self.chunk.ops[at as usize] = Op::Jump(rel),
            Op::JumpIfFalse(_) => self.chunk.ops[at as usize] = Op::JumpIfFalse(rel),
            _ => unreachable!("patch sur une instruction non-saut"),
        }
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::resolve::resolve_batch;
    use crate::service::SetClasspath;
    use indoc::indoc;
    use sable_core::decode_image;

    fn emit(src: &str) -> Vec<(String, ClassImage)> {
        let cp = SetClasspath::with_root();
        let mut diags = Diagnostics::default();
        let prog = parse_source(src, "<test>", &mut diags).expect("parse");
        let batch = resolve_batch(vec![("<test>".into(), prog)], &cp, &mut diags);
        let mut store = OutputStore::default();
        let flags = CompileFlags::default();
        emit_batch(&batch, &cp, &flags, &mut store, &mut diags);
        assert!(diags.is_empty(), "diags: {}", diags.report());
        store
            .into_units()
            .into_iter()
            .map(|u| (u.fqn.clone(), decode_image(&u.bytes).expect("image valide")))
            .collect()
    }

    #[test]
    fn no_body_gets_implicit_ctor() {
        let imgs = emit("class NoBody{}");
        assert_eq!(imgs.len(), 1);
        let (fqn, img) = &imgs[0];
        assert_eq!(fqn, "NoBody");
        assert_eq!(img.ctors.len(), 1);
        assert!(img.ctors[0].params.is_empty());
        assert_eq!(img.ctors[0].body.ops, vec![Op::SuperInit(0), Op::ReturnVoid]);
        assert!(img.methods.is_empty() && img.fields.is_empty() && img.nested.is_empty());
    }

    #[test]
    fn nested_classes_emit_their_own_images() {
        let imgs = emit("package p; class Outer { class Inner {} }");
        let fqns: Vec<&str> = imgs.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fqns, vec!["p.Outer", "p.Outer.Inner"]);
        assert_eq!(imgs[0].1.nested, vec!["p.Outer.Inner".to_string()]);
    }

    #[test]
    fn debug_lines_are_recorded() {
        let imgs = emit(indoc! {r#"
            class C {
                void m() {
                    print("a");
                    print("b");
                }
            }
        "#});
        let body = &imgs[0].1.methods[0].body;
        assert!(!body.lines.is_empty());
        assert_eq!(body.lines.line_for_pc(0), Some(3));
    }

    #[test]
    fn while_loop_jumps_are_patched() {
        let imgs = emit(indoc! {r"
            class C {
                int m(int n) {
                    int acc = 0;
                    while (acc < n) {
                        acc = acc + 1;
                    }
                    return acc;
                }
            }
        "});
        let ops = &imgs[0].1.methods[0].body.ops;
        // le saut arrière doit revenir avant le test de condition
        let (back_pc, back_off) = ops
            .iter()
            .enumerate()
            .find_map(|(pc, op)| match op {
                Op::Jump(off) => Some((pc as i64, i64::from(*off))),
                _ => None,
            })
            .expect("saut arrière");
        assert!(back_off < 0);
        let dest = back_pc + 1 + back_off;
        assert!(dest >= 0 && (dest as usize) < ops.len());
    }

    #[test]
    fn explicit_super_call_is_first() {
        let imgs = emit(indoc! {r#"
            class A {}
            class B extends A {
                B(str x) {
                    super();
                    this.x = x;
                }
            }
        "#});
        let b = &imgs[1].1;
        assert_eq!(b.ctors[0].params, vec![TypeRef::Str]);
        assert_eq!(b.ctors[0].body.ops[0], Op::SuperInit(0));
    }

    #[test]
    fn unknown_ident_is_reported() {
        let cp = SetClasspath::with_root();
        let mut diags = Diagnostics::default();
        let prog =
            parse_source("class C { void m() { print(ghost); } }", "<t>", &mut diags).expect("parse");
        let batch = resolve_batch(vec![("<t>".into(), prog)], &cp, &mut diags);
        let mut store = OutputStore::default();
        emit_batch(&batch, &cp, &CompileFlags::default(), &mut store, &mut diags);
        assert!(diags.report().contains("ghost"));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn stray_super_is_reported() {
        let cp = SetClasspath::with_root();
        let mut diags = Diagnostics::default();
        let prog = parse_source("class C { void m() { super(); } }", "<t>", &mut diags).expect("parse");
        let batch = resolve_batch(vec![("<t>".into(), prog)], &cp, &mut diags);
        let mut store = OutputStore::default();
        emit_batch(&batch, &cp, &CompileFlags::default(), &mut store, &mut diags);
        assert!(diags.report().contains("super"));
    }
}
