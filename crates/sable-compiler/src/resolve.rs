//! resolve.rs — Résolution de noms sur un **lot** de sources.
//!
//! Les FQN déclarés par tout le lot sont collectés d'abord, puis chaque
//! classe est résolue contre : ses classes englobantes, son paquet, le lot
//! entier, et le classpath hôte. L'ordre de déclaration dans le lot est
//! donc indifférent (`B extends A` compile avant ou après `A`).
//!
//! Sont vérifiés ici : doublons de FQN, cibles d'`extends`, types de
//! champs/paramètres/retours, cibles de `new`, cycles d'héritage.

use ahash::{AHashMap, AHashSet};

use sable_core::image::{FieldImage, TypeRef};
use sable_core::ROOT_CLASS;

use crate::ast::{ClassDecl, Expr, Program, Stmt, TypeExpr};
use crate::diag::Diagnostics;
use crate::service::Classpath;

/// Une classe prête pour le codegen (imbriquées aplaties en entrées propres).
#[derive(Debug)]
pub struct ResolvedClass {
    /// Nom logique de la source d'origine (diagnostics).
    pub file: String,
    pub fqn: String,
    pub super_fqn: String,
    /// FQN des classes imbriquées **directes**.
    pub nested_fqns: Vec<String>,
    /// Portée de résolution : self puis englobantes, de l'intérieur vers
    /// l'extérieur.
    pub scope: Vec<String>,
    pub package: Option<String>,
    pub fields: Vec<FieldImage>,
    /// Signatures résolues, alignées avec `decl.ctors`.
    pub ctor_sigs: Vec<Vec<TypeRef>>,
    /// Signatures résolues, alignées avec `decl.methods`.
    pub method_sigs: Vec<(Vec<TypeRef>, TypeRef)>,
    /// Déclaration d'origine, `nested` vidé (chaque imbriquée a son entrée).
    pub decl: ClassDecl,
}

/// Résultat de la résolution : classes aplaties en ordre de déclaration
/// (englobante avant imbriquées) + ensemble des FQN du lot.
#[derive(Debug, Default)]
pub struct ResolvedBatch {
    pub classes: Vec<ResolvedClass>,
    pub declared: AHashSet<String>,
}

impl ResolvedBatch {
    /// Résout un nom écrit dans la portée d'une classe : englobantes
    /// (intérieur → extérieur), paquet, nom nu ; les noms pointés sont pris
    /// comme FQN absolus. Premier candidat connu du lot ou du classpath.
    pub fn lookup(&self, written: &str, scope: &ResolvedClass, cp: &dyn Classpath) -> Option<String> {
        let known = |fqn: &str| self.declared.contains(fqn) || cp.contains(fqn);
        if written.contains('.') {
            return known(written).then(|| written.to_string());
        }
        for prefix in &scope.scope {
            let cand = format!("{prefix}.{written}");
            if known(&cand) {
                return Some(cand);
            }
        }
        if let Some(pkg) = &scope.package {
            let cand = format!("{pkg}.{written}");
            if known(&cand) {
                return Some(cand);
            }
        }
        known(written).then(|| written.to_string())
    }
}

/// Résout tout le lot. Les diagnostics s'accumulent ; le lot est bon à
/// générer seulement si `diags` reste vide.
pub fn resolve_batch(
    programs: Vec<(String, Program)>,
    cp: &dyn Classpath,
    diags: &mut Diagnostics,
) -> ResolvedBatch {
    let mut batch = ResolvedBatch::default();

    // Passe 1 : collecte des FQN déclarés (doublons diagnostiqués).
    for (file, prog) in &programs {
        for class in &prog.classes {
            collect_fqns(file, prog.package.as_deref(), None, class, &mut batch.declared, diags);
        }
    }

    // Passe 2 : aplatissement + résolution des signatures.
    for (file, prog) in programs {
        let package = prog.package;
        for class in prog.classes {
            flatten(&file, package.as_deref(), &[], class, cp, &mut batch, diags);
        }
    }

    // Passe 3 : cycles d'héritage internes au lot.
    check_cycles(&batch, diags);

    batch
}

fn qualify(package: Option<&str>, outer: Option<&str>, name: &str) -> String {
    match (outer, package) {
        (Some(o), _) => format!("{o}.{name}"),
        (None, Some(p)) => format!("{p}.{name}"),
        (None, None) => name.to_string(),
    }
}

fn collect_fqns(
    file: &str,
    package: Option<&str>,
    outer: Option<&str>,
    class: &ClassDecl,
    declared: &mut AHashSet<String>,
    diags: &mut Diagnostics,
) {
    let fqn = qualify(package, outer, &class.name);
    if !declared.insert(fqn.clone()) {
        diags.err(file, class.line, 1, format!("classe `{fqn}` déclarée plusieurs fois dans le lot"));
    }
    for nested in &class.nested {
        collect_fqns(file, package, Some(&fqn), nested, declared, diags);
    }
}

fn flatten(
    file: &str,
    package: Option<&str>,
    enclosing: &[String],
    mut decl: ClassDecl,
    cp: &dyn Classpath,
    batch: &mut ResolvedBatch,
    diags: &mut Diagnostics,
) {
    let outer = enclosing.last().map(String::as_str);
    let fqn = qualify(package, outer, &decl.name);

    // self puis englobantes, intérieur → extérieur
    let mut scope = vec![fqn.clone()];
    scope.extend(enclosing.iter().rev().cloned());

    let mut rc = ResolvedClass {
        file: file.to_string(),
        fqn: fqn.clone(),
        super_fqn: ROOT_CLASS.to_string(),
        nested_fqns: decl.nested.iter().map(|n| format!("{fqn}.{}", n.name)).collect(),
        scope,
        package: package.map(ToString::to_string),
        fields: Vec::new(),
        ctor_sigs: Vec::new(),
        method_sigs: Vec::new(),
        decl: ClassDecl { nested: Vec::new(), ..decl.clone() },
    };

    // extends
    if let Some(written) = &decl.extends {
        match batch.lookup(written, &rc, cp) {
            Some(s) => rc.super_fqn = s,
            None => diags.err(
                file,
                decl.line,
                1,
                format!("superclasse introuvable `{written}` (lot + classpath)"),
            ),
        }
    }

    // champs
    for f in &decl.fields {
        if let Some(ty) = resolve_type(&f.ty, &rc, cp, batch, file, f.line, diags) {
            rc.fields.push(FieldImage { name: f.name.clone(), ty });
        }
    }

    // signatures de constructeurs + corps
    for c in &decl.ctors {
        let mut sig = Vec::with_capacity(c.params.len());
        for p in &c.params {
            if let Some(ty) = resolve_type(&p.ty, &rc, cp, batch, file, c.line, diags) {
                sig.push(ty);
            }
        }
        rc.ctor_sigs.push(sig);
        check_body(&c.body, &rc, cp, batch, file, diags);
    }

    // signatures de méthodes + corps
    for m in &decl.methods {
        let mut sig = Vec::with_capacity(m.params.len());
        for p in &m.params {
            if let Some(ty) = resolve_type(&p.ty, &rc, cp, batch, file, m.line, diags) {
                sig.push(ty);
            }
        }
        let ret = resolve_type(&m.ret, &rc, cp, batch, file, m.line, diags)
            .unwrap_or(TypeRef::Unit);
        rc.method_sigs.push((sig, ret));
        check_body(&m.body, &rc, cp, batch, file, diags);
    }

    let nested = std::mem::take(&mut decl.nested);
    batch.classes.push(rc);

    let mut inner_enclosing = enclosing.to_vec();
    inner_enclosing.push(fqn);
    for n in nested {
        flatten(file, package, &inner_enclosing, n, cp, batch, diags);
    }
}

fn resolve_type(
    ty: &TypeExpr,
    scope: &ResolvedClass,
    cp: &dyn Classpath,
    batch: &ResolvedBatch,
    file: &str,
    line: u32,
    diags: &mut Diagnostics,
) -> Option<TypeRef> {
    match ty {
        TypeExpr::Unit => Some(TypeRef::Unit),
        TypeExpr::Int => Some(TypeRef::Int),
        TypeExpr::Float => Some(TypeRef::Float),
        TypeExpr::Bool => Some(TypeRef::Bool),
        TypeExpr::Str => Some(TypeRef::Str),
        TypeExpr::Named(written) => match batch.lookup(written, scope, cp) {
            Some(fqn) => Some(TypeRef::Class(fqn)),
            None => {
                diags.err(file, line, 1, format!("type introuvable `{written}` (lot + classpath)"));
                None
            }
        },
    }
}

/// Vérifie les cibles de `new` dans un corps (les identifiants et membres
/// restent dynamiques, comme le dispatch au runtime).
fn check_body(
    body: &[Stmt],
    scope: &ResolvedClass,
    cp: &dyn Classpath,
    batch: &ResolvedBatch,
    file: &str,
    diags: &mut Diagnostics,
) {
    for stmt in body {
        match stmt {
            Stmt::Local { init, ty, line, .. } => {
                let _ = resolve_type(ty, scope, cp, batch, file, *line, diags);
                if let Some(e) = init {
                    check_expr(e, scope, cp, batch, file, diags);
                }
            }
            Stmt::Assign { target, value, .. } => {
                if let crate::ast::AssignTarget::Field { recv, .. } = target {
                    check_expr(recv, scope, cp, batch, file, diags);
                }
                check_expr(value, scope, cp, batch, file, diags);
            }
            Stmt::Return { value: Some(e), .. } | Stmt::Print { value: e, .. } | Stmt::Expr { value: e, .. } => {
                check_expr(e, scope, cp, batch, file, diags);
            }
            Stmt::Return { value: None, .. } => {}
            Stmt::If { cond, then_branch, else_branch, .. } => {
                check_expr(cond, scope, cp, batch, file, diags);
                check_body(then_branch, scope, cp, batch, file, diags);
                if let Some(b) = else_branch {
                    check_body(b, scope, cp, batch, file, diags);
                }
            }
            Stmt::While { cond, body, .. } => {
                check_expr(cond, scope, cp, batch, file, diags);
                check_body(body, scope, cp, batch, file, diags);
            }
            Stmt::Super { args, .. } => {
                for a in args {
                    check_expr(a, scope, cp, batch, file, diags);
                }
            }
        }
    }
}

fn check_expr(
    e: &Expr,
    scope: &ResolvedClass,
    cp: &dyn Classpath,
    batch: &ResolvedBatch,
    file: &str,
    diags: &mut Diagnostics,
) {
    match e {
        Expr::New { class, args, line } => {
            if batch.lookup(class, scope, cp).is_none() {
                diags.err(file, *line, 1, format!("classe introuvable `{class}` (lot + classpath)"));
            }
            for a in args {
                check_expr(a, scope, cp, batch, file, diags);
            }
        }
        Expr::Field { recv, .. } => check_expr(recv, scope, cp, batch, file, diags),
        Expr::Call { recv, args, .. } => {
            check_expr(recv, scope, cp, batch, file, diags);
            for a in args {
                check_expr(a, scope, cp, batch, file, diags);
            }
        }
        Expr::Unary { expr, .. } => check_expr(expr, scope, cp, batch, file, diags),
        Expr::Binary { lhs, rhs, .. } => {
            check_expr(lhs, scope, cp, batch, file, diags);
            check_expr(rhs, scope, cp, batch, file, diags);
        }
        _ => {}
    }
}

/// Cycles d'héritage **internes au lot** (le classpath hôte est déjà chargé,
/// donc acyclique par construction).
fn check_cycles(batch: &ResolvedBatch, diags: &mut Diagnostics) {
    let supers: AHashMap<&str, &str> =
        batch.classes.iter().map(|c| (c.fqn.as_str(), c.super_fqn.as_str())).collect();
    for start in batch.classes.iter() {
        let mut seen = AHashSet::new();
        let mut cur = start.fqn.as_str();
        while let Some(&next) = supers.get(cur) {
            if !seen.insert(cur) {
                if cur == start.fqn {
                    diags.err(
                        &start.file,
                        start.decl.line,
                        1,
                        format!("cycle d'héritage impliquant `{}`", start.fqn),
                    );
                }
                break;
            }
            cur = next;
        }
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::service::SetClasspath;

    fn resolve_srcs(srcs: &[(&str, &str)], cp: &SetClasspath) -> (ResolvedBatch, Diagnostics) {
        let mut diags = Diagnostics::default();
        let mut programs = Vec::new();
        for (name, src) in srcs {
            if let Some(p) = parse_source(src, name, &mut diags) {
                programs.push(((*name).to_string(), p));
            }
        }
        let batch = resolve_batch(programs, cp, &mut diags);
        (batch, diags)
    }

    #[test]
    fn extends_any_order() {
        let cp = SetClasspath::with_root();
        let (b, d) = resolve_srcs(&[("b", "class B extends A{}"), ("a", "class A{}")], &cp);
        assert!(d.is_empty(), "{}", d.report());
        assert_eq!(b.classes[0].super_fqn, "A");
        assert_eq!(b.classes[1].super_fqn, ROOT_CLASS);
    }

    #[test]
    fn package_qualifies_names() {
        let cp = SetClasspath::with_root();
        let (b, d) = resolve_srcs(&[("p", "package even.has.a.pkg; class Dump2 {}")], &cp);
        assert!(d.is_empty());
        assert_eq!(b.classes[0].fqn, "even.has.a.pkg.Dump2");
    }

    #[test]
    fn nested_are_flattened_with_scope() {
        let cp = SetClasspath::with_root();
        let (b, d) =
            resolve_srcs(&[("o", "package p; class Outer { class Inner { Outer back; Inner twin; } }")], &cp);
        assert!(d.is_empty(), "{}", d.report());
        assert_eq!(b.classes.len(), 2);
        assert_eq!(b.classes[0].fqn, "p.Outer");
        assert_eq!(b.classes[0].nested_fqns, vec!["p.Outer.Inner".to_string()]);
        let inner = &b.classes[1];
        assert_eq!(inner.fqn, "p.Outer.Inner");
        // `Outer` vu depuis Inner passe par le paquet ; `Inner` par la portée self
        assert_eq!(inner.fields[0].ty, TypeRef::Class("p.Outer".into()));
        assert_eq!(inner.fields[1].ty, TypeRef::Class("p.Outer.Inner".into()));
    }

    #[test]
    fn classpath_satisfies_external_refs() {
        let mut cp = SetClasspath::with_root();
        cp.insert("foo.bar.Bar");
        let (b, d) = resolve_srcs(&[("t", "package x; class T extends foo.bar.Bar {}")], &cp);
        assert!(d.is_empty(), "{}", d.report());
        assert_eq!(b.classes[0].super_fqn, "foo.bar.Bar");
    }

    #[test]
    fn unknown_super_is_reported() {
        let cp = SetClasspath::with_root();
        let (_b, d) = resolve_srcs(&[("t", "class T extends nope.Missing {}")], &cp);
        assert_eq!(d.len(), 1);
        assert!(d.report().contains("nope.Missing"));
    }

    #[test]
    fn unknown_new_target_is_reported() {
        let cp = SetClasspath::with_root();
        let (_b, d) =
            resolve_srcs(&[("t", "class T { void m() { this.x = new Ghost(); } }")], &cp);
        assert!(d.report().contains("Ghost"));
    }

    #[test]
    fn inheritance_cycle_is_reported() {
        let cp = SetClasspath::with_root();
        let (_b, d) =
            resolve_srcs(&[("t", "class A extends B{} class B extends A{}")], &cp);
        assert!(d.report().contains("cycle"));
    }

    #[test]
    fn duplicate_fqn_is_reported() {
        let cp = SetClasspath::with_root();
        let (_b, d) = resolve_srcs(&[("1", "class Twin{}"), ("2", "class Twin{}")], &cp);
        assert!(d.report().contains("plusieurs fois"));
    }
}
