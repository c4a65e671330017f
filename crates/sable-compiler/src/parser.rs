//! parser.rs — Descente récursive vers l'AST.
//!
//! À la première erreur de syntaxe, la source courante est abandonnée (diag
//! enregistré) ; les autres sources du lot continuent d'être parsées pour
//! agréger un maximum de diagnostics en un seul rapport.

use crate::ast::*;
use crate::diag::Diagnostics;
use crate::lexer::{Lexer, Tok, TokKind};

/// Parse une source complète. `file` est le nom logique (diagnostics).
pub fn parse_source(src: &str, file: &str, diags: &mut Diagnostics) -> Option<Program> {
    let before = diags.len();
    let tokens = Lexer::new(src, file).lex_all(diags);
    if diags.len() > before {
        return None;
    }
    let mut p = Parser { tokens, pos: 0, file: file.to_string() };
    match p.program(diags) {
        Ok(prog) => Some(prog),
        Err(()) => None,
    }
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
    file: String,
}

type PResult<T> = Result<T, ()>;

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokKind {
        &self.peek().kind
    }

    fn nth_kind(&self, n: usize) -> &TokKind {
        let i = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn bump(&mut self) -> Tok {
        let t = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: &TokKind) -> bool {
        if self.peek_kind() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokKind, what: &str, diags: &mut Diagnostics) -> PResult<Tok> {
        if self.peek_kind() == kind {
            Ok(self.bump())
        } else {
            self.error_here(diags, format!("attendu {what}"));
            Err(())
        }
    }

    fn error_here(&self, diags: &mut Diagnostics, msg: String) {
        let t = self.peek();
        diags.err(&self.file, t.line, t.col, msg);
    }

    /* ----- Déclarations ----- */

    fn program(&mut self, diags: &mut Diagnostics) -> PResult<Program> {
        let mut prog = Program::default();
        if self.eat(&TokKind::KwPackage) {
            prog.package = Some(self.dotted_name(diags)?);
            self.expect(&TokKind::Semicolon, "`;` après package", diags)?;
        }
        while self.peek_kind() != &TokKind::Eof {
            prog.classes.push(self.class_decl(diags)?);
        }
        Ok(prog)
    }

    fn dotted_name(&mut self, diags: &mut Diagnostics) -> PResult<String> {
        let mut name = self.ident(diags)?;
        while self.peek_kind() == &TokKind::Dot {
            // seulement si un identifiant suit : `a.b` mais pas `a.`
            if !matches!(self.nth_kind(1), TokKind::Ident(_)) {
                break;
            }
            self.bump();
            name.push('.');
            name.push_str(&self.ident(diags)?);
        }
        Ok(name)
    }

    fn ident(&mut self, diags: &mut Diagnostics) -> PResult<String> {
        match self.peek_kind().clone() {
            TokKind::Ident(s) => {
                self.bump();
                Ok(s)
            }
            _ => {
                self.error_here(diags, "attendu un identifiant".into());
                Err(())
            }
        }
    }

    fn class_decl(&mut self, diags: &mut Diagnostics) -> PResult<ClassDecl> {
        let kw = self.expect(&TokKind::KwClass, "`class`", diags)?;
        let name = self.ident(diags)?;
        let extends =
            if self.eat(&TokKind::KwExtends) { Some(self.dotted_name(diags)?) } else { None };
        self.expect(&TokKind::LBrace, "`{` après l'en-tête de classe", diags)?;

        let mut decl = ClassDecl {
            name,
            extends,
            fields: Vec::new(),
            ctors: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
            line: kw.line,
        };

        while !self.eat(&TokKind::RBrace) {
            if self.peek_kind() == &TokKind::Eof {
                self.error_here(diags, "`}` manquante en fin de classe".into());
                return Err(());
            }
            self.member(&mut decl, diags)?;
        }
        Ok(decl)
    }

    fn member(&mut self, class: &mut ClassDecl, diags: &mut Diagnostics) -> PResult<()> {
        // Classe imbriquée
        if self.peek_kind() == &TokKind::KwClass {
            let nested = self.class_decl(diags)?;
            class.nested.push(nested);
            return Ok(());
        }

        // Constructeur : membre portant le nom de la classe, suivi de `(`
        if let TokKind::Ident(name) = self.peek_kind() {
            if name == &class.name && self.nth_kind(1) == &TokKind::LParen {
                let line = self.bump().line;
                let params = self.params(diags)?;
                let body = self.block(diags)?;
                class.ctors.push(CtorDecl { params, body, line });
                return Ok(());
            }
        }

        // Champ ou méthode : type puis nom
        let line = self.peek().line;
        let ty = self.type_expr(diags)?;
        let name = self.ident(diags)?;
        match self.peek_kind() {
            TokKind::LParen => {
                let params = self.params(diags)?;
                let body = self.block(diags)?;
                class.methods.push(MethodDecl { name, params, ret: ty, body, line });
            }
            TokKind::Semicolon => {
                self.bump();
                if ty == TypeExpr::Unit {
                    diags.err(&self.file, line, 1, format!("le champ `{name}` ne peut pas être `void`"));
                    return Err(());
                }
                class.fields.push(FieldDecl { name, ty, line });
            }
            _ => {
                self.error_here(diags, "attendu `(` (méthode) ou `;` (champ)".into());
                return Err(());
            }
        }
        Ok(())
    }

    fn type_expr(&mut self, diags: &mut Diagnostics) -> PResult<TypeExpr> {
        let t = match self.peek_kind() {
            TokKind::KwInt => TypeExpr::Int,
            TokKind::KwFloat => TypeExpr::Float,
            TokKind::KwBool => TypeExpr::Bool,
            TokKind::KwStr => TypeExpr::Str,
            TokKind::KwVoid => TypeExpr::Unit,
            TokKind::Ident(_) => return Ok(TypeExpr::Named(self.dotted_name(diags)?)),
            _ => {
                self.error_here(diags, "attendu un type".into());
                return Err(());
            }
        };
        self.bump();
        Ok(t)
    }

    fn params(&mut self, diags: &mut Diagnostics) -> PResult<Vec<Param>> {
        self.expect(&TokKind::LParen, "`(`", diags)?;
        let mut params = Vec::new();
        if self.eat(&TokKind::RParen) {
            return Ok(params);
        }
        loop {
            let ty = self.type_expr(diags)?;
            let name = self.ident(diags)?;
            params.push(Param { name, ty });
            if self.eat(&TokKind::Comma) {
                continue;
            }
            self.expect(&TokKind::RParen, "`)` après les paramètres", diags)?;
            break;
        }
        Ok(params)
    }

    /* ----- Instructions ----- */

    fn block(&mut self, diags: &mut Diagnostics) -> PResult<Vec<Stmt>> {
        self.expect(&TokKind::LBrace, "`{`", diags)?;
        let mut stmts = Vec::new();
        while !self.eat(&TokKind::RBrace) {
            if self.peek_kind() == &TokKind::Eof {
                self.error_here(diags, "`}` manquante en fin de bloc".into());
                return Err(());
            }
            stmts.push(self.stmt(diags)?);
        }
        Ok(stmts)
    }

    fn stmt(&mut self, diags: &mut Diagnostics) -> PResult<Stmt> {
        let line = self.peek().line;
        match self.peek_kind() {
            TokKind::KwReturn => {
                self.bump();
                let value = if self.peek_kind() == &TokKind::Semicolon {
                    None
                } else {
                    Some(self.expr(diags)?)
                };
                self.expect(&TokKind::Semicolon, "`;` après return", diags)?;
                Ok(Stmt::Return { value, line })
            }
            TokKind::KwPrint => {
                self.bump();
                self.expect(&TokKind::LParen, "`(` après print", diags)?;
                let value = self.expr(diags)?;
                self.expect(&TokKind::RParen, "`)`", diags)?;
                self.expect(&TokKind::Semicolon, "`;`", diags)?;
                Ok(Stmt::Print { value, line })
            }
            TokKind::KwIf => {
                self.bump();
                self.expect(&TokKind::LParen, "`(` après if", diags)?;
                let cond = self.expr(diags)?;
                self.expect(&TokKind::RParen, "`)`", diags)?;
                let then_branch = self.block(diags)?;
                let else_branch =
                    if self.eat(&TokKind::KwElse) { Some(self.block(diags)?) } else { None };
                Ok(Stmt::If { cond, then_branch, else_branch, line })
            }
            TokKind::KwWhile => {
                self.bump();
                self.expect(&TokKind::LParen, "`(` après while", diags)?;
                let cond = self.expr(diags)?;
                self.expect(&TokKind::RParen, "`)`", diags)?;
                let body = self.block(diags)?;
                Ok(Stmt::While { cond, body, line })
            }
            TokKind::KwSuper => {
                self.bump();
                self.expect(&TokKind::LParen, "`(` après super", diags)?;
                let args = self.args(diags)?;
                self.expect(&TokKind::Semicolon, "`;` après super(...)", diags)?;
                Ok(Stmt::Super { args, line })
            }
            // Déclaration locale avec type primitif
            TokKind::KwInt | TokKind::KwFloat | TokKind::KwBool | TokKind::KwStr => {
                self.local_decl(line, diags)
            }
            // `Nom pointé` suivi d'un identifiant → locale de type classe
            TokKind::Ident(_) if self.looks_like_local_decl() => self.local_decl(line, diags),
            _ => {
                let e = self.expr(diags)?;
                if self.eat(&TokKind::Assign) {
                    let target = match e {
                        Expr::Ident(name) => AssignTarget::Local(name),
                        Expr::Field { recv, name } => AssignTarget::Field { recv: *recv, name },
                        _ => {
                            self.error_here(diags, "cible d'affectation invalide".into());
                            return Err(());
                        }
                    };
                    let value = self.expr(diags)?;
                    self.expect(&TokKind::Semicolon, "`;` après l'affectation", diags)?;
                    return Ok(Stmt::Assign { target, value, line });
                }
                self.expect(&TokKind::Semicolon, "`;` après l'expression", diags)?;
                Ok(Stmt::Expr { value: e, line })
            }
        }
    }

    /// Lookahead : `Ident (. Ident)* Ident` ouvre une déclaration locale.
    fn looks_like_local_decl(&self) -> bool {
        let mut n = 0;
        if !matches!(self.nth_kind(n), TokKind::Ident(_)) {
            return false;
        }
        n += 1;
        while self.nth_kind(n) == &TokKind::Dot && matches!(self.nth_kind(n + 1), TokKind::Ident(_))
        {
            n += 2;
        }
        matches!(self.nth_kind(n), TokKind::Ident(_))
    }

    fn local_decl(&mut self, line: u32, diags: &mut Diagnostics) -> PResult<Stmt> {
        let ty = self.type_expr(diags)?;
        let name = self.ident(diags)?;
        let init = if self.eat(&TokKind::Assign) { Some(self.expr(diags)?) } else { None };
        self.expect(&TokKind::Semicolon, "`;` après la déclaration", diags)?;
        Ok(Stmt::Local { ty, name, init, line })
    }

    /* ----- Expressions (précédences croissantes) ----- */

    fn expr(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        self.equality(diags)
    }

    fn equality(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        let mut lhs = self.comparison(diags)?;
        loop {
            let op = match self.peek_kind() {
                TokKind::EqEq => BinOp::Eq,
                TokKind::NotEq => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.comparison(diags)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn comparison(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        let mut lhs = self.additive(diags)?;
        loop {
            let op = match self.peek_kind() {
                TokKind::Lt => BinOp::Lt,
                TokKind::Le => BinOp::Le,
                TokKind::Gt => BinOp::Gt,
                TokKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.additive(diags)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn additive(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        let mut lhs = self.multiplicative(diags)?;
        loop {
            let op = match self.peek_kind() {
                TokKind::Plus => BinOp::Add,
                TokKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.multiplicative(diags)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        let mut lhs = self.unary(diags)?;
        loop {
            let op = match self.peek_kind() {
                TokKind::Star => BinOp::Mul,
                TokKind::Slash => BinOp::Div,
                TokKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.unary(diags)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        match self.peek_kind() {
            TokKind::Minus => {
                self.bump();
                Ok(Expr::Unary { op: UnOp::Neg, expr: Box::new(self.unary(diags)?) })
            }
            TokKind::Bang => {
                self.bump();
                Ok(Expr::Unary { op: UnOp::Not, expr: Box::new(self.unary(diags)?) })
            }
            _ => self.postfix(diags),
        }
    }

    fn postfix(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        let mut e = self.primary(diags)?;
        while self.peek_kind() == &TokKind::Dot {
            self.bump();
            let name = self.ident(diags)?;
            if self.peek_kind() == &TokKind::LParen {
                let args = self.args_parens(diags)?;
                e = Expr::Call { recv: Box::new(e), name, args };
            } else {
                e = Expr::Field { recv: Box::new(e), name };
            }
        }
        Ok(e)
    }

    fn primary(&mut self, diags: &mut Diagnostics) -> PResult<Expr> {
        let line = self.peek().line;
        match self.peek_kind().clone() {
            TokKind::KwNull => {
                self.bump();
                Ok(Expr::Null)
            }
            TokKind::KwTrue => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            TokKind::KwFalse => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            TokKind::Int(i) => {
                self.bump();
                Ok(Expr::Int(i))
            }
            TokKind::Float(x) => {
                self.bump();
                Ok(Expr::Float(x))
            }
            TokKind::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            TokKind::KwThis => {
                self.bump();
                Ok(Expr::This)
            }
            TokKind::KwNew => {
                self.bump();
                let class = self.dotted_name(diags)?;
                let args = self.args_parens(diags)?;
                Ok(Expr::New { class, args, line })
            }
            TokKind::LParen => {
                self.bump();
                let e = self.expr(diags)?;
                self.expect(&TokKind::RParen, "`)`", diags)?;
                Ok(e)
            }
            TokKind::Ident(s) => {
                self.bump();
                Ok(Expr::Ident(s))
            }
            _ => {
                self.error_here(diags, "attendu une expression".into());
                Err(())
            }
        }
    }

    /// `( args )` complets.
    fn args_parens(&mut self, diags: &mut Diagnostics) -> PResult<Vec<Expr>> {
        self.expect(&TokKind::LParen, "`(`", diags)?;
        self.args(diags)
    }

    /// Arguments après `(` déjà consommée, jusqu'à `)` incluse.
    fn args(&mut self, diags: &mut Diagnostics) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&TokKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr(diags)?);
            if self.eat(&TokKind::Comma) {
                continue;
            }
            self.expect(&TokKind::RParen, "`)` après les arguments", diags)?;
            break;
        }
        Ok(args)
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse_ok(src: &str) -> Program {
        let mut d = Diagnostics::default();
        let p = parse_source(src, "<test>", &mut d);
        assert!(d.is_empty(), "diags: {}", d.report());
        p.expect("programme attendu")
    }

    #[test]
    fn empty_class() {
        let p = parse_ok("class NoBody{}");
        assert_eq!(p.classes.len(), 1);
        let c = &p.classes[0];
        assert_eq!(c.name, "NoBody");
        assert!(c.extends.is_none());
        assert!(c.fields.is_empty() && c.methods.is_empty() && c.ctors.is_empty());
    }

    #[test]
    fn package_and_extends() {
        let p = parse_ok("package even.has.a.pkg; class Dump2 extends foo.bar.Bar {}");
        assert_eq!(p.package.as_deref(), Some("even.has.a.pkg"));
        assert_eq!(p.classes[0].extends.as_deref(), Some("foo.bar.Bar"));
    }

    #[test]
    fn members_field_method_ctor_nested() {
        let p = parse_ok(indoc! {r"
            class Demo {
                str abc;
                int count;
                class Inner {}
                Demo(str abc) {
                    super();
                    this.abc = abc;
                }
                str hello(str who) {
                    return this.abc + who;
                }
            }
        "});
        let c = &p.classes[0];
        assert_eq!(c.fields.len(), 2);
        assert_eq!(c.nested.len(), 1);
        assert_eq!(c.ctors.len(), 1);
        assert_eq!(c.methods.len(), 1);
        assert!(matches!(c.ctors[0].body[0], Stmt::Super { .. }));
    }

    #[test]
    fn local_decl_vs_assign_vs_expr() {
        let p = parse_ok(indoc! {r"
            class C {
                void m(int x) {
                    int y = x + 1;
                    pkg.Other o = new pkg.Other();
                    y = y * 2;
                    this.f = y;
                    o.poke(y);
                }
            }
        "});
        let body = &p.classes[0].methods[0].body;
        assert!(matches!(body[0], Stmt::Local { ty: TypeExpr::Int, .. }));
        assert!(matches!(&body[1], Stmt::Local { ty: TypeExpr::Named(n), .. } if n == "pkg.Other"));
        assert!(matches!(&body[2], Stmt::Assign { target: AssignTarget::Local(_), .. }));
        assert!(matches!(&body[3], Stmt::Assign { target: AssignTarget::Field { .. }, .. }));
        assert!(matches!(&body[4], Stmt::Expr { value: Expr::Call { .. }, .. }));
    }

    #[test]
    fn precedence() {
        let p = parse_ok("class C { int m() { return 1 + 2 * 3 == 7; } }");
        let body = &p.classes[0].methods[0].body;
        let Stmt::Return { value: Some(Expr::Binary { op: BinOp::Eq, .. }), .. } = &body[0] else {
            panic!("attendu `==` au sommet");
        };
    }

    #[test]
    fn syntax_error_reported() {
        let mut d = Diagnostics::default();
        let p = parse_source("class {", "<bad>", &mut d);
        assert!(p.is_none());
        assert!(!d.is_empty());
        assert!(d.report().contains("<bad>"));
    }

    #[test]
    fn control_flow() {
        let p = parse_ok(indoc! {r"
            class C {
                int sum(int n) {
                    int acc = 0;
                    int i = 0;
                    while (i < n) {
                        i = i + 1;
                        acc = acc + i;
                    }
                    if (acc > 10) { print(acc); } else { print(0); }
                    return acc;
                }
            }
        "});
        let body = &p.classes[0].methods[0].body;
        assert!(matches!(body[2], Stmt::While { .. }));
        assert!(matches!(body[3], Stmt::If { else_branch: Some(_), .. }));
    }
}
