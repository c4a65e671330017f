//! lexer.rs — Découpage en tokens, avec positions ligne/colonne.
//!
//! Commentaires `//` et `/* */`, chaînes avec échappements usuels,
//! entiers/flottants décimaux. Les erreurs lexicales alimentent les
//! diagnostics du lot sans interrompre les autres sources.

use crate::diag::Diagnostics;

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    // Mots-clés
    KwPackage,
    KwClass,
    KwExtends,
    KwReturn,
    KwPrint,
    KwIf,
    KwElse,
    KwWhile,
    KwNew,
    KwThis,
    KwSuper,
    KwTrue,
    KwFalse,
    KwNull,
    KwInt,
    KwFloat,
    KwBool,
    KwStr,
    KwVoid,

    // Littéraux
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // Symboles
    LBrace,
    RBrace,
    LParen,
    RParen,
    Semicolon,
    Comma,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tok {
    pub kind: TokKind,
    pub line: u32,
    pub col: u32,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    file: &'a str,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: &'a str) -> Self {
        Self { src: src.as_bytes(), file, pos: 0, line: 1, col: 1 }
    }

    /// Lexe toute la source ; termine toujours par `Eof`.
    pub fn lex_all(&mut self, diags: &mut Diagnostics) -> Vec<Tok> {
        let mut out = Vec::new();
        loop {
            let t = self.next_token(diags);
            let end = t.kind == TokKind::Eof;
            out.push(t);
            if end {
                break;
            }
        }
        out
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self, diags: &mut Diagnostics) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        if c == b'*' && self.peek() == Some(b'/') {
                            self.bump();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        diags.err(self.file, line, col, "commentaire /* non fermé");
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self, diags: &mut Diagnostics) -> Tok {
        self.skip_trivia(diags);
        let (line, col) = (self.line, self.col);
        let mk = |kind| Tok { kind, line, col };

        let Some(c) = self.peek() else {
            return mk(TokKind::Eof);
        };

        // Identifiants / mots-clés
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let word = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
            return mk(keyword_or_ident(word));
        }

        // Nombres
        if c.is_ascii_digit() {
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            let mut is_float = false;
            if self.peek() == Some(b'.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
            if is_float {
                return match text.parse::<f64>() {
                    Ok(x) => mk(TokKind::Float(x)),
                    Err(_) => {
                        diags.err(self.file, line, col, format!("flottant invalide `{text}`"));
                        mk(TokKind::Float(0.0))
                    }
                };
            }
            return match text.parse::<i64>() {
                Ok(i) => mk(TokKind::Int(i)),
                Err(_) => {
                    diags.err(self.file, line, col, format!("entier invalide `{text}`"));
                    mk(TokKind::Int(0))
                }
            };
        }

        // Chaînes
        if c == b'"' {
            self.bump();
            let mut s = String::new();
            loop {
                match self.bump() {
                    None | Some(b'\n') => {
                        diags.err(self.file, line, col, "chaîne non terminée");
                        break;
                    }
                    Some(b'"') => break,
                    Some(b'\\') => match self.bump() {
                        Some(b'n') => s.push('\n'),
                        Some(b't') => s.push('\t'),
                        Some(b'r') => s.push('\r'),
                        Some(b'"') => s.push('"'),
                        Some(b'\\') => s.push('\\'),
                        other => {
                            diags.err(
                                self.file,
                                self.line,
                                self.col,
                                format!("échappement inconnu `\\{}`", other.map_or(' ', char::from)),
                            );
                        }
                    },
                    Some(b) if b.is_ascii() => s.push(b as char),
                    Some(b) => {
                        // reconstitue l'UTF-8 multi-octets entamé
                        let mut buf = vec![b];
                        while self.peek().is_some_and(|c| (c & 0xC0) == 0x80) {
                            buf.push(self.bump().unwrap_or_default());
                        }
                        match std::str::from_utf8(&buf) {
                            Ok(t) => s.push_str(t),
                            Err(_) => diags.err(self.file, line, col, "séquence UTF-8 invalide"),
                        }
                    }
                }
            }
            return mk(TokKind::Str(s));
        }

        // Symboles
        self.bump();
        let kind = match c {
            b'{' => TokKind::LBrace,
            b'}' => TokKind::RBrace,
            b'(' => TokKind::LParen,
            b')' => TokKind::RParen,
            b';' => TokKind::Semicolon,
            b',' => TokKind::Comma,
            b'.' => TokKind::Dot,
            b'+' => TokKind::Plus,
            b'-' => TokKind::Minus,
            b'*' => TokKind::Star,
            b'/' => TokKind::Slash,
            b'%' => TokKind::Percent,
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokKind::EqEq
                } else {
                    TokKind::Assign
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokKind::NotEq
                } else {
                    TokKind::Bang
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokKind::Le
                } else {
                    TokKind::Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokKind::Ge
                } else {
                    TokKind::Gt
                }
            }
            other => {
                diags.err(self.file, line, col, format!("caractère inattendu `{}`", other as char));
                return self.next_token(diags);
            }
        };
        mk(kind)
    }
}

fn keyword_or_ident(word: &str) -> TokKind {
    match word {
        "package" => TokKind::KwPackage,
        "class" => TokKind::KwClass,
        "extends" => TokKind::KwExtends,
        "return" => TokKind::KwReturn,
        "print" => TokKind::KwPrint,
        "if" => TokKind::KwIf,
        "else" => TokKind::KwElse,
        "while" => TokKind::KwWhile,
        "new" => TokKind::KwNew,
        "this" => TokKind::KwThis,
        "super" => TokKind::KwSuper,
        "true" => TokKind::KwTrue,
        "false" => TokKind::KwFalse,
        "null" => TokKind::KwNull,
        "int" => TokKind::KwInt,
        "float" => TokKind::KwFloat,
        "bool" => TokKind::KwBool,
        "str" => TokKind::KwStr,
        "void" => TokKind::KwVoid,
        _ => TokKind::Ident(word.to_string()),
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokKind> {
        let mut d = Diagnostics::default();
        let toks = Lexer::new(src, "<test>").lex_all(&mut d);
        assert!(d.is_empty(), "diags inattendus: {}", d.report());
        toks.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn class_header() {
        assert_eq!(
            kinds("class NoBody{}"),
            vec![
                TokKind::KwClass,
                TokKind::Ident("NoBody".into()),
                TokKind::LBrace,
                TokKind::RBrace,
                TokKind::Eof
            ]
        );
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(
            kinds(r#"1 2.5 "a\nb""#),
            vec![
                TokKind::Int(1),
                TokKind::Float(2.5),
                TokKind::Str("a\nb".into()),
                TokKind::Eof
            ]
        );
    }

    #[test]
    fn comments_are_trivia() {
        assert_eq!(
            kinds("// ligne\n/* bloc\nmulti */ class"),
            vec![TokKind::KwClass, TokKind::Eof]
        );
    }

    #[test]
    fn compound_symbols() {
        assert_eq!(
            kinds("== != <= >= < > = !"),
            vec![
                TokKind::EqEq,
                TokKind::NotEq,
                TokKind::Le,
                TokKind::Ge,
                TokKind::Lt,
                TokKind::Gt,
                TokKind::Assign,
                TokKind::Bang,
                TokKind::Eof
            ]
        );
    }

    #[test]
    fn positions_track_newlines() {
        let mut d = Diagnostics::default();
        let toks = Lexer::new("class\n  x", "<test>").lex_all(&mut d);
        assert_eq!((toks[1].line, toks[1].col), (2, 3));
    }

    #[test]
    fn unterminated_string_is_reported() {
        let mut d = Diagnostics::default();
        let _ = Lexer::new("\"oops", "<test>").lex_all(&mut d);
        assert_eq!(d.len(), 1);
    }
}
