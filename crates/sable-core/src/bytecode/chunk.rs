//! chunk.rs — Corps compilé d'une méthode ou d'un constructeur.
//!
//! - Pool de constantes (null, bool, i64, f64, chaînes) avec dé-dupe des
//!   chaînes (les noms de champs/méthodes/FQN y passent tous).
//! - Table de lignes compacte (RLE) : PC → ligne source, présente quand la
//!   génération des infos de ligne est activée.

use std::fmt::{self, Write as _};

use crate::bytecode::Op;

/// Valeurs constantes embarquées dans un chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    /// Chaînes UTF-8 (internées côté pool).
    Str(String),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Null => f.write_str("null"),
            ConstValue::Bool(b) => write!(f, "{b}"),
            ConstValue::I64(i) => write!(f, "{i}"),
            ConstValue::F64(x) => {
                if x.is_nan() {
                    f.write_str("NaN")
                } else if x.is_infinite() {
                    f.write_str(if x.is_sign_positive() { "+Inf" } else { "-Inf" })
                } else {
                    write!(f, "{x}")
                }
            }
            ConstValue::Str(s) => {
                f.write_char('"')?;
                for ch in s.chars() {
                    match ch {
                        '\\' => f.write_str("\\\\")?,
                        '"' => f.write_str("\\\"")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        '\t' => f.write_str("\\t")?,
                        c if c.is_control() => write!(f, "\\u{{{:x}}}", c as u32)?,
                        c => f.write_char(c)?,
                    }
                }
                f.write_char('"')
            }
        }
    }
}

/// Pool de constantes avec dé-dupe basique des chaînes.
#[derive(Debug, Clone, Default)]
pub struct ConstPool {
    values: Vec<ConstValue>,
    str_index: ahash::AHashMap<String, u32>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self { values: Vec::new(), str_index: ahash::AHashMap::new() }
    }

    /// Ajoute une constante ; les chaînes identiques partagent leur indice.
    pub fn add(&mut self, v: ConstValue) -> u32 {
        match &v {
            ConstValue::Str(s) => {
                if let Some(&idx) = self.str_index.get(s) {
                    return idx;
                }
                let key = s.clone();
                let idx = self.push_raw(v);
                self.str_index.insert(key, idx);
                idx
            }
            _ => self.push_raw(v),
        }
    }

    /// Raccourci : interne une chaîne et rend son indice.
    pub fn add_str(&mut self, s: &str) -> u32 {
        self.add(ConstValue::Str(s.to_string()))
    }

    /// Ajout brut, sans dé-dupe : préserve les indices au décodage.
    pub(crate) fn push_raw(&mut self, v: ConstValue) -> u32 {
        let idx = self.values.len() as u32;
        self.values.push(v);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&ConstValue> {
        self.values.get(idx as usize)
    }

    /// Rend la chaîne d'indice donné, `None` si absente ou pas une chaîne.
    pub fn get_str(&self, idx: u32) -> Option<&str> {
        match self.get(idx) {
            Some(ConstValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &ConstValue)> {
        self.values.iter().enumerate().map(|(i, v)| (i as u32, v))
    }
}

/// Entrée compressée de la table de lignes (RLE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRun {
    pub start_pc: u32,
    pub line: u32,
    pub len: u32,
}

/// Table des lignes : map PC → ligne via segments RLE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    runs: Vec<LineRun>,
}

impl LineTable {
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    /// Enregistre la ligne de l'instruction au PC donné. Les PC doivent
    /// arriver en ordre croissant (un par `push_op`).
    pub fn push(&mut self, pc: u32, line: u32) {
        if let Some(last) = self.runs.last_mut() {
            if last.line == line && last.start_pc + last.len == pc {
                last.len += 1;
                return;
            }
        }
        self.runs.push(LineRun { start_pc: pc, line, len: 1 });
    }

    pub fn line_for_pc(&self, pc: u32) -> Option<u32> {
        self.runs
            .iter()
            .find(|r| pc >= r.start_pc && pc < r.start_pc + r.len)
            .map(|r| r.line)
    }

    pub fn iter_runs(&self) -> impl Iterator<Item = &LineRun> {
        self.runs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub(crate) fn push_run(&mut self, run: LineRun) {
        self.runs.push(run);
    }
}

/// Corps compilé : instructions + constantes + lignes.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub ops: Vec<Op>,
    pub consts: ConstPool,
    pub lines: LineTable,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute une instruction ; `line` renseigne la table si fournie.
    pub fn push_op(&mut self, op: Op, line: Option<u32>) -> u32 {
        let pc = self.ops.len() as u32;
        self.ops.push(op);
        if let Some(l) = line {
            self.lines.push(pc, l);
        }
        pc
    }

    pub fn add_const(&mut self, v: ConstValue) -> u32 {
        self.consts.add(v)
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_dedups_strings_only() {
        let mut p = ConstPool::new();
        let a = p.add_str("hello");
        let b = p.add_str("hello");
        let c = p.add_str("world");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let x = p.add(ConstValue::I64(1));
        let y = p.add(ConstValue::I64(1));
        assert_ne!(x, y); // pas de dé-dupe numérique
    }

    #[test]
    fn line_table_rle() {
        let mut t = LineTable::new();
        t.push(0, 3);
        t.push(1, 3);
        t.push(2, 3);
        t.push(3, 7);
        assert_eq!(t.line_for_pc(0), Some(3));
        assert_eq!(t.line_for_pc(2), Some(3));
        assert_eq!(t.line_for_pc(3), Some(7));
        assert_eq!(t.line_for_pc(4), None);
        assert_eq!(t.iter_runs().count(), 2);
    }

    #[test]
    fn chunk_records_lines_when_asked() {
        let mut c = Chunk::new();
        let k = c.add_const(ConstValue::I64(42));
        c.push_op(Op::LoadConst(k), Some(1));
        c.push_op(Op::Return, Some(1));
        assert_eq!(c.ops.len(), 2);
        assert_eq!(c.lines.line_for_pc(1), Some(1));

        let mut stripped = Chunk::new();
        stripped.push_op(Op::ReturnVoid, None);
        assert!(stripped.lines.is_empty());
    }
}
