//! format.rs — (Dé)sérialisation binaire d'une `ClassImage`.
//!
//! Format **SBLC** (Little Endian) — compact, stable, avec intégrité CRC32.
//!
//! ```text
//! FILE:
//!   magic[6]  = b"SABLC\0"
//!   BODY
//!   crc32     = u32            (CRC32/IEEE du BODY complet)
//!   trailer[6]= b"SEND\0\0"
//!
//! BODY:
//!   version   = u32            (FILE_VERSION)
//!   flags     = u32            (bit0: stripped = aucune table de lignes)
//!   fqn       = name           (name = len u16 + utf8)
//!   super_fqn = name
//!   nested    = n u16 × name
//!   fields    = n u16 × (name, typeref)
//!   ctors     = n u16 × (params: n u16 × typeref, chunk)
//!   methods   = n u16 × (name, params, ret typeref, chunk)
//!
//! typeref : tag u8 (0=void 1=int 2=float 3=bool 4=str 5=classe + name)
//! const   : tag u8 (0=null 1=bool u8 2=i64 3=f64 bits u64 4=str u32+utf8)
//! chunk   : n_consts u32 × const, n_ops u32 × op, n_runs u32 × (u32,u32,u32)
//! op      : tag u8 + opérandes selon variante
//! ```
//!
//! Le CRC couvre version..fin des sections pour détecter la corruption.

use thiserror::Error;

use crate::bytecode::chunk::{Chunk, ConstValue, LineRun, LineTable};
use crate::bytecode::{ConstPool, Op};
use crate::image::{ClassImage, CtorImage, FieldImage, MethodImage, TypeRef};

pub const MAGIC: &[u8; 6] = b"SABLC\0";
pub const TRAILER_MAGIC: &[u8; 6] = b"SEND\0\0";

// Incrémente si la structure **binaire** change (pas l'impl interne).
pub const FILE_VERSION: u32 = 1;

// Flags
const FLAG_STRIPPED: u32 = 0x0000_0001;

// Garde-fous (anti OOM / artefacts malformés)
const MAX_NAME_LEN: usize = u16::MAX as usize;
const MAX_STR_LEN: usize = 16 * 1024 * 1024; // 16 MiB par constante chaîne
const MAX_MEMBERS: u16 = 10_000;
const MAX_CONSTS: u32 = 65_536;
const MAX_OPS: u32 = 1_000_000;
const MAX_RUNS: u32 = 1_000_000;

/// Erreurs de décodage d'une image.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("mauvaise empreinte (MAGIC) — pas un artefact SBLC")]
    BadMagic,
    #[error("trailer manquant/corrompu")]
    BadTrailer,
    #[error("version non supportée (got {got}, expected {expected})")]
    BadVersion { got: u32, expected: u32 },
    #[error("format invalide: {0}")]
    BadFormat(&'static str),
    #[error("taille excessive: {0}")]
    TooBig(&'static str),
    #[error("CRC32 invalide (expected=0x{expected:08X}, got=0x{got:08X})")]
    ChecksumMismatch { expected: u32, got: u32 },
}

/* -----------------------------
 * API
 * ----------------------------- */

/// Encode une image en artefact binaire autonome.
pub fn encode_image(img: &ClassImage) -> Vec<u8> {
    let mut body = Vec::with_capacity(256);
    write_u32(&mut body, FILE_VERSION);

    let stripped = img
        .ctors
        .iter()
        .map(|c| &c.body)
        .chain(img.methods.iter().map(|m| &m.body))
        .all(|ch| ch.lines.is_empty());
    write_u32(&mut body, if stripped { FLAG_STRIPPED } else { 0 });

    write_name(&mut body, &img.fqn);
    write_name(&mut body, &img.super_fqn);

    write_u16(&mut body, img.nested.len() as u16);
    for n in &img.nested {
        write_name(&mut body, n);
    }

    write_u16(&mut body, img.fields.len() as u16);
    for f in &img.fields {
        write_name(&mut body, &f.name);
        write_typeref(&mut body, &f.ty);
    }

    write_u16(&mut body, img.ctors.len() as u16);
    for c in &img.ctors {
        write_u16(&mut body, c.params.len() as u16);
        for p in &c.params {
            write_typeref(&mut body, p);
        }
        write_chunk(&mut body, &c.body);
    }

    write_u16(&mut body, img.methods.len() as u16);
    for m in &img.methods {
        write_name(&mut body, &m.name);
        write_u16(&mut body, m.params.len() as u16);
        for p in &m.params {
            write_typeref(&mut body, p);
        }
        write_typeref(&mut body, &m.ret);
        write_chunk(&mut body, &m.body);
    }

    let mut out = Vec::with_capacity(MAGIC.len() + body.len() + 10);
    out.extend_from_slice(MAGIC);
    let crc = crc32_ieee(&body);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(TRAILER_MAGIC);
    out
}

/// Décode un artefact binaire en image (vérifie magic, trailer, CRC, version).
pub fn decode_image(bytes: &[u8]) -> Result<ClassImage, DecodeError> {
    if bytes.len() < MAGIC.len() + 4 + TRAILER_MAGIC.len() {
        return Err(DecodeError::BadTrailer);
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let split = bytes.len() - (4 + TRAILER_MAGIC.len());
    let body = &bytes[MAGIC.len()..split];
    let trailer = &bytes[split..];
    if &trailer[4..] != TRAILER_MAGIC {
        return Err(DecodeError::BadTrailer);
    }
    let got_crc = u32::from_le_bytes(trailer[..4].try_into().expect("4 octets"));
    let exp_crc = crc32_ieee(body);
    if got_crc != exp_crc {
        return Err(DecodeError::ChecksumMismatch { expected: exp_crc, got: got_crc });
    }

    let mut cur = Cursor::new(body);
    let version = cur.read_u32()?;
    if version != FILE_VERSION {
        return Err(DecodeError::BadVersion { got: version, expected: FILE_VERSION });
    }
    let _flags = cur.read_u32()?;

    let fqn = cur.read_name()?;
    let super_fqn = cur.read_name()?;

    let n_nested = guard_u16(cur.read_u16()?, "nested")?;
    let mut nested = Vec::with_capacity(n_nested as usize);
    for _ in 0..n_nested {
        nested.push(cur.read_name()?);
    }

    let n_fields = guard_u16(cur.read_u16()?, "fields")?;
    let mut fields = Vec::with_capacity(n_fields as usize);
    for _ in 0..n_fields {
        let name = cur.read_name()?;
        let ty = cur.read_typeref()?;
        fields.push(FieldImage { name, ty });
    }

    let n_ctors = guard_u16(cur.read_u16()?, "ctors")?;
    let mut ctors = Vec::with_capacity(n_ctors as usize);
    for _ in 0..n_ctors {
        let n_params = guard_u16(cur.read_u16()?, "params")?;
        let mut params = Vec::with_capacity(n_params as usize);
        for _ in 0..n_params {
            params.push(cur.read_typeref()?);
        }
        let body = cur.read_chunk()?;
        ctors.push(CtorImage { params, body });
    }

    let n_methods = guard_u16(cur.read_u16()?, "methods")?;
    let mut methods = Vec::with_capacity(n_methods as usize);
    for _ in 0..n_methods {
        let name = cur.read_name()?;
        let n_params = guard_u16(cur.read_u16()?, "params")?;
        let mut params = Vec::with_capacity(n_params as usize);
        for _ in 0..n_params {
            params.push(cur.read_typeref()?);
        }
        let ret = cur.read_typeref()?;
        let body = cur.read_chunk()?;
        methods.push(MethodImage { name, params, ret, body });
    }

    if !cur.at_end() {
        return Err(DecodeError::BadFormat("octets excédentaires après les sections"));
    }

    Ok(ClassImage { fqn, super_fqn, nested, fields, ctors, methods })
}

/* -----------------------------
 * Écriture (LE, sur Vec<u8>)
 * ----------------------------- */

#[inline]
fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}
#[inline]
fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
#[inline]
fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
#[inline]
fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
#[inline]
fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
#[inline]
fn write_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_name(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    debug_assert!(bytes.len() <= MAX_NAME_LEN, "nom trop long");
    write_u16(buf, bytes.len() as u16);
    buf.extend_from_slice(bytes);
}

fn write_typeref(buf: &mut Vec<u8>, t: &TypeRef) {
    match t {
        TypeRef::Unit => write_u8(buf, 0),
        TypeRef::Int => write_u8(buf, 1),
        TypeRef::Float => write_u8(buf, 2),
        TypeRef::Bool => write_u8(buf, 3),
        TypeRef::Str => write_u8(buf, 4),
        TypeRef::Class(fqn) => {
            write_u8(buf, 5);
            write_name(buf, fqn);
        }
    }
}

fn write_chunk(buf: &mut Vec<u8>, ch: &Chunk) {
    write_u32(buf, ch.consts.len() as u32);
    for (_, c) in ch.consts.iter() {
        match c {
            ConstValue::Null => write_u8(buf, 0),
            ConstValue::Bool(b) => {
                write_u8(buf, 1);
                write_u8(buf, u8::from(*b));
            }
            ConstValue::I64(i) => {
                write_u8(buf, 2);
                write_i64(buf, *i);
            }
            ConstValue::F64(x) => {
                write_u8(buf, 3);
                write_u64(buf, x.to_bits());
            }
            ConstValue::Str(s) => {
                write_u8(buf, 4);
                let b = s.as_bytes();
                write_u32(buf, b.len() as u32);
                buf.extend_from_slice(b);
            }
        }
    }

    write_u32(buf, ch.ops.len() as u32);
    for op in &ch.ops {
        write_op(buf, *op);
    }

    let runs: Vec<&LineRun> = ch.lines.iter_runs().collect();
    write_u32(buf, runs.len() as u32);
    for r in runs {
        write_u32(buf, r.start_pc);
        write_u32(buf, r.line);
        write_u32(buf, r.len);
    }
}

fn write_op(buf: &mut Vec<u8>, op: Op) {
    use Op::*;
    match op {
        LoadConst(ix) => {
            write_u8(buf, 0);
            write_u32(buf, ix);
        }
        LoadTrue => write_u8(buf, 1),
        LoadFalse => write_u8(buf, 2),
        LoadNull => write_u8(buf, 3),
        LoadLocal(s) => {
            write_u8(buf, 4);
            write_u8(buf, s);
        }
        StoreLocal(s) => {
            write_u8(buf, 5);
            write_u8(buf, s);
        }
        GetField(ix) => {
            write_u8(buf, 6);
            write_u32(buf, ix);
        }
        SetField(ix) => {
            write_u8(buf, 7);
            write_u32(buf, ix);
        }
        Invoke(ix, argc) => {
            write_u8(buf, 8);
            write_u32(buf, ix);
            write_u8(buf, argc);
        }
        New(ix, argc) => {
            write_u8(buf, 9);
            write_u32(buf, ix);
            write_u8(buf, argc);
        }
        SuperInit(argc) => {
            write_u8(buf, 10);
            write_u8(buf, argc);
        }
        Jump(off) => {
            write_u8(buf, 11);
            write_i32(buf, off);
        }
        JumpIfFalse(off) => {
            write_u8(buf, 12);
            write_i32(buf, off);
        }
        Return => write_u8(buf, 13),
        ReturnVoid => write_u8(buf, 14),
        Nop => write_u8(buf, 15),
        Add => write_u8(buf, 16),
        Sub => write_u8(buf, 17),
        Mul => write_u8(buf, 18),
        Div => write_u8(buf, 19),
        Mod => write_u8(buf, 20),
        Neg => write_u8(buf, 21),
        Not => write_u8(buf, 22),
        Eq => write_u8(buf, 23),
        Ne => write_u8(buf, 24),
        Lt => write_u8(buf, 25),
        Le => write_u8(buf, 26),
        Gt => write_u8(buf, 27),
        Ge => write_u8(buf, 28),
        Print => write_u8(buf, 29),
        Pop => write_u8(buf, 30),
    }
}

/* -----------------------------
 * Lecture (curseur LE sur slice)
 * ----------------------------- */

struct Cursor<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn at_end(&self) -> bool {
        self.off == self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.off + n > self.buf.len() {
            return Err(DecodeError::BadFormat("EOF inattendu"));
        }
        let s = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(s)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }
    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("2 octets")))
    }
    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 octets")))
    }
    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().expect("4 octets")))
    }
    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 octets")))
    }
    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("8 octets")))
    }

    fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadFormat("nom non UTF-8"))
    }

    fn read_typeref(&mut self) -> Result<TypeRef, DecodeError> {
        match self.read_u8()? {
            0 => Ok(TypeRef::Unit),
            1 => Ok(TypeRef::Int),
            2 => Ok(TypeRef::Float),
            3 => Ok(TypeRef::Bool),
            4 => Ok(TypeRef::Str),
            5 => Ok(TypeRef::Class(self.read_name()?)),
            _ => Err(DecodeError::BadFormat("tag de type inconnu")),
        }
    }

    fn read_chunk(&mut self) -> Result<Chunk, DecodeError> {
        let n_consts = self.read_u32()?;
        if n_consts > MAX_CONSTS {
            return Err(DecodeError::TooBig("consts"));
        }
        let mut consts = ConstPool::new();
        for _ in 0..n_consts {
            let v = match self.read_u8()? {
                0 => ConstValue::Null,
                1 => ConstValue::Bool(self.read_u8()? != 0),
                2 => ConstValue::I64(self.read_i64()?),
                3 => ConstValue::F64(f64::from_bits(self.read_u64()?)),
                4 => {
                    let len = self.read_u32()? as usize;
                    if len > MAX_STR_LEN {
                        return Err(DecodeError::TooBig("constante chaîne"));
                    }
                    let raw = self.take(len)?;
                    let s = String::from_utf8(raw.to_vec())
                        .map_err(|_| DecodeError::BadFormat("chaîne non UTF-8"))?;
                    ConstValue::Str(s)
                }
                _ => return Err(DecodeError::BadFormat("tag de constante inconnu")),
            };
            consts.push_raw(v);
        }

        let n_ops = self.read_u32()?;
        if n_ops > MAX_OPS {
            return Err(DecodeError::TooBig("ops"));
        }
        let mut ops = Vec::with_capacity(n_ops as usize);
        for _ in 0..n_ops {
            ops.push(self.read_op()?);
        }

        let n_runs = self.read_u32()?;
        if n_runs > MAX_RUNS {
            return Err(DecodeError::TooBig("line runs"));
        }
        let mut lines = LineTable::new();
        for _ in 0..n_runs {
            let start_pc = self.read_u32()?;
            let line = self.read_u32()?;
            let len = self.read_u32()?;
            lines.push_run(LineRun { start_pc, line, len });
        }

        Ok(Chunk { ops, consts, lines })
    }

    fn read_op(&mut self) -> Result<Op, DecodeError> {
        use Op::*;
        Ok(match self.read_u8()? {
            0 => LoadConst(self.read_u32()?),
            1 => LoadTrue,
            2 => LoadFalse,
            3 => LoadNull,
            4 => LoadLocal(self.read_u8()?),
            5 => StoreLocal(self.read_u8()?),
            6 => GetField(self.read_u32()?),
            7 => SetField(self.read_u32()?),
            8 => Invoke(self.read_u32()?, self.read_u8()?),
            9 => New(self.read_u32()?, self.read_u8()?),
            10 => SuperInit(self.read_u8()?),
            11 => Jump(self.read_i32()?),
            12 => JumpIfFalse(self.read_i32()?),
            13 => Return,
            14 => ReturnVoid,
            15 => Nop,
            16 => Add,
            17 => Sub,
            18 => Mul,
            19 => Div,
            20 => Mod,
            21 => Neg,
            22 => Not,
            23 => Eq,
            24 => Ne,
            25 => Lt,
            26 => Le,
            27 => Gt,
            28 => Ge,
            29 => Print,
            30 => Pop,
            _ => return Err(DecodeError::BadFormat("opcode inconnu")),
        })
    }
}

fn guard_u16(val: u16, label: &'static str) -> Result<u16, DecodeError> {
    if val > MAX_MEMBERS {
        Err(DecodeError::TooBig(label))
    } else {
        Ok(val)
    }
}

/* -----------------------------
 * CRC32 (IEEE, polynôme 0xEDB88320)
 * ----------------------------- */

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut c = i as u32;
        let mut j = 0;
        while j < 8 {
            c = if (c & 1) != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            j += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = crc_table();

pub(crate) fn crc32_ieee(data: &[u8]) -> u32 {
    let mut c: u32 = 0xFFFF_FFFF;
    for &b in data {
        c = CRC_TABLE[((c ^ u32::from(b)) & 0xFF) as usize] ^ (c >> 8);
    }
    !c
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ROOT_CLASS;

    fn sample_image() -> ClassImage {
        let mut img = ClassImage::new("pkg.Demo");
        img.nested.push("pkg.Demo.Inner".into());
        img.fields.push(FieldImage { name: "count".into(), ty: TypeRef::Int });
        img.fields.push(FieldImage { name: "peer".into(), ty: TypeRef::Class("pkg.Other".into()) });

        let mut body = Chunk::new();
        let k = body.add_const(ConstValue::Str("salut".into()));
        body.push_op(Op::LoadConst(k), Some(4));
        body.push_op(Op::Print, Some(4));
        body.push_op(Op::ReturnVoid, Some(5));
        img.methods.push(MethodImage {
            name: "greet".into(),
            params: vec![TypeRef::Str],
            ret: TypeRef::Unit,
            body,
        });

        let mut ctor = Chunk::new();
        ctor.push_op(Op::SuperInit(0), None);
        ctor.push_op(Op::ReturnVoid, None);
        img.ctors.push(CtorImage { params: vec![], body: ctor });
        img
    }

    #[test]
    fn roundtrip() {
        let img = sample_image();
        let bytes = encode_image(&img);
        let back = decode_image(&bytes).expect("roundtrip ok");
        assert_eq!(back.fqn, "pkg.Demo");
        assert_eq!(back.super_fqn, ROOT_CLASS);
        assert_eq!(back.nested, vec!["pkg.Demo.Inner".to_string()]);
        assert_eq!(back.fields.len(), 2);
        assert_eq!(back.fields[1].ty, TypeRef::Class("pkg.Other".into()));
        assert_eq!(back.ctors.len(), 1);
        assert_eq!(back.methods.len(), 1);
        assert_eq!(back.methods[0].body.ops.len(), 3);
        assert_eq!(back.methods[0].body.lines.line_for_pc(2), Some(5));
    }

    #[test]
    fn checksum_detects_corruption() {
        let bytes0 = encode_image(&sample_image());
        let mut bytes = bytes0.clone();
        // corrompt un octet du corps
        bytes[MAGIC.len() + 12] ^= 0xFF;
        match decode_image(&bytes) {
            Err(DecodeError::ChecksumMismatch { .. }) => {}
            other => panic!("attendu ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode_image(&sample_image());
        bytes[0] = b'X';
        assert!(matches!(decode_image(&bytes), Err(DecodeError::BadMagic)));
    }

    #[test]
    fn truncated_rejected() {
        let bytes = encode_image(&sample_image());
        assert!(decode_image(&bytes[..8]).is_err());
    }

    #[test]
    fn version_mismatch_rejected() {
        let img = sample_image();
        let mut bytes = encode_image(&img);
        // version = premiers 4 octets du body ; il faut refaire le CRC pour
        // atteindre la vérification de version.
        let body_start = MAGIC.len();
        let body_end = bytes.len() - (4 + TRAILER_MAGIC.len());
        bytes[body_start..body_start + 4].copy_from_slice(&99u32.to_le_bytes());
        let crc = crc32_ieee(&bytes[body_start..body_end]);
        bytes[body_end..body_end + 4].copy_from_slice(&crc.to_le_bytes());
        match decode_image(&bytes) {
            Err(DecodeError::BadVersion { got: 99, expected: FILE_VERSION }) => {}
            other => panic!("attendu BadVersion, got {other:?}"),
        }
    }

    #[test]
    fn trailing_garbage_rejected() {
        let img = sample_image();
        let clean = encode_image(&img);
        // insère des octets entre sections et CRC : le CRC ne matche plus
        let mut bytes = clean.clone();
        let at = bytes.len() - (4 + TRAILER_MAGIC.len());
        bytes.insert(at, 0xAB);
        assert!(decode_image(&bytes).is_err());
    }
}
