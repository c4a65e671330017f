//! sable-core — Cœur du système Sable.
//!
//! Contient tout ce qu'il faut pour manipuler les artefacts compilés
//! (images de classes + bytecode), sans dépendre du compilateur ni du
//! runtime complet.
//!
//! ## Modules
//! - `bytecode` : opcodes `Op`, pool de constantes, table de lignes, `Chunk`.
//! - `image`    : modèle d'une image de classe (métadonnées + corps).
//! - `format`   : (dé)sérialisation binaire **SBLC** avec intégrité CRC32.
//! - `disasm`   : rendus lisibles (désassemblage, description d'image).

pub mod bytecode;
pub mod disasm;
pub mod format;
pub mod image;

// ---------- Reexports de confort ----------
pub use bytecode::{
    chunk::{Chunk, ConstPool, ConstValue, LineTable},
    op::Op,
};
pub use format::{decode_image, encode_image, DecodeError};
pub use image::{ClassImage, CtorImage, FieldImage, MethodImage, TypeRef};

/// FQN de la classe racine, supertype implicite de toute classe Sable.
pub const ROOT_CLASS: &str = "sable.Object";

/// Version du crate (lisible, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bannière de version (utile pour logs/outils).
pub fn version() -> String {
    format!("sable-core {VERSION}")
}

// ---------- Prelude ----------
pub mod prelude {
    pub use crate::{
        decode_image, encode_image, Chunk, ClassImage, ConstPool, ConstValue, DecodeError,
        LineTable, Op, TypeRef, ROOT_CLASS,
    };
}
