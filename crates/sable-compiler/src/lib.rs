//! sable-compiler — Frontend du langage Sable et service de compilation.
//!
//! Le crate couvre deux étages :
//!
//! 1. **Toolchain** : lexer → parser → résolution de noms → codegen vers des
//!    images de classes (`sable-core`). Une instance de toolchain n'est
//!    jamais partagée entre threads ; le service en garde une par thread.
//! 2. **Service** : `CompileService` orchestre un appel de compilation sur
//!    un lot de sources en mémoire, valide le nombre d'artefacts produits,
//!    agrège les diagnostics en une seule erreur, et offre un canal de dump
//!    (sources + classes) pour l'inspection hors-ligne.
//!
//! Aucun accès disque hors dump : les sources et les artefacts vivent dans
//! le gestionnaire de fichiers virtuel (`vfs`).

pub mod ast;
pub mod codegen;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod service;
pub mod vfs;

// ---------- Reexports de confort ----------
pub use diag::{Diag, Diagnostics};
pub use service::{
    Classpath, CompileError, CompileFlags, CompileService, DumpOptions, ServiceOptions,
    SetClasspath,
};
pub use vfs::{CompiledClass, OutputStore, Source};

/// Version du crate (lisible, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
