//! bytecode — représentation exécutable des corps de méthodes.
//!
//! - `op`    : le jeu d'instructions de la machine à pile.
//! - `chunk` : `Chunk` (ops + constantes + lignes), pool avec dé-dupe.

pub mod chunk;
pub mod op;

pub use chunk::{Chunk, ConstPool, ConstValue, LineTable};
pub use op::Op;
