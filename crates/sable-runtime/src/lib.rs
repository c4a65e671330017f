//! sable-runtime — Chargement et exécution des classes Sable.
//!
//! ## Modules
//! - `class`  : modèle runtime (`Class`, méthodes, constructeurs, champs) et
//!              sa surface de réflexion.
//! - `value`  : valeurs dynamiques + instances.
//! - `loader` : le **chargeur isolé** (table privée consommable + cache des
//!              classes déjà définies + délégation au parent).
//! - `host`   : registre des classes visibles du processus hôte (le
//!              « classpath »), racine `sable.Object` incluse, et
//!              construction de classes natives.
//! - `interp` : interpréteur de bytecode — la facilité de réflexion par
//!              laquelle l'hôte instancie et invoque les unités chargées.
//!
//! Règle de confinement : un `IsolatedLoader` n'est pas `Sync` (mutabilité
//! intérieure par `RefCell`) — le partager entre threads ne compile pas,
//! ce qui rend la règle « un chargeur par contexte » structurelle.

pub mod class;
pub mod host;
pub mod interp;
pub mod loader;
pub mod value;

// ---------- Reexports de confort ----------
pub use class::{Body, Class, Ctor, Field, Method};
pub use host::{ClassBuilder, HostRegistry, NativeFn};
pub use interp::{ExecError, Interp};
pub use loader::{IsolatedLoader, Loader, ResolveError};
pub use value::{Instance, Value};

/// Version du crate (lisible, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
