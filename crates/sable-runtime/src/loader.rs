//! loader.rs — Le chargeur **isolé** : définitions privées prioritaires,
//! délégation au parent sinon.
//!
//! Deux tables explicites :
//! - `pending` : FQN → octets d'image, **consommable** — l'entrée disparaît
//!   à la première résolution, ce qui garantit qu'un artefact n'est défini
//!   qu'une fois par ce chargeur ;
//! - `defined` : FQN → classe matérialisée — les résolutions suivantes du
//!   même nom rendent le même `Arc`, jamais une redéfinition.
//!
//! Un nom absent des deux tables est délégué à la chaîne parente. La
//! mutabilité intérieure passe par `RefCell` : le chargeur n'est pas
//! `Sync`, le confiner à un thread est donc vérifié à la compilation.

use std::cell::RefCell;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, trace};
use thiserror::Error;

use sable_compiler::CompiledClass;
use sable_core::{decode_image, DecodeError};

use crate::class::Class;

/// Résolution d'un FQN vers une classe chargée.
pub trait Loader {
    fn resolve(&self, fqn: &str) -> Result<Arc<Class>, ResolveError>;
}

/// Erreurs de résolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Ni la table privée, ni la chaîne parente ne connaissent ce nom.
    #[error("classe introuvable: {0}")]
    NotFound(String),

    /// L'artefact privé existe mais ne se décode pas.
    #[error("artefact invalide pour `{fqn}`: {source}")]
    BadImage {
        fqn: String,
        #[source]
        source: DecodeError,
    },

    /// L'image décodée ne porte pas le FQN sous lequel elle a été fournie.
    #[error("artefact `{expected}` déclare `{found}`")]
    NameMismatch { expected: String, found: String },
}

/// Chargeur de classes sur un lot d'artefacts compilés.
pub struct IsolatedLoader {
    parent: Arc<dyn Loader>,
    pending: RefCell<AHashMap<String, Vec<u8>>>,
    defined: RefCell<AHashMap<String, Arc<Class>>>,
}

impl IsolatedLoader {
    /// Construit le chargeur sur un lot. Les FQN en double s'écrasent en
    /// silence, dernier gagnant — simplification assumée, non validée.
    pub fn new(parent: Arc<dyn Loader>, units: Vec<CompiledClass>) -> Self {
        let mut pending = AHashMap::with_capacity(units.len());
        for u in units {
            pending.insert(u.fqn, u.bytes);
        }
        debug!("chargeur isolé: {} définition(s) privée(s)", pending.len());
        Self { parent, pending: RefCell::new(pending), defined: RefCell::new(AHashMap::new()) }
    }

    /// Matérialise une image privée : décode, résout la superclasse **à
    /// travers ce chargeur** (ce qui peut consommer d'autres entrées
    /// privées), puis construit la classe.
    fn define(&self, fqn: &str, bytes: &[u8]) -> Result<Arc<Class>, ResolveError> {
        let img = decode_image(bytes)
            .map_err(|source| ResolveError::BadImage { fqn: fqn.to_string(), source })?;
        if img.fqn != fqn {
            return Err(ResolveError::NameMismatch {
                expected: fqn.to_string(),
                found: img.fqn,
            });
        }
        let superclass = self.resolve(&img.super_fqn)?;
        trace!("définition de {fqn} (super: {})", superclass.name());
        Ok(Arc::new(Class::from_image(img, superclass)))
    }

    /* ----- Introspection de l'invariant de consommation ----- */

    /// L'artefact est-il encore en attente de définition ?
    pub fn is_pending(&self, fqn: &str) -> bool {
        self.pending.borrow().contains_key(fqn)
    }

    /// La classe a-t-elle déjà été définie par **ce** chargeur ?
    pub fn is_defined(&self, fqn: &str) -> bool {
        self.defined.borrow().contains_key(fqn)
    }

    /// Nombre d'artefacts privés pas encore consommés.
    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl Loader for IsolatedLoader {
    fn resolve(&self, fqn: &str) -> Result<Arc<Class>, ResolveError> {
        // 1. déjà définie par ce chargeur → même Arc, toujours
        if let Some(c) = self.defined.borrow().get(fqn) {
            return Ok(Arc::clone(c));
        }

        // 2. définition privée en attente → consommation puis définition
        let taken = self.pending.borrow_mut().remove(fqn);
        if let Some(bytes) = taken {
            let class = self.define(fqn, &bytes)?;
            self.defined.borrow_mut().insert(fqn.to_string(), Arc::clone(&class));
            return Ok(class);
        }

        // 3. délégation à la chaîne parente
        self.parent.resolve(fqn)
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRegistry;
    use sable_core::image::ClassImage;
    use sable_core::{encode_image, ROOT_CLASS};

    fn unit(fqn: &str, super_fqn: &str) -> CompiledClass {
        let mut img = ClassImage::new(fqn);
        img.super_fqn = super_fqn.to_string();
        CompiledClass { fqn: fqn.to_string(), bytes: encode_image(&img) }
    }

    #[test]
    fn resolve_consumes_then_caches() {
        let reg = HostRegistry::new();
        let loader = IsolatedLoader::new(reg, vec![unit("p.A", ROOT_CLASS)]);

        assert!(loader.is_pending("p.A"));
        let first = loader.resolve("p.A").expect("définie");
        assert!(!loader.is_pending("p.A"));
        assert!(loader.is_defined("p.A"));
        assert_eq!(loader.pending_len(), 0);

        // seconde résolution : même Arc, pas de redéfinition
        let second = loader.resolve("p.A").expect("cache");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn super_resolution_consumes_transitively() {
        let reg = HostRegistry::new();
        let loader =
            IsolatedLoader::new(reg, vec![unit("p.A", ROOT_CLASS), unit("p.B", "p.A")]);

        // résoudre B d'abord tire A au passage
        let b = loader.resolve("p.B").expect("B");
        assert_eq!(loader.pending_len(), 0);
        assert!(loader.is_defined("p.A"));
        let a = loader.resolve("p.A").expect("A");
        assert!(Arc::ptr_eq(b.superclass().expect("super"), &a));
    }

    #[test]
    fn unknown_name_falls_to_parent_then_not_found() {
        let reg = HostRegistry::new();
        let loader = IsolatedLoader::new(reg, vec![]);
        match loader.resolve("no.Such") {
            Err(ResolveError::NotFound(n)) => assert_eq!(n, "no.Such"),
            other => panic!("attendu NotFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_fqn_last_wins() {
        let reg = HostRegistry::new();
        let mut img = ClassImage::new("p.Dup");
        img.nested.push("marqueur.v2".into()); // distingue la seconde image
        let v1 = unit("p.Dup", ROOT_CLASS);
        let v2 = CompiledClass { fqn: "p.Dup".into(), bytes: encode_image(&img) };
        let loader = IsolatedLoader::new(reg, vec![v1, v2]);
        let c = loader.resolve("p.Dup").expect("définie");
        assert_eq!(c.declared_nested(), ["marqueur.v2".to_string()]);
    }

    #[test]
    fn corrupt_image_is_reported() {
        let reg = HostRegistry::new();
        let mut bad = unit("p.X", ROOT_CLASS);
        let len = bad.bytes.len();
        bad.bytes[len / 2] ^= 0xFF;
        let loader = IsolatedLoader::new(reg, vec![bad]);
        assert!(matches!(loader.resolve("p.X"), Err(ResolveError::BadImage { .. })));
    }

    #[test]
    fn name_mismatch_is_reported() {
        let reg = HostRegistry::new();
        let img = ClassImage::new("p.Real");
        let lying = CompiledClass { fqn: "p.Fake".into(), bytes: encode_image(&img) };
        let loader = IsolatedLoader::new(reg, vec![lying]);
        assert!(matches!(loader.resolve("p.Fake"), Err(ResolveError::NameMismatch { .. })));
    }

    #[test]
    fn crafted_super_cycle_errors_instead_of_looping() {
        // impossible à produire par le compilateur ; un artefact forgé ne
        // doit pas boucler : la consommation coupe le cycle en NotFound.
        let reg = HostRegistry::new();
        let loader =
            IsolatedLoader::new(reg, vec![unit("p.A", "p.B"), unit("p.B", "p.A")]);
        assert!(matches!(loader.resolve("p.A"), Err(ResolveError::NotFound(_))));
    }
}
