//! class.rs — Modèle runtime d'une classe et surface de réflexion.
//!
//! Une `Class` est immuable une fois matérialisée ; l'identité d'un type
//! chargé est l'identité de son `Arc<Class>` (deux résolutions du même nom
//! via le même chargeur rendent le **même** pointeur).

use std::sync::Arc;

use sable_core::bytecode::Chunk;
use sable_core::image::{ClassImage, TypeRef};

use crate::host::NativeFn;

/// Champ déclaré par une classe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
}

/// Corps exécutable d'un membre : bytecode chargé, ou fonction native du
/// processus hôte.
#[derive(Clone)]
pub enum Body {
    Chunk(Chunk),
    Native(NativeFn),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Chunk(c) => f.debug_tuple("Chunk").field(&c.ops.len()).finish(),
            Body::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// Constructeur déclaré (sélectionné par arité).
#[derive(Debug, Clone)]
pub struct Ctor {
    pub params: Vec<TypeRef>,
    pub body: Body,
}

/// Méthode déclarée (dispatch dynamique par nom + arité).
#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub params: Vec<TypeRef>,
    pub ret: TypeRef,
    pub body: Body,
}

/// Une classe chargée. `superclass: None` uniquement pour la racine.
#[derive(Debug)]
pub struct Class {
    fqn: String,
    superclass: Option<Arc<Class>>,
    fields: Vec<Field>,
    ctors: Vec<Arc<Ctor>>,
    methods: Vec<Arc<Method>>,
    nested: Vec<String>,
}

impl Class {
    /// Matérialise une classe depuis son image décodée. La superclasse est
    /// déjà résolue par l'appelant (chargeur) — c'est là que se joue
    /// l'identité référentielle des supertypes.
    pub fn from_image(img: ClassImage, superclass: Arc<Class>) -> Self {
        Self {
            fqn: img.fqn,
            superclass: Some(superclass),
            fields: img
                .fields
                .into_iter()
                .map(|f| Field { name: f.name, ty: f.ty })
                .collect(),
            ctors: img
                .ctors
                .into_iter()
                .map(|c| Arc::new(Ctor { params: c.params, body: Body::Chunk(c.body) }))
                .collect(),
            methods: img
                .methods
                .into_iter()
                .map(|m| {
                    Arc::new(Method {
                        name: m.name,
                        params: m.params,
                        ret: m.ret,
                        body: Body::Chunk(m.body),
                    })
                })
                .collect(),
            nested: img.nested,
        }
    }

    /// Constructeur interne pour les classes hôtes (voir `ClassBuilder`).
    pub(crate) fn from_parts(
        fqn: String,
        superclass: Option<Arc<Class>>,
        fields: Vec<Field>,
        ctors: Vec<Arc<Ctor>>,
        methods: Vec<Arc<Method>>,
    ) -> Self {
        Self { fqn, superclass, fields, ctors, methods, nested: Vec::new() }
    }

    /* ----- Réflexion ----- */

    pub fn name(&self) -> &str {
        &self.fqn
    }

    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    pub fn declared_fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn declared_methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    pub fn declared_ctors(&self) -> &[Arc<Ctor>] {
        &self.ctors
    }

    /// FQN des classes imbriquées directes.
    pub fn declared_nested(&self) -> &[String] {
        &self.nested
    }

    /// Vrai si `self` est `other` ou en descend (identité de pointeurs le
    /// long de la chaîne, pas égalité de noms).
    pub fn is_subclass_of(&self, other: &Arc<Class>) -> bool {
        let mut cur = self;
        loop {
            if std::ptr::eq(cur, Arc::as_ptr(other)) {
                return true;
            }
            match &cur.superclass {
                Some(s) => cur = s,
                None => return false,
            }
        }
    }

    /// Recherche dynamique : méthode par nom + arité, en remontant la
    /// chaîne. Rend la classe **déclarante** avec la méthode.
    pub fn lookup_method(
        self: &Arc<Self>,
        name: &str,
        argc: usize,
    ) -> Option<(Arc<Class>, Arc<Method>)> {
        if let Some(m) = self.methods.iter().find(|m| m.name == name && m.params.len() == argc) {
            return Some((Arc::clone(self), Arc::clone(m)));
        }
        self.superclass.as_ref().and_then(|s| s.lookup_method(name, argc))
    }

    /// Constructeur par arité — déclaré par `self` uniquement (les
    /// constructeurs ne s'héritent pas).
    pub fn ctor_by_arity(&self, argc: usize) -> Option<&Arc<Ctor>> {
        self.ctors.iter().find(|c| c.params.len() == argc)
    }

    /// Vrai si un champ de ce nom existe sur la classe ou un ancêtre.
    pub fn has_field(&self, name: &str) -> bool {
        let mut cur = self;
        loop {
            if cur.fields.iter().any(|f| f.name == name) {
                return true;
            }
            match &cur.superclass {
                Some(s) => cur = s,
                None => return false,
            }
        }
    }

    /// Tous les champs, ancêtres d'abord (ordre d'allocation des défauts).
    pub fn all_fields(&self) -> Vec<&Field> {
        let mut out = Vec::new();
        fn walk<'a>(c: &'a Class, out: &mut Vec<&'a Field>) {
            if let Some(s) = &c.superclass {
                walk(s, out);
            }
            out.extend(c.fields.iter());
        }
        walk(self, &mut out);
        out
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRegistry;

    #[test]
    fn subclass_walks_pointers() {
        let reg = HostRegistry::new();
        let root = reg.root();
        let mid = Arc::new(Class::from_image(ClassImage::new("a.Mid"), Arc::clone(&root)));
        let leaf = Arc::new(Class::from_image(
            {
                let mut i = ClassImage::new("a.Leaf");
                i.super_fqn = "a.Mid".into();
                i
            },
            Arc::clone(&mid),
        ));
        assert!(leaf.is_subclass_of(&mid));
        assert!(leaf.is_subclass_of(&root));
        assert!(!mid.is_subclass_of(&leaf));

        // même nom, autre matérialisation → identité différente
        let other_mid = Arc::new(Class::from_image(ClassImage::new("a.Mid"), root));
        assert!(!leaf.is_subclass_of(&other_mid));
    }

    #[test]
    fn method_lookup_reports_declaring_class() {
        let reg = HostRegistry::new();
        let root = reg.root();
        let mut img = ClassImage::new("a.Base");
        img.methods.push(sable_core::image::MethodImage {
            name: "poke".into(),
            params: vec![],
            ret: TypeRef::Unit,
            body: Chunk::new(),
        });
        let base = Arc::new(Class::from_image(img, root));
        let mut img = ClassImage::new("a.Derived");
        img.super_fqn = "a.Base".into();
        let derived = Arc::new(Class::from_image(img, Arc::clone(&base)));

        let (decl, m) = derived.lookup_method("poke", 0).expect("héritée");
        assert_eq!(decl.name(), "a.Base");
        assert_eq!(m.name, "poke");
        assert!(derived.lookup_method("poke", 1).is_none());
    }
}
