//! host.rs — Registre des classes visibles du **processus hôte**.
//!
//! C'est le « classpath » : la chaîne parente de tout chargeur isolé, et la
//! vue injectée dans le service de compilation pour que les fragments
//! puissent référencer des types hôtes. Pré-chargé avec la classe racine
//! `sable.Object` ; l'hôte y enregistre ses classes natives (corps Rust).

use std::sync::Arc;

use ahash::AHashMap;
use log::debug;
use parking_lot::RwLock;

use sable_core::image::TypeRef;
use sable_core::ROOT_CLASS;

use crate::class::{Body, Class, Ctor, Field, Method};
use crate::loader::{Loader, ResolveError};
use crate::value::Value;
use crate::interp::ExecError;

/// Corps natif : `this` + arguments → résultat. Les constructeurs natifs
/// ignorent leur valeur de retour.
pub type NativeFn = fn(&Value, &[Value]) -> Result<Value, ExecError>;

/// Registre process-wide des classes hôtes. Partageable entre threads
/// (contrairement aux chargeurs isolés, qui restent confinés).
pub struct HostRegistry {
    classes: RwLock<AHashMap<String, Arc<Class>>>,
    root: Arc<Class>,
}

impl HostRegistry {
    /// Crée le registre, racine comprise : `sable.Object`, sans champ ni
    /// méthode, un constructeur natif sans argument (no-op).
    pub fn new() -> Arc<Self> {
        let root = Arc::new(Class::from_parts(
            ROOT_CLASS.to_string(),
            None,
            Vec::new(),
            vec![Arc::new(Ctor { params: Vec::new(), body: Body::Native(|_, _| Ok(Value::Null)) })],
            Vec::new(),
        ));
        let mut classes = AHashMap::new();
        classes.insert(ROOT_CLASS.to_string(), Arc::clone(&root));
        Arc::new(Self { classes: RwLock::new(classes), root })
    }

    /// La classe racine.
    pub fn root(&self) -> Arc<Class> {
        Arc::clone(&self.root)
    }

    /// Enregistre une classe hôte sous son FQN. Remplace silencieusement.
    pub fn register(&self, class: Arc<Class>) {
        debug!("classe hôte enregistrée: {}", class.name());
        self.classes.write().insert(class.name().to_string(), class);
    }

    /// Nombre de classes visibles (racine comprise).
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        false // la racine est toujours là
    }
}

impl Loader for HostRegistry {
    fn resolve(&self, fqn: &str) -> Result<Arc<Class>, ResolveError> {
        self.classes
            .read()
            .get(fqn)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(fqn.to_string()))
    }
}

impl sable_compiler::Classpath for HostRegistry {
    fn contains(&self, fqn: &str) -> bool {
        self.classes.read().contains_key(fqn)
    }
}

/// Construction fluide d'une classe native hôte.
pub struct ClassBuilder {
    fqn: String,
    superclass: Arc<Class>,
    fields: Vec<Field>,
    ctors: Vec<Arc<Ctor>>,
    methods: Vec<Arc<Method>>,
}

impl ClassBuilder {
    pub fn new(fqn: impl Into<String>, superclass: Arc<Class>) -> Self {
        Self {
            fqn: fqn.into(),
            superclass,
            fields: Vec::new(),
            ctors: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.fields.push(Field { name: name.into(), ty });
        self
    }

    pub fn native_ctor(mut self, params: Vec<TypeRef>, f: NativeFn) -> Self {
        self.ctors.push(Arc::new(Ctor { params, body: Body::Native(f) }));
        self
    }

    pub fn native_method(
        mut self,
        name: impl Into<String>,
        params: Vec<TypeRef>,
        ret: TypeRef,
        f: NativeFn,
    ) -> Self {
        self.methods.push(Arc::new(Method {
            name: name.into(),
            params,
            ret,
            body: Body::Native(f),
        }));
        self
    }

    /// Finalise. Sans constructeur déclaré, un constructeur natif no-op
    /// sans argument est ajouté (défaut implicite, comme côté compilé).
    pub fn build(mut self) -> Arc<Class> {
        if self.ctors.is_empty() {
            self.ctors.push(Arc::new(Ctor {
                params: Vec::new(),
                body: Body::Native(|_, _| Ok(Value::Null)),
            }));
        }
        Arc::new(Class::from_parts(
            self.fqn,
            Some(self.superclass),
            self.fields,
            self.ctors,
            self.methods,
        ))
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use sable_compiler::Classpath;

    #[test]
    fn registry_seeds_root() {
        let reg = HostRegistry::new();
        assert_eq!(reg.len(), 1);
        let root = reg.resolve(ROOT_CLASS).expect("racine");
        assert!(root.superclass().is_none());
        assert_eq!(root.declared_ctors().len(), 1);
        assert!(root.declared_methods().is_empty());
        assert!(Arc::ptr_eq(&root, &reg.root()));
    }

    #[test]
    fn registry_is_a_classpath_view() {
        let reg = HostRegistry::new();
        assert!(reg.contains(ROOT_CLASS));
        assert!(!reg.contains("foo.bar.Bar"));
        let bar = ClassBuilder::new("foo.bar.Bar", reg.root()).build();
        reg.register(bar);
        assert!(reg.contains("foo.bar.Bar"));
    }

    #[test]
    fn builder_adds_default_ctor() {
        let reg = HostRegistry::new();
        let c = ClassBuilder::new("h.C", reg.root())
            .field("n", TypeRef::Int)
            .native_method("zero", vec![], TypeRef::Int, |_, _| Ok(Value::I64(0)))
            .build();
        assert_eq!(c.declared_ctors().len(), 1);
        assert_eq!(c.declared_fields().len(), 1);
        assert!(c.lookup_method("zero", 0).is_some());
    }
}
