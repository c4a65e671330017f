//! value.rs — Valeurs dynamiques et instances.
//!
//! Les instances sont partagées par `Rc` (un interpréteur vit dans un seul
//! thread, comme le chargeur qu'il tient) ; l'égalité d'objets est
//! l'identité, comme pour les classes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use ahash::AHashMap;
use sable_core::image::TypeRef;

use crate::class::Class;

/// Valeur à l'exécution.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Obj(Rc<Instance>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Rc<Instance>> {
        match self {
            Value::Obj(o) => Some(o),
            _ => None,
        }
    }

    /// Égalité à la `==` du langage : structurelle pour les scalaires,
    /// identité pour les objets, variantes différentes jamais égales.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::I64(a), Value::F64(b)) | (Value::F64(b), Value::I64(a)) => *a as f64 == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I64(i) => write!(f, "{i}"),
            Value::F64(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::Obj(o) => write!(f, "<{}>", o.class().name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

/// Une instance : sa classe + l'état de ses champs (les siens et ceux
/// hérités), initialisés à leurs défauts à l'allocation.
pub struct Instance {
    class: Arc<Class>,
    fields: RefCell<AHashMap<String, Value>>,
}

impl Instance {
    /// Alloue l'instance avec les défauts de champ : 0 / 0.0 / false pour
    /// les primitifs numériques et booléens, `null` pour `str` et les
    /// types classes.
    pub fn new(class: Arc<Class>) -> Self {
        let mut fields = AHashMap::new();
        for f in class.all_fields() {
            fields.insert(f.name.clone(), default_for(&f.ty));
        }
        Self { class, fields: RefCell::new(fields) }
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Lit un champ ; `None` si la classe ne le déclare nulle part.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    /// Écrit un champ existant ; `false` si inconnu de la classe.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut fields = self.fields.borrow_mut();
        match fields.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance<{}>", self.class.name())
    }
}

fn default_for(ty: &TypeRef) -> Value {
    match ty {
        TypeRef::Int => Value::I64(0),
        TypeRef::Float => Value::F64(0.0),
        TypeRef::Bool => Value::Bool(false),
        _ => Value::Null,
    }
}

/* -------------------------------- Tests -------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRegistry;
    use sable_core::image::{ClassImage, FieldImage};

    #[test]
    fn fields_default_then_set() {
        let reg = HostRegistry::new();
        let mut img = ClassImage::new("t.P");
        img.fields.push(FieldImage { name: "x".into(), ty: TypeRef::Int });
        img.fields.push(FieldImage { name: "label".into(), ty: TypeRef::Str });
        let class = Arc::new(Class::from_image(img, reg.root()));

        let inst = Instance::new(class);
        assert!(inst.get("x").expect("déclaré").loose_eq(&Value::I64(0)));
        assert!(inst.get("label").expect("déclaré").loose_eq(&Value::Null));
        assert!(inst.set("x", Value::I64(7)));
        assert!(inst.get("x").expect("déclaré").loose_eq(&Value::I64(7)));
        assert!(!inst.set("ghost", Value::Null));
        assert!(inst.get("ghost").is_none());
    }

    #[test]
    fn loose_eq_objects_by_identity() {
        let reg = HostRegistry::new();
        let class = Arc::new(Class::from_image(ClassImage::new("t.O"), reg.root()));
        let a = Rc::new(Instance::new(Arc::clone(&class)));
        let b = Rc::new(Instance::new(class));
        let va = Value::Obj(Rc::clone(&a));
        assert!(va.loose_eq(&Value::Obj(a)));
        assert!(!va.loose_eq(&Value::Obj(b)));
        assert!(!va.loose_eq(&Value::Null));
    }
}
