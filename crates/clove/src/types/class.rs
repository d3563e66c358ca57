//! The class registry.
//!
//! Every value belongs to exactly one built-in class; classes form a small
//! ancestry tree rooted at `Object` (`Long` and `Double` sit under the
//! abstract `Number`). The registry is built once at runtime init and is
//! consulted by `type?`, `instanceof?`, `cast` and instance-method
//! dispatch.

use ahash::AHashMap;
use strum::{Display, IntoStaticStr};

use crate::intern::{SymbolId, Symbols};

/// The built-in class a value belongs to, stored in every object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ClassKind {
    Object,
    Bool,
    Number,
    Long,
    Double,
    String,
    Symbol,
    Pair,
    Null,
    Array,
    Set,
    Map,
    Error,
    Procedure,
    Lambda,
    NativeProcedure,
    Macro,
    Script,
    Module,
    Class,
    Field,
    Observable,
}

/// Index into the class registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u16);

impl ClassId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named slot of a built-in class, exposed through introspection.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: SymbolId,
    pub index: u16,
}

/// One entry in the registry.
#[derive(Debug, Clone)]
pub struct Class {
    pub name: SymbolId,
    pub parent: Option<ClassId>,
    pub kind: Option<ClassKind>,
    pub fields: Vec<Field>,
}

/// Registry of all classes, looked up by name or by kind.
#[derive(Debug)]
pub struct ClassRegistry {
    classes: Vec<Class>,
    by_name: AHashMap<SymbolId, ClassId>,
    by_kind: AHashMap<ClassKind, ClassId>,
}

impl ClassRegistry {
    /// Builds the registry with the full built-in hierarchy.
    #[must_use]
    pub fn bootstrap(syms: &mut Symbols) -> Self {
        let mut registry = Self {
            classes: Vec::new(),
            by_name: AHashMap::new(),
            by_kind: AHashMap::new(),
        };

        let object = registry.define(syms, "Object", None, Some(ClassKind::Object), vec![]);
        let number = registry.define(syms, "Number", Some(object), Some(ClassKind::Number), vec![]);
        registry.define(syms, "Long", Some(number), Some(ClassKind::Long), vec![]);
        registry.define(syms, "Double", Some(number), Some(ClassKind::Double), vec![]);
        registry.define(syms, "Bool", Some(object), Some(ClassKind::Bool), vec![]);
        registry.define(syms, "String", Some(object), Some(ClassKind::String), vec![]);
        registry.define(syms, "Symbol", Some(object), Some(ClassKind::Symbol), vec![]);
        let car = syms.intern("car");
        let cdr = syms.intern("cdr");
        registry.define(
            syms,
            "Pair",
            Some(object),
            Some(ClassKind::Pair),
            vec![Field { name: car, index: 0 }, Field { name: cdr, index: 1 }],
        );
        registry.define(syms, "Null", Some(object), Some(ClassKind::Null), vec![]);
        registry.define(syms, "Array", Some(object), Some(ClassKind::Array), vec![]);
        registry.define(syms, "Set", Some(object), Some(ClassKind::Set), vec![]);
        registry.define(syms, "Map", Some(object), Some(ClassKind::Map), vec![]);
        let message = syms.intern("message");
        registry.define(
            syms,
            "Error",
            Some(object),
            Some(ClassKind::Error),
            vec![Field {
                name: message,
                index: 0,
            }],
        );
        let procedure = registry.define(syms, "Procedure", Some(object), Some(ClassKind::Procedure), vec![]);
        registry.define(syms, "Lambda", Some(procedure), Some(ClassKind::Lambda), vec![]);
        registry.define(
            syms,
            "NativeProcedure",
            Some(procedure),
            Some(ClassKind::NativeProcedure),
            vec![],
        );
        registry.define(syms, "Macro", Some(object), Some(ClassKind::Macro), vec![]);
        registry.define(syms, "Script", Some(object), Some(ClassKind::Script), vec![]);
        registry.define(syms, "Module", Some(object), Some(ClassKind::Module), vec![]);
        registry.define(syms, "Class", Some(object), Some(ClassKind::Class), vec![]);
        registry.define(syms, "Field", Some(object), Some(ClassKind::Field), vec![]);
        registry.define(syms, "Observable", Some(object), Some(ClassKind::Observable), vec![]);

        registry
    }

    fn define(
        &mut self,
        syms: &mut Symbols,
        name: &str,
        parent: Option<ClassId>,
        kind: Option<ClassKind>,
        fields: Vec<Field>,
    ) -> ClassId {
        let name = syms.intern(name);
        let id = ClassId(u16::try_from(self.classes.len()).expect("class registry exceeded u16 range"));
        self.classes.push(Class {
            name,
            parent,
            kind,
            fields,
        });
        self.by_name.insert(name, id);
        if let Some(kind) = kind {
            self.by_kind.insert(kind, id);
        }
        id
    }

    #[must_use]
    pub fn lookup(&self, name: SymbolId) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    /// # Panics
    /// Panics if the id did not come from this registry.
    #[must_use]
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    /// The registry entry for a built-in kind.
    ///
    /// # Panics
    /// Panics if the kind was not registered at bootstrap (a bug).
    #[must_use]
    pub fn of_kind(&self, kind: ClassKind) -> ClassId {
        *self.by_kind.get(&kind).expect("class kind missing from bootstrap")
    }

    /// Walks the parent chain checking whether `child` is `ancestor` or one
    /// of its descendants.
    #[must_use]
    pub fn is_subclass(&self, child: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(child);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.class(id).parent;
        }
        false
    }

    /// Iterates all classes in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_is_a_number_and_an_object() {
        let mut syms = Symbols::new();
        let registry = ClassRegistry::bootstrap(&mut syms);
        let long = registry.of_kind(ClassKind::Long);
        let number = registry.of_kind(ClassKind::Number);
        let object = registry.of_kind(ClassKind::Object);
        let string = registry.of_kind(ClassKind::String);
        assert!(registry.is_subclass(long, number));
        assert!(registry.is_subclass(long, object));
        assert!(!registry.is_subclass(long, string));
        assert!(!registry.is_subclass(number, long));
    }

    #[test]
    fn lookup_by_name() {
        let mut syms = Symbols::new();
        let registry = ClassRegistry::bootstrap(&mut syms);
        let name = syms.intern("Lambda");
        let id = registry.lookup(name).unwrap();
        assert_eq!(registry.class(id).kind, Some(ClassKind::Lambda));
        let procedure = registry.of_kind(ClassKind::Procedure);
        assert!(registry.is_subclass(id, procedure));
    }

    #[test]
    fn pair_fields_are_described() {
        let mut syms = Symbols::new();
        let registry = ClassRegistry::bootstrap(&mut syms);
        let pair = registry.of_kind(ClassKind::Pair);
        let fields = &registry.class(pair).fields;
        assert_eq!(fields.len(), 2);
        assert_eq!(syms.name(fields[0].name), "car");
        assert_eq!(syms.name(fields[1].name), "cdr");
    }
}
