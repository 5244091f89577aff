//! Object catalog: views, sequences, triggers
//!
//! Non-table schema objects live in one persistent catalog area. They
//! are created and dropped through the session's DDL surface, take part
//! in namespace-conflict detection like tables do, and are published to
//! the catalog only when their transaction commits.
//!
//! Sequences are non-transactional, as in SQL: `next_value` advances and
//! persists immediately, and values consumed by a rolled-back
//! transaction are not reissued.

use dashmap::DashMap;
use lattice_core::{Error, ObjectName, ObjectType, Result};
use lattice_store::{Area, AreaId, AreaStore, StoreLatchGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A named view: column list plus the definition text the external
/// planner compiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDef {
    /// View name
    pub name: ObjectName,
    /// Output column names
    pub columns: Vec<String>,
    /// Definition text (opaque to the core)
    pub definition: String,
}

/// A sequence generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDef {
    /// Sequence name
    pub name: ObjectName,
    /// First value
    pub start: i64,
    /// Step per call
    pub increment: i64,
    /// Lower bound when cycling
    pub min_value: i64,
    /// Upper bound
    pub max_value: i64,
    /// Wrap at the bounds instead of failing
    pub cycle: bool,
}

impl SequenceDef {
    /// Ascending sequence `1, 2, 3, ...`.
    pub fn simple(name: ObjectName) -> Self {
        SequenceDef {
            name,
            start: 1,
            increment: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
        }
    }
}

/// Which row changes fire a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerOn {
    /// Row additions
    Insert,
    /// Row updates
    Update,
    /// Row removals
    Delete,
    /// Any change
    Any,
}

/// A trigger registration: which table, which changes. The handler body
/// is registered at runtime on the event dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDef {
    /// Trigger name
    pub name: ObjectName,
    /// Watched table
    pub table: ObjectName,
    /// Watched change kind
    pub on: TriggerOn,
}

/// Any catalog object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogObject {
    /// A view definition
    View(ViewDef),
    /// A sequence with its current value
    Sequence {
        /// The definition
        def: SequenceDef,
        /// Next value to hand out
        current: i64,
    },
    /// A trigger definition
    Trigger(TriggerDef),
}

impl CatalogObject {
    /// The object's type tag.
    pub fn object_type(&self) -> ObjectType {
        match self {
            CatalogObject::View(_) => ObjectType::View,
            CatalogObject::Sequence { .. } => ObjectType::Sequence,
            CatalogObject::Trigger(_) => ObjectType::Trigger,
        }
    }

    /// The object's name.
    pub fn name(&self) -> &ObjectName {
        match self {
            CatalogObject::View(v) => &v.name,
            CatalogObject::Sequence { def, .. } => &def.name,
            CatalogObject::Trigger(t) => &t.name,
        }
    }
}

/// A catalog edit staged by a session's DDL and applied when its
/// transaction commits.
#[derive(Debug, Clone)]
pub enum CatalogChange {
    /// Install the object
    Create(CatalogObject),
    /// Remove the named object
    Drop(ObjectType, ObjectName),
}

/// Persistent catalog of non-table objects, keyed by `(type, name)`.
pub struct Catalog {
    store: Arc<dyn AreaStore>,
    area: Area,
    objects: DashMap<(ObjectType, ObjectName), CatalogObject>,
}

impl Catalog {
    /// Allocate an empty catalog.
    pub fn create(store: Arc<dyn AreaStore>) -> Result<Catalog> {
        let area = store.create_area(0)?;
        let catalog = Catalog {
            store,
            area,
            objects: DashMap::new(),
        };
        catalog.persist()?;
        Ok(catalog)
    }

    /// Load the catalog from its area.
    pub fn open(store: Arc<dyn AreaStore>, area_id: AreaId) -> Result<Catalog> {
        let area = store.get_area(area_id, true)?;
        let entries: Vec<CatalogObject> = bincode::deserialize(&area.read_all())?;
        let objects = DashMap::new();
        for obj in entries {
            objects.insert((obj.object_type(), obj.name().clone()), obj);
        }
        Ok(Catalog {
            store,
            area,
            objects,
        })
    }

    /// The catalog's own area id (stored in the database root).
    pub fn area_id(&self) -> AreaId {
        self.area.id()
    }

    /// Look up an object.
    pub fn get(&self, object_type: ObjectType, name: &ObjectName) -> Option<CatalogObject> {
        self.objects
            .get(&(object_type, name.clone()))
            .map(|o| o.clone())
    }

    /// Whether `(type, name)` exists.
    pub fn contains(&self, object_type: ObjectType, name: &ObjectName) -> bool {
        self.objects.contains_key(&(object_type, name.clone()))
    }

    /// Install an object (commit publish path).
    pub fn insert(&self, object: CatalogObject) {
        self.objects
            .insert((object.object_type(), object.name().clone()), object);
    }

    /// Remove an object (commit publish path).
    pub fn remove(&self, object_type: ObjectType, name: &ObjectName) -> Result<CatalogObject> {
        self.objects
            .remove(&(object_type, name.clone()))
            .map(|(_, o)| o)
            .ok_or_else(|| Error::NotFound(format!("{object_type} '{name}'")))
    }

    /// All objects, sorted by `(type, name)` for deterministic listings.
    pub fn list(&self) -> Vec<CatalogObject> {
        let mut all: Vec<CatalogObject> = self.objects.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| {
            (format!("{}", a.object_type()), a.name())
                .cmp(&(format!("{}", b.object_type()), b.name()))
        });
        all
    }

    /// Advance a sequence and durably record the new position before the
    /// value is handed out. Values consumed by rolled-back transactions
    /// stay consumed.
    pub fn sequence_next(&self, name: &ObjectName) -> Result<i64> {
        let value = {
            let mut entry = self
                .objects
                .get_mut(&(ObjectType::Sequence, name.clone()))
                .ok_or_else(|| Error::NotFound(format!("sequence '{name}'")))?;
            let CatalogObject::Sequence { def, current } = entry.value_mut() else {
                return Err(Error::InvalidState(format!(
                    "catalog entry '{name}' is not a sequence"
                )));
            };
            let value = *current;
            if def.increment >= 0 && value > def.max_value
                || def.increment < 0 && value < def.min_value
            {
                return Err(Error::InvalidState(format!(
                    "sequence '{name}' is exhausted"
                )));
            }
            let next = value.saturating_add(def.increment);
            *current = if def.cycle {
                if next > def.max_value {
                    def.min_value
                } else if next < def.min_value {
                    def.max_value
                } else {
                    next
                }
            } else {
                next
            };
            value
        };
        let _latch = StoreLatchGuard::acquire(&*self.store);
        self.persist()?;
        self.store.flush()?;
        Ok(value)
    }

    /// Serialize the catalog into its area.
    pub fn persist(&self) -> Result<()> {
        let mut entries: Vec<CatalogObject> = self.objects.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        self.area.replace(&bincode::serialize(&entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_store::MemoryStore;

    fn store() -> Arc<dyn AreaStore> {
        Arc::new(MemoryStore::new())
    }

    fn name(n: &str) -> ObjectName {
        ObjectName::new("app", n)
    }

    #[test]
    fn catalog_roundtrip() {
        let st = store();
        let catalog = Catalog::create(st.clone()).unwrap();
        catalog.insert(CatalogObject::View(ViewDef {
            name: name("v_orders"),
            columns: vec!["id".into(), "total".into()],
            definition: "SELECT id, total FROM orders".into(),
        }));
        catalog.insert(CatalogObject::Sequence {
            def: SequenceDef::simple(name("s_ids")),
            current: 7,
        });
        catalog.persist().unwrap();

        let reopened = Catalog::open(st, catalog.area_id()).unwrap();
        assert!(reopened.contains(ObjectType::View, &name("v_orders")));
        match reopened.get(ObjectType::Sequence, &name("s_ids")).unwrap() {
            CatalogObject::Sequence { current, .. } => assert_eq!(current, 7),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(reopened.list().len(), 2);
    }

    #[test]
    fn sequence_advances_and_persists() {
        let st = store();
        let catalog = Catalog::create(st.clone()).unwrap();
        catalog.insert(CatalogObject::Sequence {
            def: SequenceDef::simple(name("s")),
            current: 1,
        });
        assert_eq!(catalog.sequence_next(&name("s")).unwrap(), 1);
        assert_eq!(catalog.sequence_next(&name("s")).unwrap(), 2);

        let reopened = Catalog::open(st, catalog.area_id()).unwrap();
        assert_eq!(reopened.sequence_next(&name("s")).unwrap(), 3);
    }

    #[test]
    fn cycling_sequence_wraps() {
        let catalog = Catalog::create(store()).unwrap();
        catalog.insert(CatalogObject::Sequence {
            def: SequenceDef {
                name: name("c"),
                start: 1,
                increment: 1,
                min_value: 1,
                max_value: 3,
                cycle: true,
            },
            current: 3,
        });
        assert_eq!(catalog.sequence_next(&name("c")).unwrap(), 3);
        assert_eq!(catalog.sequence_next(&name("c")).unwrap(), 1);
    }

    #[test]
    fn exhausted_sequence_fails() {
        let catalog = Catalog::create(store()).unwrap();
        catalog.insert(CatalogObject::Sequence {
            def: SequenceDef {
                name: name("x"),
                start: 1,
                increment: 1,
                min_value: 1,
                max_value: 2,
                cycle: false,
            },
            current: 1,
        });
        assert_eq!(catalog.sequence_next(&name("x")).unwrap(), 1);
        assert_eq!(catalog.sequence_next(&name("x")).unwrap(), 2);
        assert!(catalog.sequence_next(&name("x")).is_err());
    }

    #[test]
    fn missing_objects_are_not_found() {
        let catalog = Catalog::create(store()).unwrap();
        assert!(matches!(
            catalog.remove(ObjectType::View, &name("ghost")),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            catalog.sequence_next(&name("ghost")),
            Err(Error::NotFound(_))
        ));
    }
}
