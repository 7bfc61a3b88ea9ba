use std::sync::Arc;

use armgate_core::{Classification, ErrorKind, OperationInfo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::operation::{Operation, OperationError, OperationHandler};

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Registration failure, returned synchronously to startup code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("operation already registered: {name}")]
    Duplicate { name: String },
    #[error("registration closed, server already started: {name}")]
    Closed { name: String },
}

impl RegistryError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Duplicate { .. } => ErrorKind::DuplicateOperation,
            Self::Closed { .. } => ErrorKind::InvalidRequest,
        }
    }
}

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Catalog {
    /// Registration order, for deterministic listings.
    order: Vec<String>,
    sealed: bool,
}

/// Name → operation table.
///
/// Populated before the server starts, then sealed. Lookups are lock-free
/// reads on a `DashMap` and safe from any number of request tasks.
///
/// Lock order: `catalog` before any `operations` shard.
pub struct OperationRegistry {
    operations: DashMap<String, Operation>,
    catalog: RwLock<Catalog>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
            catalog: RwLock::new(Catalog::default()),
        }
    }

    /// Registers `handler` under `name`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Duplicate` if `name` is already registered
    /// - `RegistryError::Closed` if the registry has been sealed
    pub fn register<H: OperationHandler>(
        &self,
        name: &str,
        classification: Classification,
        handler: H,
    ) -> Result<(), RegistryError> {
        let mut catalog = self.catalog.write();
        if catalog.sealed {
            return Err(RegistryError::Closed {
                name: name.to_string(),
            });
        }

        match self.operations.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate {
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Operation {
                    name: Arc::from(name),
                    classification,
                    handler: Arc::new(handler),
                });
                catalog.order.push(name.to_string());
                debug!(operation = name, classification = classification.as_str(), "operation registered");
                Ok(())
            }
        }
    }

    /// Looks up an operation by exact name.
    ///
    /// # Errors
    ///
    /// `OperationError::UnknownOperation` if nothing is registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<Operation, OperationError> {
        self.operations
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OperationError::UnknownOperation {
                name: name.to_string(),
            })
    }

    /// Refuses any further registration.
    pub fn seal(&self) {
        self.catalog.write().sealed = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.catalog.read().sealed
    }

    /// Registered operations in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<OperationInfo> {
        self.catalog
            .read()
            .order
            .iter()
            .filter_map(|name| {
                self.operations.get(name).map(|op| OperationInfo {
                    name: name.clone(),
                    classification: op.classification,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use armgate_core::{Arguments, Value};

    use super::*;
    use crate::service::operation::{DomainError, HandlerContext, HandlerResult};

    async fn noop(_ctx: HandlerContext, _args: Arguments) -> HandlerResult {
        Ok(Value::Nil)
    }

    async fn refuse(_ctx: HandlerContext, _args: Arguments) -> HandlerResult {
        Err(DomainError::new("nope"))
    }

    #[test]
    fn register_then_lookup() {
        let registry = OperationRegistry::new();
        registry
            .register("calibrate", Classification::Foreground, noop)
            .unwrap();

        let op = registry.lookup("calibrate").unwrap();
        assert_eq!(&*op.name, "calibrate");
        assert_eq!(op.classification, Classification::Foreground);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected_and_original_kept() {
        let registry = OperationRegistry::new();
        registry
            .register("calibrate", Classification::Foreground, noop)
            .unwrap();

        let err = registry
            .register("calibrate", Classification::Background, refuse)
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                name: "calibrate".into()
            }
        );
        assert_eq!(err.kind(), ErrorKind::DuplicateOperation);
        assert_eq!(
            registry.lookup("calibrate").unwrap().classification,
            Classification::Foreground
        );
    }

    #[test]
    fn unknown_lookup_fails() {
        let registry = OperationRegistry::new();
        let err = registry.lookup("does_not_exist").unwrap_err();
        assert!(matches!(err, OperationError::UnknownOperation { name } if name == "does_not_exist"));
    }

    #[test]
    fn names_are_case_sensitive() {
        let registry = OperationRegistry::new();
        registry
            .register("Calibrate", Classification::Foreground, noop)
            .unwrap();
        assert!(registry.lookup("calibrate").is_err());
    }

    #[test]
    fn sealed_registry_refuses_registration() {
        let registry = OperationRegistry::new();
        registry.seal();
        assert!(registry.is_sealed());

        let err = registry
            .register("late", Classification::Background, noop)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Closed { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn names_preserve_registration_order() {
        let registry = OperationRegistry::new();
        registry.register("b", Classification::Background, noop).unwrap();
        registry.register("a", Classification::Foreground, noop).unwrap();

        let names = registry.names();
        assert_eq!(
            names,
            vec![
                OperationInfo {
                    name: "b".into(),
                    classification: Classification::Background
                },
                OperationInfo {
                    name: "a".into(),
                    classification: Classification::Foreground
                },
            ]
        );
    }

    #[test]
    fn listing_while_registering_from_other_threads() {
        let registry = Arc::new(OperationRegistry::new());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        registry
                            .register(&format!("op_{t}_{i}"), Classification::Background, noop)
                            .unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let _ = registry.names();
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(registry.names().len(), 800);
    }

    #[test]
    fn seal_races_are_all_or_nothing() {
        let registry = Arc::new(OperationRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                (0..500)
                    .filter(|i| {
                        registry
                            .register(&format!("op_{i}"), Classification::Background, noop)
                            .is_ok()
                    })
                    .count()
            })
        };
        registry.seal();
        let accepted = writer.join().unwrap();

        // Every accepted registration is listed; nothing lands after the seal.
        assert_eq!(registry.names().len(), accepted);
        assert_eq!(registry.len(), accepted);
        assert!(registry
            .register("late", Classification::Background, noop)
            .is_err());
    }
}
