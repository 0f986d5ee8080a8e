//! Named-instance registry.
//!
//! Loaded units are published as long-lived instances under a derived name
//! (`demo.GreeterService` → `greeterService`) so other code can call them by
//! name. Publishing a new version replaces the old instance: the old one is
//! unregistered first, then the new one registered.

use std::collections::BTreeMap;

use hotload_types::name::bean_name;
use parking_lot::RwLock;
use tracing::info;

use crate::errors::RegistryError;
use crate::loader::ExecutableUnit;
use crate::value::{Instance, ObjectRef};

pub trait InstanceRegistry: Send + Sync {
    /// Instantiate `unit` with defaults and register it. Fails if the name
    /// is taken.
    fn register(&self, name: &str, unit: &ExecutableUnit) -> Result<ObjectRef, RegistryError> {
        let object = ObjectRef::new(Instance::with_defaults(unit.clone()));
        self.register_instance(name, object.clone())?;
        Ok(object)
    }

    fn register_instance(&self, name: &str, object: ObjectRef) -> Result<(), RegistryError>;

    /// Remove and return the instance registered under `name`.
    fn unregister(&self, name: &str) -> Option<ObjectRef>;

    fn contains(&self, name: &str) -> bool;

    fn get(&self, name: &str) -> Option<ObjectRef>;

    fn names(&self) -> Vec<String>;
}

/// In-process registry keeping one instance per name.
#[derive(Default)]
pub struct SingletonRegistry {
    instances: RwLock<BTreeMap<String, ObjectRef>>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

impl InstanceRegistry for SingletonRegistry {
    fn register_instance(&self, name: &str, object: ObjectRef) -> Result<(), RegistryError> {
        let mut instances = self.instances.write();
        if instances.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        instances.insert(name.to_string(), object);
        Ok(())
    }

    fn unregister(&self, name: &str) -> Option<ObjectRef> {
        self.instances.write().remove(name)
    }

    fn contains(&self, name: &str) -> bool {
        self.instances.read().contains_key(name)
    }

    fn get(&self, name: &str) -> Option<ObjectRef> {
        self.instances.read().get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }
}

/// Publish `unit` under its derived name, replacing any earlier instance.
/// Returns the name used.
pub fn publish(registry: &dyn InstanceRegistry, unit: &ExecutableUnit) -> Result<String, RegistryError> {
    let name = bean_name(unit.name());
    if let Some(previous) = registry.unregister(&name) {
        info!(
            name = %name,
            unit = %unit.name(),
            previous_loader = %previous.unit().loader().label(),
            "replacing published instance"
        );
    }
    registry.register(&name, unit)?;
    info!(name = %name, unit = %unit.name(), loader = %unit.loader().label(), "published");
    Ok(name)
}
