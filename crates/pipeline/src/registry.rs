//! Operator registry: operator key → constructor.
//!
//! The registry is an ordinary value built at startup and injected into the
//! engine; there is no process-wide table. Static operators register a
//! factory closure, manifest-defined tool operators register through
//! [`OperatorRegistry::register_manifest`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::tool::{ToolHandlers, ToolManifest, ToolOperator};
use crate::{Operator, OperatorDescriptor, OperatorKey, RegistryError};

/// Constructor of a fresh operator instance.
pub type OperatorFactory = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

struct Registration {
    descriptor: OperatorDescriptor,
    factory: OperatorFactory,
}

/// Lookup table of every operator the engine may run.
#[derive(Default)]
pub struct OperatorRegistry {
    operators: BTreeMap<OperatorKey, Registration>,
}

impl OperatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under the key its operators declare.
    ///
    /// The factory is invoked once to read the descriptor. Registering the
    /// same key twice replaces the earlier entry with a warning.
    pub fn register<F, O>(&mut self, factory: F)
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: Operator + 'static,
    {
        self.register_factory(Arc::new(move || Box::new(factory()) as Box<dyn Operator>));
    }

    /// Registers a type-erased factory.
    pub fn register_factory(&mut self, factory: OperatorFactory) {
        let descriptor = factory().descriptor().clone();
        let key = descriptor.key.clone();
        if self.operators.contains_key(&key) {
            warn!(operator = %key, "Operator key registered twice, overwriting");
        }
        self.operators.insert(
            key,
            Registration {
                descriptor,
                factory,
            },
        );
    }

    /// Registers a tool operator described by `manifest`, resolving its
    /// handler against `handlers`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownHandler`] if the manifest's handler is not in
    /// the table.
    pub fn register_manifest(
        &mut self,
        manifest: ToolManifest,
        handlers: &ToolHandlers,
    ) -> Result<(), RegistryError> {
        let handler = handlers
            .get(&manifest.handler)
            .ok_or_else(|| RegistryError::UnknownHandler {
                key: manifest.key.clone(),
                handler: manifest.handler.clone(),
            })?;
        let descriptor = manifest.into_descriptor();
        info!(operator = %descriptor.key, "Registered tool operator");
        self.register_factory(Arc::new(move || {
            Box::new(ToolOperator::new(descriptor.clone(), Arc::clone(&handler))) as Box<dyn Operator>
        }));
        Ok(())
    }

    /// Parses and registers every manifest in `sources` (`(name, yaml)`).
    ///
    /// A broken manifest is logged and skipped; the rest still register.
    /// Returns the number of operators registered.
    pub fn register_manifests<'a, I>(&mut self, sources: I, handlers: &ToolHandlers) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut registered = 0;
        for (name, yaml) in sources {
            let result = ToolManifest::from_yaml(name, yaml)
                .and_then(|manifest| self.register_manifest(manifest, handlers));
            match result {
                Ok(()) => registered += 1,
                Err(err) => warn!(manifest = name, error = %err, "Failed to load tool manifest"),
            }
        }
        registered
    }

    /// Instantiates the operator registered under `key`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownOperator`] if no operator has that key.
    pub fn get_operator(&self, key: &str) -> Result<Box<dyn Operator>, RegistryError> {
        self.operators
            .get(key)
            .map(|registration| (registration.factory)())
            .ok_or_else(|| RegistryError::UnknownOperator {
                key: key.to_string(),
            })
    }

    /// Descriptor of the operator registered under `key`.
    pub fn descriptor(&self, key: &str) -> Option<&OperatorDescriptor> {
        self.operators.get(key).map(|registration| &registration.descriptor)
    }

    /// Descriptors of every registered operator, ordered by key.
    pub fn manifests(&self) -> Vec<OperatorDescriptor> {
        self.operators
            .values()
            .map(|registration| registration.descriptor.clone())
            .collect()
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.operators.contains_key(key)
    }

    /// Registered keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &OperatorKey> {
        self.operators.keys()
    }

    /// Number of registered operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .finish()
    }
}
