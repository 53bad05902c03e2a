//! Name-indexed factories for predicates and remediators.
//!
//! Both registries are plain values: the entrypoint creates them, registers
//! what it wants available, and hands them to the config loader. Nothing
//! here is process-global. Built-in predicates are seeded lazily on first
//! lookup; remediators are registered explicitly because their factories
//! close over live client handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_yaml::Value;

use crate::error::Error;
use crate::predicate::{NamespacePredicate, NodeSelectorPredicate, PodPredicate};
use crate::remediator::Remediator;

/// Builds a predicate from its YAML payload
pub type PredicateFactory = Arc<dyn Fn(&Value) -> Result<PodPredicate, Error> + Send + Sync>;

/// Builds a remediator from its YAML payload
pub type RemediatorFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Remediator>, Error> + Send + Sync>;

/// Name of the built-in namespace predicate
pub const NAMESPACE_PREDICATE: &str = "namespace";

/// Name of the built-in node-selector predicate
pub const NODE_SELECTOR_PREDICATE: &str = "nodeSelector";

struct PredicateInner {
    seeded: bool,
    factories: HashMap<String, PredicateFactory>,
}

/// Thread-safe registry of predicate factories.
pub struct PredicateRegistry {
    inner: Mutex<PredicateInner>,
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateRegistry {
    /// Create an empty registry; built-ins appear on first lookup
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PredicateInner {
                seeded: false,
                factories: HashMap::new(),
            }),
        }
    }

    /// Register a factory under a name; errors if the name is taken
    pub fn register(&self, name: &str, factory: PredicateFactory) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("predicate registry lock poisoned");
        if inner.factories.contains_key(name) {
            return Err(Error::config(format!("predicate {name} already registered")));
        }
        inner.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Fetch a factory by name; errors if the name is unknown
    pub fn lookup(&self, name: &str) -> Result<PredicateFactory, Error> {
        let mut inner = self.inner.lock().expect("predicate registry lock poisoned");
        if !inner.seeded {
            seed_builtins(&mut inner.factories);
            inner.seeded = true;
        }
        inner
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("{name} is an unknown predicate")))
    }
}

fn seed_builtins(factories: &mut HashMap<String, PredicateFactory>) {
    factories
        .entry(NAMESPACE_PREDICATE.to_string())
        .or_insert_with(|| {
            Arc::new(|value| {
                let predicate: NamespacePredicate = serde_yaml::from_value(value.clone())
                    .map_err(|e| Error::config(format!("namespace predicate: {e}")))?;
                Ok(PodPredicate::Namespace(predicate))
            })
        });
    factories
        .entry(NODE_SELECTOR_PREDICATE.to_string())
        .or_insert_with(|| {
            Arc::new(|value| {
                let predicate: NodeSelectorPredicate = serde_yaml::from_value(value.clone())
                    .map_err(|e| Error::config(format!("nodeSelector predicate: {e}")))?;
                Ok(PodPredicate::NodeSelector(predicate))
            })
        });
}

/// Thread-safe registry of remediator factories.
#[derive(Default)]
pub struct RemediatorRegistry {
    factories: Mutex<HashMap<String, RemediatorFactory>>,
}

impl RemediatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a name; errors if the name is taken
    pub fn register(&self, name: &str, factory: RemediatorFactory) -> Result<(), Error> {
        let mut factories = self
            .factories
            .lock()
            .expect("remediator registry lock poisoned");
        if factories.contains_key(name) {
            return Err(Error::config(format!(
                "remediator {name} already registered"
            )));
        }
        factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Fetch a factory by name; errors if the name is unknown
    pub fn lookup(&self, name: &str) -> Result<RemediatorFactory, Error> {
        let factories = self
            .factories
            .lock()
            .expect("remediator registry lock poisoned");
        factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("{name} is not a registered remediator")))
    }
}
