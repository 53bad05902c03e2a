//! YAML strategy configuration.
//!
//! The file deserializes into plain structs; remediator payloads stay as
//! raw YAML values until a registry factory turns them into concrete
//! remediators. Shape:
//!
//! ```yaml
//! strategies:
//!   - namespaces: [foo, bar]
//!     nodeSelector:
//!       pool: batch
//!     remediators:
//!       - autoScalingGroup:
//!           names: [workers-a]
//!           maxMachineIncrement: 5
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::Error;
use crate::registry::{
    PredicateRegistry, RemediatorRegistry, NAMESPACE_PREDICATE, NODE_SELECTOR_PREDICATE,
};
use crate::strategy::Strategy;

/// Top-level configuration file
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Strategies in evaluation order
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

/// One strategy entry: optional predicates plus an ordered remediator list
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    /// Namespaces the strategy is responsible for (unordered)
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Node-selector labels a pod must declare
    #[serde(default)]
    pub node_selector: Option<BTreeMap<String, String>>,
    /// Remediators in invocation order; each entry is a single-key map of
    /// registered name to name-specific configuration
    #[serde(default)]
    pub remediators: Vec<BTreeMap<String, Value>>,
}

impl Config {
    /// Parse a configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(|e| Error::config(format!("error parsing config: {e}")))
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("error loading config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Resolve every strategy against the registries, producing runnable
    /// [`Strategy`] values. Unknown predicate or remediator names are fatal.
    pub fn build_strategies(
        &self,
        predicates: &PredicateRegistry,
        remediators: &RemediatorRegistry,
    ) -> Result<Vec<Strategy>, Error> {
        self.strategies
            .iter()
            .map(|config| config.build(predicates, remediators))
            .collect()
    }
}

impl StrategyConfig {
    fn build(
        &self,
        predicates: &PredicateRegistry,
        remediators: &RemediatorRegistry,
    ) -> Result<Strategy, Error> {
        let mut gates = Vec::new();

        if !self.namespaces.is_empty() {
            let factory = predicates.lookup(NAMESPACE_PREDICATE)?;
            let value = serde_yaml::to_value(&self.namespaces)
                .map_err(|e| Error::config(e.to_string()))?;
            gates.push(factory(&value)?);
        }

        if let Some(selector) = &self.node_selector {
            let factory = predicates.lookup(NODE_SELECTOR_PREDICATE)?;
            let value =
                serde_yaml::to_value(selector).map_err(|e| Error::config(e.to_string()))?;
            gates.push(factory(&value)?);
        }

        let mut built = Vec::new();
        for entry in &self.remediators {
            let mut fields = entry.iter();
            let (name, value) = fields
                .next()
                .ok_or_else(|| Error::config("empty remediator entry"))?;
            if fields.next().is_some() {
                return Err(Error::config(
                    "remediator entries must hold exactly one name",
                ));
            }
            let factory = remediators.lookup(name)?;
            built.push(factory(value)?);
        }

        Strategy::new(gates, built)
    }
}
