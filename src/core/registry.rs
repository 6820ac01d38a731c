//! Resource handle registry - shared, write-once store of step outputs

use crate::core::handle::{Address, ContractRef, HandleValue};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors raised by the handle registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handle '{0}' is not bound")]
    UnboundHandle(String),

    #[error("handle '{name}' is already bound (produced by '{producer}')")]
    HandleAlreadyBound { name: String, producer: String },

    #[error("step '{step}' read handle '{name}' which it does not declare")]
    UndeclaredRead { step: String, name: String },

    #[error("handle '{name}' is a {actual}, expected {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("step '{step}' produced handles {produced:?} but declares {declared:?}")]
    UnexpectedHandles {
        step: String,
        produced: Vec<String>,
        declared: Vec<String>,
    },
}

#[derive(Debug, Clone)]
struct Binding {
    value: HandleValue,
    producer: String,
}

/// Registry of handles produced during one pipeline run
///
/// Cloning is cheap and yields another reference to the same registry.
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    bindings: Arc<RwLock<BTreeMap<String, Binding>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single handle outside of any step
    pub fn put(&self, name: &str, value: HandleValue) -> Result<(), RegistryError> {
        self.commit("external", vec![(name.to_string(), value)])
    }

    /// Look up a handle
    pub fn get(&self, name: &str) -> Result<HandleValue, RegistryError> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings
            .get(name)
            .map(|b| b.value.clone())
            .ok_or_else(|| RegistryError::UnboundHandle(name.to_string()))
    }

    /// Name of the step that produced a handle
    pub fn producer(&self, name: &str) -> Option<String> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.get(name).map(|b| b.producer.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind all handles produced by a step, or none of them
    pub fn commit(
        &self,
        producer: &str,
        handles: Vec<(String, HandleValue)>,
    ) -> Result<(), RegistryError> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);

        let mut batch = HashSet::new();
        for (name, _) in &handles {
            if let Some(existing) = bindings.get(name) {
                return Err(RegistryError::HandleAlreadyBound {
                    name: name.clone(),
                    producer: existing.producer.clone(),
                });
            }
            if !batch.insert(name.as_str()) {
                return Err(RegistryError::HandleAlreadyBound {
                    name: name.clone(),
                    producer: producer.to_string(),
                });
            }
        }

        for (name, value) in handles {
            bindings.insert(
                name,
                Binding {
                    value,
                    producer: producer.to_string(),
                },
            );
        }

        Ok(())
    }

    /// Ordered copy of every bound handle
    pub fn snapshot(&self) -> BTreeMap<String, HandleValue> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings
            .iter()
            .map(|(name, b)| (name.clone(), b.value.clone()))
            .collect()
    }

    /// Read-only view limited to the handles a step declares
    pub fn view<I, S>(&self, step: &str, allowed: I) -> HandleView
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HandleView {
            step: step.to_string(),
            allowed: allowed.into_iter().map(Into::into).collect(),
            registry: self.clone(),
        }
    }
}

/// A step's window onto the registry
#[derive(Debug, Clone)]
pub struct HandleView {
    step: String,
    allowed: HashSet<String>,
    registry: HandleRegistry,
}

impl HandleView {
    pub fn get(&self, name: &str) -> Result<HandleValue, RegistryError> {
        if !self.allowed.contains(name) {
            return Err(RegistryError::UndeclaredRead {
                step: self.step.clone(),
                name: name.to_string(),
            });
        }
        self.registry.get(name)
    }

    pub fn asset(&self, name: &str) -> Result<u64, RegistryError> {
        let value = self.get(name)?;
        value.as_asset().ok_or_else(|| mismatch(name, "asset", &value))
    }

    pub fn application(&self, name: &str) -> Result<u64, RegistryError> {
        let value = self.get(name)?;
        value
            .as_application()
            .ok_or_else(|| mismatch(name, "application", &value))
    }

    pub fn contract(&self, name: &str) -> Result<ContractRef, RegistryError> {
        let value = self.get(name)?;
        value
            .as_contract()
            .cloned()
            .ok_or_else(|| mismatch(name, "contract", &value))
    }

    pub fn address(&self, name: &str) -> Result<Address, RegistryError> {
        let value = self.get(name)?;
        value
            .address()
            .cloned()
            .ok_or_else(|| mismatch(name, "account", &value))
    }
}

fn mismatch(name: &str, expected: &'static str, actual: &HandleValue) -> RegistryError {
    RegistryError::KindMismatch {
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}
