// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Factory registry mapping implementation identifiers to constructors.
//!
//! Populated at composition time; new actor types need no core changes.

use serde_json::Value;
use std::collections::HashMap;

use crate::domain::error::OrchestrationError;
use crate::domain::spec::ActorSpec;
use crate::runtime::actor::Actor;

pub type ActorConstructor =
    Box<dyn Fn(&Value) -> Result<Box<dyn Actor>, String> + Send + Sync + 'static>;

#[derive(Default)]
pub struct ActorRegistry {
    factories: HashMap<String, ActorConstructor>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under an implementation identifier. The
    /// constructor may reject its configuration blob with a reason string.
    pub fn register<F>(&mut self, identifier: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Actor>, String> + Send + Sync + 'static,
    {
        self.factories.insert(identifier.into(), Box::new(constructor));
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Construct the actor described by `spec`. Any failure here is an
    /// instantiation error, which is fatal regardless of optionality.
    pub fn instantiate(&self, spec: &ActorSpec) -> Result<Box<dyn Actor>, OrchestrationError> {
        let identifier =
            spec.implementation
                .as_deref()
                .ok_or_else(|| OrchestrationError::Instantiation {
                    name: spec.name.clone(),
                    reason: "spec carries no implementation identifier".to_string(),
                })?;
        let constructor =
            self.factories
                .get(identifier)
                .ok_or_else(|| OrchestrationError::Instantiation {
                    name: spec.name.clone(),
                    reason: format!("unknown implementation '{identifier}'"),
                })?;
        constructor(&spec.config).map_err(|reason| OrchestrationError::Instantiation {
            name: spec.name.clone(),
            reason,
        })
    }
}

impl std::fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("identifiers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
