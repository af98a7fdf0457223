//! Name → factory registry for stage types.
//!
//! Populated once at startup. Assembly resolves every configured stage name
//! here; there is no lookup by naming convention.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::pipeline::assembler::ChainError;
use crate::pipeline::stage::Stage;
use crate::security::{
    auth::AuthenticationStage, rate_limit::RateLimitStage, sanitization::SanitizationStage,
    validation::ValidationStage,
};

/// Builds a stage from its configured parameters.
pub type StageFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn Stage>, ChainError> + Send + Sync>;

/// Registry of known stage types.
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: BTreeMap<String, StageFactory>,
}

impl StageRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every stage shipped by the gateway.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(AuthenticationStage::NAME, |p| {
            Ok(Box::new(AuthenticationStage::from_params(p)?))
        });
        registry.register(RateLimitStage::NAME, |p| Ok(Box::new(RateLimitStage::from_params(p)?)));
        registry.register(ValidationStage::NAME, |p| Ok(Box::new(ValidationStage::from_params(p)?)));
        registry.register(SanitizationStage::NAME, |p| {
            Ok(Box::new(SanitizationStage::from_params(p)?))
        });
        registry
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Stage>, ChainError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<&StageFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .finish()
    }
}

/// Deserialize a stage's parameter map into its typed params struct.
pub fn parse_params<T: DeserializeOwned>(
    stage: &'static str,
    params: &Map<String, Value>,
) -> Result<T, ChainError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| ChainError::InvalidParameters {
        stage: stage.to_string(),
        reason: e.to_string(),
    })
}
