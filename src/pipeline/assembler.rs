//! Chain assembly from declarative configuration.

use thiserror::Error;

use crate::config::StageEntry;
use crate::pipeline::chain::Chain;
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::stage::Stage;

/// Configuration errors raised while building the chain. Always fatal.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("security_chain[{index}]: unknown stage {name:?}")]
    UnknownStage { index: usize, name: String },

    #[error("stage {stage}: invalid parameters: {reason}")]
    InvalidParameters { stage: String, reason: String },

    #[error("security_chain[{index}] ({name}): {source}")]
    Entry {
        index: usize,
        name: String,
        #[source]
        source: Box<ChainError>,
    },

    #[error("security chain has no enabled stages")]
    Empty,
}

/// Builds a [`Chain`] by resolving entries against a [`StageRegistry`].
#[derive(Debug)]
pub struct ChainAssembler {
    registry: StageRegistry,
}

impl ChainAssembler {
    pub fn new(registry: StageRegistry) -> Self {
        Self { registry }
    }

    /// Assembler over the built-in stages.
    pub fn with_builtin() -> Self {
        Self::new(StageRegistry::with_builtin())
    }

    /// Build the chain in entry order, leaving disabled entries out.
    ///
    /// Any failure aborts the whole build; a partial chain is never returned.
    /// A configuration with no enabled entries yields [`ChainError::Empty`].
    pub fn build(&self, entries: &[StageEntry]) -> Result<Chain, ChainError> {
        tracing::info!(entries = entries.len(), "Initializing security chain");

        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if !entry.enabled {
                tracing::info!(index, stage = %entry.name, "Skipping disabled stage");
                continue;
            }

            let factory = self.registry.get(&entry.name).ok_or_else(|| {
                tracing::error!(index, stage = %entry.name, "Unknown stage");
                ChainError::UnknownStage {
                    index,
                    name: entry.name.clone(),
                }
            })?;

            let stage = factory(&entry.parameters).map_err(|e| {
                tracing::error!(index, stage = %entry.name, error = %e, "Failed to build stage");
                ChainError::Entry {
                    index,
                    name: entry.name.clone(),
                    source: Box::new(e),
                }
            })?;

            tracing::info!(index, stage = stage.name(), position = stages.len(), "Linked stage");
            stages.push(stage);
        }

        if stages.is_empty() {
            return Err(ChainError::Empty);
        }

        let chain = Chain::from_stages(stages);
        tracing::info!(stages = ?chain.stage_names(), "Security chain built");
        Ok(chain)
    }
}
