use std::sync::{Arc, Mutex};

use tiller_runtime::{RuntimeClient, RuntimeError};
use tracing::debug;

use crate::error::{MemoryError, Result};

/// Wraps the runtime's embed call with a single model name and a frozen
/// vector dimension.
///
/// The dimension is either seeded from the schema (a store that already has
/// vec tables) or frozen on the first successful call. Any later call whose
/// vector length differs fails with `DimensionMismatch`: the schema's
/// vector columns are fixed-width, so a silently changed model would corrupt
/// every search.
pub struct EmbeddingService {
    runtime: Arc<dyn RuntimeClient>,
    model: String,
    dim: Mutex<Option<usize>>,
}

impl EmbeddingService {
    pub fn new(runtime: Arc<dyn RuntimeClient>, model: impl Into<String>, seed_dim: Option<usize>) -> Self {
        Self {
            runtime,
            model: model.into(),
            dim: Mutex::new(seed_dim),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The frozen dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        *self.dim.lock().unwrap()
    }

    /// Embed `text`, enforcing the frozen dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self
            .runtime
            .embed(&self.model, text)
            .await
            .map_err(|e| match e {
                RuntimeError::NotFound(_) => MemoryError::ModelMissing(self.model.clone()),
                other => MemoryError::RuntimeUnavailable(other.to_string()),
            })?;

        let mut dim = self.dim.lock().unwrap();
        match *dim {
            Some(expected) if expected != vector.len() => {
                return Err(MemoryError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => {
                debug!(model = %self.model, dim = vector.len(), "embedding dimension frozen");
                *dim = Some(vector.len());
            }
        }
        Ok(vector)
    }
}
