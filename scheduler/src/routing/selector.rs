//! Accelerator vs general-purpose backend choice.

use std::sync::Arc;

use infergate_common::{Backend, ResourceSnapshot};

use crate::config::WatermarkConfig;
use crate::error::{Result, SchedulerError};
use crate::models::ModelRegistry;

/// Picks the backend for a sealed batch.
///
/// Consulted once per batch at seal time, never per request.
pub struct BackendSelector {
    registry: Arc<ModelRegistry>,
    watermarks: WatermarkConfig,
}

impl BackendSelector {
    pub fn new(registry: Arc<ModelRegistry>, watermarks: WatermarkConfig) -> Self {
        Self {
            registry,
            watermarks,
        }
    }

    /// The accelerator is preferred while the batch fits its crossover limit and
    /// its utilization is under the high watermark. Otherwise general-purpose.
    pub fn select(
        &self,
        model_id: &str,
        batch_size: usize,
        snapshot: &ResourceSnapshot,
    ) -> Result<Backend> {
        let descriptor = self.registry.require(model_id)?;

        let accelerator = descriptor.supports(Backend::Accelerator);
        let general = descriptor.supports(Backend::General);

        let backend = match (accelerator, general) {
            (false, false) => {
                return Err(SchedulerError::configuration(format!(
                    "Model {} has no compatible backend",
                    model_id
                )))
            }
            (true, false) => Backend::Accelerator,
            (false, true) => Backend::General,
            (true, true) => {
                let utilization = snapshot.accelerator_utilization();
                if batch_size <= descriptor.accelerator_batch_limit
                    && utilization < self.watermarks.accelerator_high
                {
                    Backend::Accelerator
                } else {
                    Backend::General
                }
            }
        };

        tracing::debug!(
            model = %model_id,
            batch_size,
            accelerator_utilization = snapshot.accelerator_utilization(),
            backend = %backend,
            "Backend selected"
        );
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::descriptor;
    use infergate_common::{BackendLoad, ErrorKind};
    use rstest::rstest;

    fn selector() -> BackendSelector {
        let mut accel_only = descriptor("accel-only");
        accel_only.backend_compatibility = vec![Backend::Accelerator];
        let mut general_only = descriptor("general-only");
        general_only.backend_compatibility = vec![Backend::General];

        let registry =
            ModelRegistry::new(vec![descriptor("both"), accel_only, general_only]).unwrap();
        BackendSelector::new(Arc::new(registry), WatermarkConfig::default())
    }

    fn snapshot(accelerator_utilization: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            accelerator: BackendLoad::new(accelerator_utilization, 0, 0),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::idle_small_batch("both", 2, 0.10, Backend::Accelerator)]
    #[case::at_crossover("both", 3, 0.10, Backend::Accelerator)]
    #[case::above_crossover("both", 4, 0.10, Backend::General)]
    #[case::busy_accelerator("both", 2, 0.99, Backend::General)]
    #[case::at_high_watermark("both", 1, 0.80, Backend::General)]
    #[case::accelerator_only_under_load("accel-only", 8, 0.99, Backend::Accelerator)]
    #[case::general_only("general-only", 1, 0.0, Backend::General)]
    fn test_select(
        #[case] model: &str,
        #[case] batch_size: usize,
        #[case] utilization: f64,
        #[case] expected: Backend,
    ) {
        let backend = selector()
            .select(model, batch_size, &snapshot(utilization))
            .unwrap();
        assert_eq!(backend, expected);
    }

    #[test]
    fn test_crossover_is_per_model() {
        let mut wide = descriptor("wide");
        wide.max_batch_size = 16;
        wide.accelerator_batch_limit = 8;
        let registry = ModelRegistry::new(vec![descriptor("narrow"), wide]).unwrap();
        let selector = BackendSelector::new(Arc::new(registry), WatermarkConfig::default());

        let snap = snapshot(0.2);
        assert_eq!(selector.select("narrow", 6, &snap).unwrap(), Backend::General);
        assert_eq!(selector.select("wide", 6, &snap).unwrap(), Backend::Accelerator);
    }

    #[test]
    fn test_unknown_model() {
        let err = selector().select("nope", 1, &snapshot(0.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
