//! Registry that routes each published layer to its sink.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::{LayerId, LayerSink, PortError};

/// Sink bound to a single layer.
pub struct LayerBinding {
    /// Layer the sink receives.
    pub layer: LayerId,
    /// Destination for the layer's table.
    pub sink: Arc<dyn LayerSink>,
}

/// Registry that resolves sinks by layer.
pub struct SinkRegistry {
    sinks: HashMap<LayerId, Arc<dyn LayerSink>>,
}

impl SinkRegistry {
    /// Build a registry from the provided bindings. A later binding for the
    /// same layer replaces an earlier one.
    #[must_use]
    pub fn new(bindings: Vec<LayerBinding>) -> Self {
        let sinks = bindings
            .into_iter()
            .map(|binding| (binding.layer, binding.sink))
            .collect();
        Self { sinks }
    }

    /// Registry that sends every layer to the same sink.
    #[must_use]
    pub fn uniform(sink: &Arc<dyn LayerSink>) -> Self {
        Self::new(
            LayerId::ALL
                .into_iter()
                .map(|layer| LayerBinding {
                    layer,
                    sink: Arc::clone(sink),
                })
                .collect(),
        )
    }

    /// Registry with no sinks, for runs that never publish.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Layers that have a sink, in publish order.
    #[must_use]
    pub fn layers(&self) -> Vec<LayerId> {
        LayerId::ALL
            .into_iter()
            .filter(|layer| self.sinks.contains_key(layer))
            .collect()
    }

    /// Look up the sink for `layer`.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnregisteredLayer`] when no sink is registered.
    pub fn sink(&self, layer: LayerId) -> Result<&Arc<dyn LayerSink>, PortError> {
        self.sinks
            .get(&layer)
            .ok_or(PortError::UnregisteredLayer(layer))
    }
}
