use serde::Serialize;
use tokio::sync::watch;

use crate::{ingest::Pipeline, store::Store, subscription::ConnectionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub database: bool,

    pub mqtt: bool,

    pub mqtt_state: ConnectionState,
}

/// Read-only view over store and broker connectivity.
#[derive(Debug)]
pub struct HealthProbe<S> {
    pipeline: Pipeline<S>,
    mqtt: watch::Receiver<ConnectionState>,
}

impl<S> Clone for HealthProbe<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            mqtt: self.mqtt.clone(),
        }
    }
}

impl<S: Store> HealthProbe<S> {
    pub fn new(pipeline: Pipeline<S>, mqtt: watch::Receiver<ConnectionState>) -> Self {
        Self { pipeline, mqtt }
    }

    pub async fn check(&self) -> Health {
        let mqtt_state = *self.mqtt.borrow();
        Health {
            database: self.pipeline.store_reachable().await,
            mqtt: mqtt_state == ConnectionState::Connected,
            mqtt_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ingest::PipelineConfig, store::MemoryStore};

    #[tokio::test]
    async fn reports_both_collaborators() {
        let pipeline = Pipeline::new(MemoryStore::new(), PipelineConfig::default());
        let (state, rx) = watch::channel(ConnectionState::Connecting);
        let probe = HealthProbe::new(pipeline, rx);

        assert_eq!(
            probe.check().await,
            Health {
                database: true,
                mqtt: false,
                mqtt_state: ConnectionState::Connecting,
            }
        );

        state.send_replace(ConnectionState::Connected);
        assert!(probe.check().await.mqtt);
    }
}
