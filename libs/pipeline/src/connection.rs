use std::sync::Arc;

use tokio::sync::Mutex;

use sensorgate_api::{ConnectionState, PubSubBroker};

use crate::PipelineError;

/// Owner of the process-wide broker connection.
///
/// Built once at startup and shared by `Arc`. The "requested" flag is held
/// locked for the whole broker call, so concurrent `connect`/`disconnect`
/// calls run one after another and each sees the outcome of the previous
/// one. Reconnects after a dropped link are the broker client's job.
pub struct ConnectionManager {
    broker: Arc<dyn PubSubBroker>,
    requested: Mutex<bool>,
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn PubSubBroker>) -> Self {
        Self { broker, requested: Mutex::new(false) }
    }

    pub fn broker(&self) -> &Arc<dyn PubSubBroker> {
        &self.broker
    }

    pub fn client_id(&self) -> &str {
        self.broker.client_id()
    }

    pub fn state(&self) -> ConnectionState {
        self.broker.connection_state()
    }

    pub async fn connect(&self) -> Result<(), PipelineError> {
        let mut requested = self.requested.lock().await;
        if *requested {
            tracing::info!(client_id = %self.client_id(), "already connected");
            return Ok(());
        }

        tracing::info!(client_id = %self.client_id(), "connecting to broker");
        match self.broker.connect().await {
            Ok(()) => {
                *requested = true;
                tracing::info!(client_id = %self.client_id(), state = %self.state(), "connect requested");
                Ok(())
            }
            Err(e) => {
                tracing::error!(client_id = %self.client_id(), error = %e, "connect failed");
                Err(PipelineError::Broker(e))
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), PipelineError> {
        let mut requested = self.requested.lock().await;
        if !*requested {
            tracing::debug!(client_id = %self.client_id(), "not connected, nothing to do");
            return Ok(());
        }

        tracing::info!(client_id = %self.client_id(), "disconnecting from broker");
        *requested = false;
        self.broker.disconnect().await.map_err(|e| {
            tracing::warn!(client_id = %self.client_id(), error = %e, "disconnect failed");
            PipelineError::Broker(e)
        })
    }
}
