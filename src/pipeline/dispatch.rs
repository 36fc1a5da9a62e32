//! Dispatcher façade over the execution gateway.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::GatewayError;
use crate::pipeline::types::ActionDescriptor;

/// External collaborator that actually runs a one-shot action.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn execute_action(
        &self,
        name: &str,
        message: &str,
        target_agent: Option<&str>,
        timeout_secs: u32,
        delay_secs: u32,
    ) -> Result<(), GatewayError>;
}

/// Thin wrapper that logs gateway failures.
///
/// Callers get the error back for bookkeeping but must not surface it to
/// the event source.
#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<dyn ExecutionGateway>,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn ExecutionGateway>) -> Self {
        Self { gateway }
    }

    pub async fn dispatch(&self, action: &ActionDescriptor) -> Result<(), GatewayError> {
        let result = self
            .gateway
            .execute_action(
                &action.name,
                &action.message,
                action.target_agent.as_deref(),
                action.timeout_secs,
                action.delay_secs,
            )
            .await;

        match &result {
            Ok(()) => info!(
                name = %action.name,
                agent = action.target_agent.as_deref().unwrap_or("default"),
                timeout_secs = action.timeout_secs,
                delay_secs = action.delay_secs,
                "Action dispatched"
            ),
            Err(e) => error!(name = %action.name, error = %e, "Failed to dispatch action"),
        }
        result
    }
}
