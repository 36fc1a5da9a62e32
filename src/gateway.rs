//! Execution gateway client: schedules one-shot agent jobs.
//!
//! Every dispatched action becomes a `cron` tool invocation that adds an
//! isolated, single-fire job `delay_secs` in the future.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::pipeline::ExecutionGateway;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(mut config: GatewayConfig) -> Self {
        config.url = config.url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    /// Request body for a one-shot job firing `delay_secs` from now.
    fn job_request(
        &self,
        name: &str,
        message: &str,
        agent: &str,
        timeout_secs: u32,
        delay_secs: u32,
    ) -> serde_json::Value {
        let fire_at = chrono::Utc::now() + chrono::Duration::seconds(i64::from(delay_secs));

        let mut job = serde_json::json!({
            "name": format!("webhook: {name}"),
            "sessionTarget": "isolated",
            "enabled": true,
            "schedule": {
                "kind": "at",
                "at": fire_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            },
            "payload": {
                "kind": "agentTurn",
                "message": message,
                "model": self.config.model,
                "timeoutSeconds": timeout_secs,
            },
            "delivery": { "mode": "none" },
        });
        if !agent.is_empty() {
            job["agentId"] = serde_json::Value::from(agent);
        }

        serde_json::json!({
            "tool": "cron",
            "args": { "action": "add", "job": job },
            "sessionKey": format!("agent:{agent}:main"),
        })
    }
}

#[async_trait]
impl ExecutionGateway for GatewayClient {
    async fn execute_action(
        &self,
        name: &str,
        message: &str,
        target_agent: Option<&str>,
        timeout_secs: u32,
        delay_secs: u32,
    ) -> Result<(), GatewayError> {
        if !self.config.is_configured() {
            warn!(name, "Gateway not configured, skipping job");
            return Ok(());
        }

        let agent = target_agent
            .filter(|a| !a.is_empty())
            .unwrap_or(self.config.agent_id.as_str());
        let body = self.job_request(name, message, agent, timeout_secs, delay_secs);

        let resp = self
            .client
            .post(format!("{}/tools/invoke", self.config.url))
            .bearer_auth(self.config.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() >= 300 {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(agent, name, "One-shot job created");
        Ok(())
    }
}
