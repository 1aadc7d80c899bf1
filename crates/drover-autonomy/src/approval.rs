use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_config::ToolsConfig;
use drover_core::AuthScope;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

/// A request for human approval of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    pub reason: String,
    /// Grant that an "always allow" answer would persist.
    pub suggested_scope: Option<AuthScope>,
    pub created_at: DateTime<Utc>,
    /// Auto-deny after this many seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approved,
    Denied,
    TimedOut,
}

/// The outward approval callback: (tool name, parameters, reason) -> approved.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request(
        &self,
        tool_name: &str,
        params: &serde_json::Value,
        reason: &str,
        suggested_scope: Option<&AuthScope>,
    ) -> bool;
}

/// [`ApprovalHandler`] from a plain synchronous closure.
pub struct FnApprovalHandler<F>(pub F);

#[async_trait]
impl<F> ApprovalHandler for FnApprovalHandler<F>
where
    F: Fn(&str, &serde_json::Value, &str) -> bool + Send + Sync,
{
    async fn request(
        &self,
        tool_name: &str,
        params: &serde_json::Value,
        reason: &str,
        _suggested_scope: Option<&AuthScope>,
    ) -> bool {
        (self.0)(tool_name, params, reason)
    }
}

type PendingApproval = (ApprovalRequest, oneshot::Sender<ApprovalResponse>);

/// Routes approval requests to whoever holds the receiver (a UI or protocol
/// adapter) and waits for an answer. No listener, a dropped reply, or a
/// timeout all count as "not approved".
pub struct ApprovalGate {
    request_tx: mpsc::Sender<PendingApproval>,
    request_rx: Option<mpsc::Receiver<PendingApproval>>,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            request_tx: tx,
            request_rx: Some(rx),
            timeout,
        }
    }

    /// A gate that waits `tools.approval_timeout_secs` for each answer.
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(Duration::from_secs(config.approval_timeout_secs))
    }

    /// Take the receiver (used by the front end to listen for approval requests).
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<PendingApproval>> {
        self.request_rx.take()
    }

    /// Request approval. Blocks until approved, denied, or timed out.
    pub async fn request_approval(
        &self,
        tool_name: &str,
        tool_args: &serde_json::Value,
        reason: &str,
        suggested_scope: Option<&AuthScope>,
    ) -> ApprovalResponse {
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            tool_args: tool_args.clone(),
            reason: reason.to_string(),
            suggested_scope: suggested_scope.cloned(),
            created_at: Utc::now(),
            timeout_secs: self.timeout.as_secs(),
        };

        info!(request_id = %request.id, tool = tool_name, "requesting human approval");

        let (response_tx, response_rx) = oneshot::channel();
        if self.request_tx.send((request, response_tx)).await.is_err() {
            return ApprovalResponse::Denied;
        }

        match tokio::time::timeout(self.timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => ApprovalResponse::Denied,
            Err(_) => {
                info!("approval request timed out");
                ApprovalResponse::TimedOut
            }
        }
    }
}

#[async_trait]
impl ApprovalHandler for ApprovalGate {
    async fn request(
        &self,
        tool_name: &str,
        params: &serde_json::Value,
        reason: &str,
        suggested_scope: Option<&AuthScope>,
    ) -> bool {
        self.request_approval(tool_name, params, reason, suggested_scope).await == ApprovalResponse::Approved
    }
}
