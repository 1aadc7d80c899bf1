use async_trait::async_trait;
use drover_actor::{Actor, ActorContext};
use drover_autonomy::{AuthorizationDecision, AuthorizationEngine};
use drover_core::{AuthScope, SharedSession};
use tokio::sync::oneshot;
use tracing::{debug, info};

pub enum AuthorizerMsg {
    Authorize {
        tool_name: String,
        params: serde_json::Value,
        reply: oneshot::Sender<AuthorizationDecision>,
    },
    /// Persist an approved scope into the session.
    Grant {
        scope: AuthScope,
        reply: oneshot::Sender<()>,
    },
}

/// Serializes authorization checks and grants against one session.
pub struct AuthorizerActor {
    engine: AuthorizationEngine,
    session: SharedSession,
}

impl AuthorizerActor {
    pub fn new(engine: AuthorizationEngine, session: SharedSession) -> Self {
        Self { engine, session }
    }
}

#[async_trait]
impl Actor for AuthorizerActor {
    type Message = AuthorizerMsg;

    async fn handle(&mut self, msg: AuthorizerMsg, _ctx: &ActorContext) -> drover_core::Result<()> {
        match msg {
            AuthorizerMsg::Authorize {
                tool_name,
                params,
                reply,
            } => {
                let decision = {
                    let session = self.session.lock();
                    self.engine.authorize(&session, &tool_name, &params)
                };
                debug!(
                    tool = %tool_name,
                    allowed = decision.allowed,
                    ask = decision.requires_user_input,
                    reason = %decision.reason,
                    "authorization decided"
                );
                let _ = reply.send(decision);
            }
            AuthorizerMsg::Grant { scope, reply } => {
                info!(%scope, "granting for the rest of the session");
                self.session.lock().grant(&scope);
                let _ = reply.send(());
            }
        }
        Ok(())
    }
}
