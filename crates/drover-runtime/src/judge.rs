use std::sync::Arc;

use async_trait::async_trait;
use drover_actor::{Actor, ActorContext};
use drover_autonomy::{ErrorJudge, ErrorJudgeDecision};
use tokio::sync::oneshot;
use tracing::info;

pub enum JudgeMsg {
    Judge {
        error: String,
        attempt: u32,
        max_attempts: u32,
        model: String,
        reply: oneshot::Sender<ErrorJudgeDecision>,
    },
}

/// Runs error judgements one at a time, whichever [`ErrorJudge`] backs it.
pub struct JudgeActor {
    judge: Arc<dyn ErrorJudge>,
}

impl JudgeActor {
    pub fn new(judge: Arc<dyn ErrorJudge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl Actor for JudgeActor {
    type Message = JudgeMsg;

    async fn handle(&mut self, msg: JudgeMsg, _ctx: &ActorContext) -> drover_core::Result<()> {
        let JudgeMsg::Judge {
            error,
            attempt,
            max_attempts,
            model,
            reply,
        } = msg;
        let decision = self.judge.judge(&error, attempt, max_attempts, &model).await;
        info!(
            attempt,
            max_attempts,
            retry = decision.should_retry,
            sleep_secs = decision.sleep_seconds,
            compact = decision.trigger_compaction,
            reason = %decision.reason,
            "completion error judged"
        );
        let _ = reply.send(decision);
        Ok(())
    }
}
