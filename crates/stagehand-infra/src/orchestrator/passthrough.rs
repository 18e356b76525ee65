//! Stand-in orchestrator that runs without any model backend.
//!
//! Each configured agent "reviews" the input by echoing it back, which is
//! enough to exercise the full event and result pipeline end to end.
//!
//! Recognized `config` keys on the start request:
//! - `agents`: array of agent names (default `["analyst"]`)
//! - `step_delay_ms`: pause before each agent completes (default none)

use std::time::Duration;

use stagehand_core::workflow::{ExecutionContext, OrchestrationOutput, Orchestrator, ProgressCallback};
use stagehand_types::error::OrchestratorError;
use stagehand_types::workflow::{AgentContribution, SynthesisEntry};

const DEFAULT_AGENT: &str = "analyst";

#[derive(Debug, Clone, Default)]
pub struct PassthroughOrchestrator {
    rejected_kinds: Vec<String>,
}

impl PassthroughOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse workflows of the given kinds at admission.
    pub fn with_rejected_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rejected_kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }
}

fn agents_from(config: &serde_json::Value) -> Vec<String> {
    let agents: Vec<String> = config
        .get("agents")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|a| a.as_str())
                .filter(|a| !a.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if agents.is_empty() {
        vec![DEFAULT_AGENT.to_string()]
    } else {
        agents
    }
}

fn cancelled() -> OrchestratorError {
    OrchestratorError::Failed("cancelled before completion".to_string())
}

impl Orchestrator for PassthroughOrchestrator {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn supports(&self, kind: &str) -> bool {
        !self.rejected_kinds.iter().any(|k| k == kind)
    }

    async fn execute(
        &self,
        ctx: ExecutionContext,
        on_event: ProgressCallback,
    ) -> Result<OrchestrationOutput, OrchestratorError> {
        if !self.supports(&ctx.kind) {
            return Err(OrchestratorError::UnsupportedKind(ctx.kind));
        }
        let agents = agents_from(&ctx.config);
        let step_delay = ctx
            .config
            .get("step_delay_ms")
            .and_then(|v| v.as_u64())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let mut contributions = Vec::with_capacity(agents.len());
        for (index, agent) in agents.iter().enumerate() {
            if ctx.cancellation.is_cancelled() {
                return Err(cancelled());
            }
            on_event
                .emit(
                    "agent_started",
                    serde_json::json!({ "agent": agent, "index": index }),
                )
                .await;

            if let Some(delay) = step_delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancellation.cancelled() => return Err(cancelled()),
                }
            }

            contributions.push(AgentContribution {
                agent: agent.clone(),
                role: "reviewer".to_string(),
                content: ctx.input.clone(),
                metadata: serde_json::json!({ "index": index }),
            });
            on_event
                .emit("agent_completed", serde_json::json!({ "agent": agent }))
                .await;
        }

        let synthesis = format!("{} agent(s) reviewed: {}", agents.len(), ctx.input);
        on_event
            .emit(
                "synthesis_ready",
                serde_json::json!({ "round": 1, "content": synthesis }),
            )
            .await;

        tracing::debug!(task_id = %ctx.task_id, agents = agents.len(), "passthrough run finished");
        Ok(OrchestrationOutput {
            title: None,
            contributions,
            syntheses: vec![SynthesisEntry {
                round: 1,
                content: synthesis.clone(),
            }],
            final_synthesis: Some(synthesis),
            total_cost: 0.0,
            artifacts: Vec::new(),
            error: None,
        })
    }
}
