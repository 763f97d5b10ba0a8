//! Agent implementation - drives the model <-> tools loop for one exchange

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use toolchat_core::{
    Error, ErrorKind, ModelGateway, ModelReply, Result, SessionLimits, ToolRegistry, ToolRequest,
    ToolSpec, Transcript, Turn,
};

/// Result of one completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalAnswer {
    /// The assistant text appended last
    pub text: String,
    /// Model calls made
    pub rounds: usize,
    /// Tool invocations executed
    pub tool_calls: usize,
    /// True when the round cap ended the exchange
    pub truncated: bool,
    pub elapsed: Duration,
}

/// The orchestration loop.
///
/// Each exchange is a bounded state machine: ask the model, then either
/// finish on final text or run the requested tools and ask again. Reaching
/// `max_tool_call_rounds` is a terminal state, not an error.
///
/// A round is staged and committed in one step once every tool of the batch
/// has finished: request turns first (model order), then result turns in
/// completion order. An interrupt or a transport error therefore leaves the
/// transcript at the last fully committed round.
pub struct Agent<G: ModelGateway> {
    gateway: G,
    registry: ToolRegistry,
    limits: SessionLimits,
}

impl<G: ModelGateway> Agent<G> {
    pub fn new(gateway: G, registry: ToolRegistry, limits: SessionLimits) -> Self {
        Self {
            gateway,
            registry,
            limits,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Append a user turn and run the exchange to a terminal state.
    pub async fn advance(&self, transcript: &mut Transcript, user_text: &str) -> Result<FinalAnswer> {
        self.advance_cancellable(transcript, user_text, &CancellationToken::new())
            .await
    }

    /// Like [`Agent::advance`], abandoning the exchange when `cancel` fires.
    /// In-flight tools are dropped, which kills their processes.
    pub async fn advance_cancellable(
        &self,
        transcript: &mut Transcript,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<FinalAnswer> {
        transcript.append(Turn::user(user_text));
        self.drive(transcript, cancel).await
    }

    /// Resubmit the transcript as it stands, without a new user turn.
    /// Used after a transport error or an interrupt.
    pub async fn resume(
        &self,
        transcript: &mut Transcript,
        cancel: &CancellationToken,
    ) -> Result<FinalAnswer> {
        match transcript.last() {
            None | Some(Turn::AssistantText { .. }) => Err(Error::invalid_argument(
                "nothing to retry: the last exchange already has an answer",
            )
            .with_operation("agent::resume")),
            Some(_) => self.drive(transcript, cancel).await,
        }
    }

    async fn drive(&self, transcript: &mut Transcript, cancel: &CancellationToken) -> Result<FinalAnswer> {
        let started = Instant::now();
        let specs: Vec<&ToolSpec> = self.registry.specs();
        let cap = self.limits.max_tool_call_rounds;
        let mut tool_calls = 0;

        for round in 0..cap {
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(interrupted(round)),
                reply = self.gateway.complete(transcript, &specs) => reply,
            };
            let reply = reply.map_err(|e| {
                tracing::warn!(round, error = %e, "model call failed");
                e.with_context("round", round.to_string())
            })?;

            let requests = match reply {
                ModelReply::ToolRequests(requests) if !requests.is_empty() => requests,
                ModelReply::ToolRequests(_) => {
                    return Ok(self.finish(transcript, String::new(), round + 1, tool_calls, false, started));
                }
                ModelReply::FinalText(text) => {
                    return Ok(self.finish(transcript, text, round + 1, tool_calls, false, started));
                }
            };

            let requests = assign_request_ids(transcript, requests);
            tracing::info!(round, tools = requests.len(), "dispatching tool batch");

            let results = match self.run_batch(&requests, cancel).await {
                Some(results) => results,
                None => return Err(interrupted(round)),
            };
            tool_calls += requests.len();

            let mut staged: Vec<Turn> = requests
                .into_iter()
                .map(|r| Turn::tool_request(r.request_id, r.tool_name, r.arguments))
                .collect();
            staged.extend(results);
            transcript.commit_round(staged);
        }

        tracing::info!(cap, "tool call round limit reached");
        let text = format!(
            "Stopped after {} tool call rounds without a final answer. \
             Send another message to continue.",
            cap
        );
        Ok(self.finish(transcript, text, cap, tool_calls, true, started))
    }

    /// Run every request of one batch concurrently and wait for all of them.
    /// Results come back in completion order. `None` means interrupted.
    async fn run_batch(&self, requests: &[ToolRequest], cancel: &CancellationToken) -> Option<Vec<Turn>> {
        let timeout = self.limits.per_tool_timeout;
        let mut pending: FuturesUnordered<_> = requests
            .iter()
            .map(|req| async move {
                let output = self
                    .registry
                    .dispatch(&req.request_id, &req.tool_name, &req.arguments, timeout)
                    .await;
                (req, output)
            })
            .collect();

        let mut results = Vec::with_capacity(requests.len());
        let interrupted = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break true,
                next = pending.next() => match next {
                    Some((req, output)) => results.push(Turn::tool_result(
                        req.request_id.clone(),
                        req.tool_name.clone(),
                        output.output,
                        output.succeeded,
                    )),
                    None => break false,
                },
            }
        };

        if interrupted {
            tracing::info!(in_flight = pending.len(), "interrupt: abandoning tool batch");
            drop(pending);
            return None;
        }
        Some(results)
    }

    fn finish(
        &self,
        transcript: &mut Transcript,
        text: String,
        rounds: usize,
        tool_calls: usize,
        truncated: bool,
        started: Instant,
    ) -> FinalAnswer {
        transcript.append(Turn::assistant_text(text.clone()));
        let elapsed = started.elapsed();
        tracing::info!(
            rounds,
            tool_calls,
            truncated,
            elapsed_ms = elapsed.as_millis() as u64,
            "exchange finished"
        );
        FinalAnswer {
            text,
            rounds,
            tool_calls,
            truncated,
            elapsed,
        }
    }
}

fn interrupted(round: usize) -> Error {
    Error::cancelled("exchange interrupted by operator")
        .with_operation("agent::advance")
        .with_context("round", round.to_string())
}

/// Replace missing or clashing request ids so correlation stays unambiguous.
fn assign_request_ids(transcript: &Transcript, requests: Vec<ToolRequest>) -> Vec<ToolRequest> {
    let mut used: HashSet<String> = HashSet::new();
    let base = transcript.len();
    requests
        .into_iter()
        .enumerate()
        .map(|(i, mut req)| {
            if req.request_id.is_empty()
                || used.contains(&req.request_id)
                || transcript.has_request_id(&req.request_id)
            {
                let mut n = 0;
                let mut id = format!("call_{}_{}", base, i);
                while used.contains(&id) || transcript.has_request_id(&id) {
                    n += 1;
                    id = format!("call_{}_{}_{}", base, i, n);
                }
                tracing::debug!(original = %req.request_id, assigned = %id, "reassigning tool request id");
                req.request_id = id;
            }
            used.insert(req.request_id.clone());
            req
        })
        .collect()
}

/// True for errors that leave the exchange resumable with `resume`
pub fn is_resumable(err: &Error) -> bool {
    err.kind().is_transport() || err.kind() == ErrorKind::Cancelled
}
