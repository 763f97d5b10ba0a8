//! Chat session: one transcript, one agent, one store.
//!
//! Maps each operator command onto a single transcript or agent operation
//! and keeps the session's own snapshot file current after every exchange.

use crate::agent::{Agent, FinalAnswer};
use tokio_util::sync::CancellationToken;
use toolchat_core::{Error, ErrorKind, ModelGateway, Result, Transcript, TranscriptStore};

/// Outcome of `send`/`retry`: the exchange itself plus the autosave that
/// followed it. Autosave failures never abort the session.
#[derive(Debug)]
pub struct Exchange {
    pub answer: Result<FinalAnswer>,
    pub autosave: Result<String>,
}

pub struct ChatSession<G: ModelGateway> {
    agent: Agent<G>,
    transcript: Transcript,
    store: TranscriptStore,
    session_name: String,
}

impl<G: ModelGateway> ChatSession<G> {
    /// Fresh session with an empty transcript
    pub fn new(agent: Agent<G>, store: TranscriptStore) -> Self {
        let session_name = store.new_session_name();
        Self {
            agent,
            transcript: Transcript::new(),
            store,
            session_name,
        }
    }

    /// Session hydrated from the rolling history. A corrupt history yields
    /// an empty transcript and the diagnostic.
    pub fn resume_history(agent: Agent<G>, store: TranscriptStore) -> (Self, Option<Error>) {
        let (transcript, diagnostic) = store.load_history();
        let mut session = Self::new(agent, store);
        tracing::debug!(turns = transcript.len(), "history loaded");
        session.transcript = transcript;
        (session, diagnostic)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn agent(&self) -> &Agent<G> {
        &self.agent
    }

    pub fn model(&self) -> &str {
        self.agent.gateway().model()
    }

    /// Snapshot name autosaves are written to
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// New user message
    pub async fn send(&mut self, text: &str, cancel: &CancellationToken) -> Exchange {
        let answer = self
            .agent
            .advance_cancellable(&mut self.transcript, text, cancel)
            .await;
        self.after_exchange(answer)
    }

    /// Resubmit the transcript without a new user turn
    pub async fn retry(&mut self, cancel: &CancellationToken) -> Exchange {
        let answer = self.agent.resume(&mut self.transcript, cancel).await;
        self.after_exchange(answer)
    }

    fn after_exchange(&mut self, answer: Result<FinalAnswer>) -> Exchange {
        if let Err(e) = &answer {
            tracing::info!(error = %e, "exchange did not complete");
        }
        let autosave = self.store.save_as(&self.session_name, &self.transcript);
        if let Err(e) = &autosave {
            tracing::warn!(error = %e, "autosave failed");
        }
        Exchange { answer, autosave }
    }

    /// Start over. Later autosaves go to a new snapshot file.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.session_name = self.store.new_session_name();
    }

    /// Write a fresh timestamped snapshot; returns its location
    pub fn save(&self) -> Result<String> {
        self.store.save_snapshot(&self.transcript)
    }

    /// Replace the transcript with a stored one.
    ///
    /// An unreadable file leaves the transcript untouched and is an error. A
    /// corrupt one empties the transcript and is returned as a diagnostic.
    pub fn load(&mut self, name: &str) -> Result<Option<Error>> {
        match self.store.load(name) {
            Ok(transcript) => {
                self.transcript.replace(transcript);
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::CorruptSnapshot => {
                tracing::warn!(error = %e, "loaded snapshot is corrupt, starting empty");
                self.transcript.clear();
                Ok(Some(e))
            }
            Err(e) => Err(e),
        }
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// Switch to `name`, or to the next configured model when `None`
    pub fn switch_model(&mut self, name: Option<&str>) -> Result<String> {
        let gateway = self.agent.gateway_mut();
        match name {
            Some(name) => {
                gateway.set_model(name)?;
                Ok(gateway.model().to_string())
            }
            None => gateway.cycle_model(),
        }
    }

    /// Rewrite the rolling history; returns its location
    pub fn close(self) -> Result<String> {
        self.store.save_history(&self.transcript)
    }
}
