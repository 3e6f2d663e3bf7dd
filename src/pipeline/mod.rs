//! Single-in-flight upload-and-classify pipeline
//!
//! [`UploadPipeline`] owns the lifecycle of one selected file:
//!
//! ```text
//! Idle --select--> PreviewReady --(auto)--> Submitting --ok--> Succeeded
//!                                                \--err--> Failed
//! Succeeded | Failed --select--> PreviewReady ...
//! any --clear--> Idle
//! ```
//!
//! Network work is split off into a [`PendingSubmission`] so that the
//! pipeline itself never awaits. Every request carries the generation that
//! was current when it was issued; [`UploadPipeline::complete`] applies an
//! outcome only if no later selection, submission, or clear has happened
//! since. Superseded outcomes are dropped silently.
//!
//! A credential rejected by the inference service ends the session through
//! the pipeline's [`SessionHandle`] before the failure is reported.

pub mod media;
pub mod prediction;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::config::{PipelineConfig, SubmitPolicy};
use crate::error::{LeafscanError, Result};
use crate::inference::InferenceClient;
use crate::session::SessionHandle;

pub use media::{MediaFile, PreviewHandle, PreviewMinter, SelectedMedia};
pub use prediction::{
    confidence_percent, describe_label, scanned_ago, History, HistoryEntry, PredictionResult,
    ERROR_LABEL,
};

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing selected
    Idle,
    /// Preview minted for a new selection
    PreviewReady,
    /// Request outstanding
    Submitting,
    /// Latest request produced a classification
    Succeeded,
    /// Latest request failed; the current result is the sentinel
    Failed,
}

/// Notifications sent to pipeline subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The state machine moved
    StateChanged {
        /// Previous state
        from: PipelineState,
        /// New state
        to: PipelineState,
    },
    /// The current result was replaced (`None` when discarded)
    ResultChanged(Option<PredictionResult>),
}

/// What [`UploadPipeline::complete`] did with an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Outcome applied; the pipeline is now in this state
    Applied(PipelineState),
    /// Applied as a failure because the credential was rejected; the
    /// session has been cleared and the pipeline is `Failed`
    SessionRejected,
    /// A newer request exists; the outcome was dropped
    Superseded,
}

/// The result of running a [`PendingSubmission`].
#[derive(Debug)]
pub struct SubmissionOutcome {
    generation: u64,
    credential: Option<String>,
    result: Result<PredictionResult>,
}

impl SubmissionOutcome {
    /// Generation of the request that produced this outcome
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the collaborator returned a classification
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A request issued by the pipeline but not yet sent.
///
/// Owns everything the request needs, so it can be awaited (or spawned)
/// while the pipeline keeps handling selections.
#[derive(Debug)]
#[must_use = "a submission does nothing until sent and completed"]
pub struct PendingSubmission {
    generation: u64,
    file: MediaFile,
    credential: Option<String>,
    client: Arc<dyn InferenceClient>,
}

impl PendingSubmission {
    /// Generation this request belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a bearer credential will be attached
    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    /// Performs the network call.
    pub async fn send(self) -> SubmissionOutcome {
        let result = self
            .client
            .classify(&self.file, self.credential.as_deref())
            .await;
        SubmissionOutcome {
            generation: self.generation,
            credential: self.credential,
            result,
        }
    }
}

/// Upload pipeline state machine
#[derive(Debug)]
pub struct UploadPipeline {
    inference: Arc<dyn InferenceClient>,
    credentials: SessionHandle,
    previews: Arc<dyn PreviewMinter>,
    policy: SubmitPolicy,
    state: PipelineState,
    selection: Option<SelectedMedia>,
    result: Option<PredictionResult>,
    history: History,
    generation: u64,
    in_flight: Option<u64>,
    events: broadcast::Sender<PipelineEvent>,
}

impl UploadPipeline {
    /// Creates an idle pipeline.
    pub fn new(
        config: &PipelineConfig,
        inference: Arc<dyn InferenceClient>,
        credentials: SessionHandle,
        previews: Arc<dyn PreviewMinter>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inference,
            credentials,
            previews,
            policy: config.submit_policy,
            state: PipelineState::Idle,
            selection: None,
            result: None,
            history: History::with_capacity(config.history_capacity),
            generation: 0,
            in_flight: None,
            events,
        }
    }

    /// Subscribes to state and result changes.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Current result, if any
    pub fn current_result(&self) -> Option<&PredictionResult> {
        self.result.as_ref()
    }

    /// Rolling history of successful classifications
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Current selection, if any
    pub fn selection(&self) -> Option<&SelectedMedia> {
        self.selection.as_ref()
    }

    /// Preview URI of the current selection
    pub fn preview_uri(&self) -> Option<&str> {
        self.selection
            .as_ref()
            .and_then(|s| s.preview.as_ref())
            .map(PreviewHandle::uri)
    }

    /// Selects `file` and immediately submits it.
    ///
    /// The previous selection's preview is released before the new one is
    /// minted, and any outstanding request is invalidated. A preview that
    /// cannot be minted is logged and skipped; classification still runs.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn select(&mut self, file: MediaFile) -> Result<PendingSubmission> {
        self.selection = None;
        self.invalidate();

        let preview = match PreviewHandle::mint(&self.previews, &file) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("No preview for {}: {:#}", file.name(), e);
                None
            }
        };
        tracing::debug!(file = file.name(), "Selected file");
        self.selection = Some(SelectedMedia { file, preview });

        self.set_result(None);
        self.transition(PipelineState::PreviewReady);
        self.submit()
    }

    /// Issues a request for the current selection.
    ///
    /// The credential is read from the session at this moment.
    ///
    /// # Errors
    ///
    /// - [`LeafscanError::Validation`] when nothing is selected, or the
    ///   selection already succeeded (submission happens once per selection;
    ///   only a failed attempt may be retried)
    /// - [`LeafscanError::SubmissionInFlight`] when a request for the
    ///   current selection is still outstanding
    /// - [`LeafscanError::Unauthenticated`] under
    ///   [`SubmitPolicy::RequireSession`] with no session; the pipeline moves
    ///   to `Failed` with the sentinel result
    pub fn submit(&mut self) -> Result<PendingSubmission> {
        let file = match &self.selection {
            Some(selection) => selection.file.clone(),
            None => {
                return Err(LeafscanError::Validation("no file selected".to_string()).into())
            }
        };
        if self.in_flight.is_some() {
            return Err(LeafscanError::SubmissionInFlight.into());
        }
        if !matches!(self.state, PipelineState::PreviewReady | PipelineState::Failed) {
            return Err(LeafscanError::Validation(format!(
                "{} was already classified; select it again to resubmit",
                file.name()
            ))
            .into());
        }

        let credential = self.credentials.bearer_token();
        if credential.is_none() && self.policy == SubmitPolicy::RequireSession {
            tracing::warn!("Refusing anonymous submission of {}", file.name());
            self.set_result(Some(PredictionResult::sentinel()));
            self.transition(PipelineState::Failed);
            return Err(LeafscanError::Unauthenticated.into());
        }

        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.transition(PipelineState::Submitting);

        Ok(PendingSubmission {
            generation: self.generation,
            file,
            credential,
            client: Arc::clone(&self.inference),
        })
    }

    /// Applies `outcome` if it belongs to the latest request.
    pub fn complete(&mut self, outcome: SubmissionOutcome) -> Completion {
        if self.in_flight != Some(outcome.generation) {
            tracing::debug!(
                generation = outcome.generation,
                current = self.generation,
                "Dropping superseded response"
            );
            return Completion::Superseded;
        }
        self.in_flight = None;

        match outcome.result {
            Ok(result) => {
                self.history.record(HistoryEntry {
                    result: result.clone(),
                    captured_at: Utc::now(),
                });
                self.set_result(Some(result));
                self.transition(PipelineState::Succeeded);
                Completion::Applied(self.state)
            }
            Err(e) => {
                tracing::warn!("Classification failed: {:#}", e);
                let rejected = e
                    .downcast_ref::<LeafscanError>()
                    .map(LeafscanError::is_auth_rejection)
                    .unwrap_or(false);
                if rejected {
                    if let Some(token) = &outcome.credential {
                        self.credentials.invalidate(token);
                    }
                }
                self.set_result(Some(PredictionResult::sentinel()));
                self.transition(PipelineState::Failed);
                if rejected {
                    Completion::SessionRejected
                } else {
                    Completion::Applied(self.state)
                }
            }
        }
    }

    /// Selects, sends, and completes `file` in one step.
    ///
    /// Classification failures are reported through the sentinel result,
    /// not as an error.
    ///
    /// # Errors
    ///
    /// Besides the [`submit`](Self::submit) errors, fails with
    /// [`LeafscanError::SessionExpired`] when the service rejected the
    /// credential. The session is already cleared at that point.
    pub async fn classify(&mut self, file: MediaFile) -> Result<&PredictionResult> {
        let pending = self.select(file)?;
        let outcome = pending.send().await;
        if self.complete(outcome) == Completion::SessionRejected {
            return Err(LeafscanError::SessionExpired(
                "credential rejected by the inference service".to_string(),
            )
            .into());
        }
        self.result
            .as_ref()
            .ok_or_else(|| LeafscanError::Inference("no result recorded".to_string()).into())
    }

    /// Releases the selection and result and returns to `Idle`.
    ///
    /// Outstanding requests are invalidated. History is kept.
    pub fn clear(&mut self) {
        self.selection = None;
        self.invalidate();
        self.set_result(None);
        self.transition(PipelineState::Idle);
    }

    fn invalidate(&mut self) {
        if self.in_flight.take().is_some() {
            tracing::debug!(generation = self.generation, "Invalidated in-flight request");
        }
        self.generation += 1;
    }

    fn set_result(&mut self, result: Option<PredictionResult>) {
        if self.result == result {
            return;
        }
        self.result = result;
        let _ = self
            .events
            .send(PipelineEvent::ResultChanged(self.result.clone()));
    }

    fn transition(&mut self, to: PipelineState) {
        let from = self.state;
        if from == to {
            return;
        }
        tracing::debug!(?from, ?to, "Pipeline transition");
        self.state = to;
        let _ = self.events.send(PipelineEvent::StateChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::token_store::{MemoryTokenStore, StoredToken};
    use crate::session::{AuthClient, SessionManager, TokenGrant, User};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Echoes the file name back as the label; names starting with `fail`
    /// produce a service error.
    #[derive(Debug, Default)]
    struct EchoInference {
        calls: AtomicUsize,
        credentials: Mutex<Vec<Option<String>>>,
    }

    #[async_trait::async_trait]
    impl InferenceClient for EchoInference {
        async fn classify(
            &self,
            file: &MediaFile,
            credential: Option<&str>,
        ) -> Result<PredictionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.credentials
                .lock()
                .unwrap()
                .push(credential.map(str::to_string));
            if file.name().starts_with("fail") {
                return Err(LeafscanError::Inference("status 500: boom".to_string()).into());
            }
            if file.name().starts_with("expired") && credential.is_some() {
                return Err(LeafscanError::SessionExpired("Invalid token".to_string()).into());
            }
            Ok(PredictionResult::new(file.name(), 0.75)?)
        }
    }

    #[derive(Debug, Default)]
    struct CountingMinter {
        minted: AtomicUsize,
        released: AtomicUsize,
    }

    impl PreviewMinter for CountingMinter {
        fn mint(&self, file: &MediaFile) -> Result<String> {
            let n = self.minted.fetch_add(1, Ordering::SeqCst);
            Ok(format!("mem://{}/{}", n, file.name()))
        }

        fn release(&self, _uri: &str) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct NoAuth;

    #[async_trait::async_trait]
    impl AuthClient for NoAuth {
        async fn login(&self, _: &str, _: &str) -> Result<TokenGrant> {
            unreachable!()
        }
        async fn signup(&self, _: &str, _: &str) -> Result<TokenGrant> {
            unreachable!()
        }
        async fn fetch_identity(&self, _: &str) -> Result<User> {
            unreachable!()
        }
    }

    struct Fixture {
        pipeline: UploadPipeline,
        inference: Arc<EchoInference>,
        minter: Arc<CountingMinter>,
        sessions: SessionManager,
    }

    fn fixture(policy: SubmitPolicy, token: Option<&str>) -> Fixture {
        let store = match token {
            Some(t) => MemoryTokenStore::with_token(StoredToken::bearer(t)),
            None => MemoryTokenStore::default(),
        };
        let sessions = SessionManager::new(Arc::new(NoAuth), Arc::new(store)).unwrap();
        let inference = Arc::new(EchoInference::default());
        let minter = Arc::new(CountingMinter::default());
        let config = PipelineConfig {
            history_capacity: 2,
            submit_policy: policy,
            ..PipelineConfig::default()
        };
        let pipeline = UploadPipeline::new(
            &config,
            inference.clone(),
            sessions.handle(),
            minter.clone(),
        );
        Fixture {
            pipeline,
            inference,
            minter,
            sessions,
        }
    }

    fn file(name: &str) -> MediaFile {
        MediaFile::new(name, "image/png", vec![0u8; 4])
    }

    #[tokio::test]
    async fn test_select_moves_to_submitting_with_preview() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        let mut events = f.pipeline.subscribe();

        let pending = f.pipeline.select(file("a.png")).unwrap();
        assert_eq!(f.pipeline.state(), PipelineState::Submitting);
        assert_eq!(f.pipeline.preview_uri(), Some("mem://0/a.png"));
        assert!(!pending.is_authenticated());

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::StateChanged { to, .. } = event {
                states.push(to);
            }
        }
        assert_eq!(
            states,
            vec![PipelineState::PreviewReady, PipelineState::Submitting]
        );
    }

    #[tokio::test]
    async fn test_success_records_history() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, Some("tok"));

        let result = f.pipeline.classify(file("Healthy")).await.unwrap().clone();
        assert_eq!(result.label(), "Healthy");
        assert_eq!(f.pipeline.state(), PipelineState::Succeeded);
        assert_eq!(f.pipeline.history().len(), 1);
        assert_eq!(
            *f.inference.credentials.lock().unwrap(),
            vec![Some("tok".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failure_yields_sentinel_and_skips_history() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        f.pipeline.classify(file("Healthy")).await.unwrap();

        let result = f.pipeline.classify(file("fail.png")).await.unwrap().clone();
        assert!(result.is_sentinel());
        assert_eq!(f.pipeline.state(), PipelineState::Failed);
        assert_eq!(f.pipeline.history().len(), 1);
    }

    #[tokio::test]
    async fn test_late_response_for_superseded_selection_is_dropped() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);

        let first = f.pipeline.select(file("Healthy")).unwrap();
        let second = f.pipeline.select(file("fail-b.png")).unwrap();

        let second_outcome = second.send().await;
        let first_outcome = first.send().await;

        assert_eq!(
            f.pipeline.complete(second_outcome),
            Completion::Applied(PipelineState::Failed)
        );
        assert_eq!(f.pipeline.complete(first_outcome), Completion::Superseded);
        assert!(f.pipeline.current_result().unwrap().is_sentinel());
        assert!(f.pipeline.history().is_empty());
    }

    #[tokio::test]
    async fn test_clear_invalidates_in_flight_and_keeps_history() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        f.pipeline.classify(file("Healthy")).await.unwrap();

        let pending = f.pipeline.select(file("Late Blight")).unwrap();
        f.pipeline.clear();
        let outcome = pending.send().await;

        assert_eq!(f.pipeline.complete(outcome), Completion::Superseded);
        assert_eq!(f.pipeline.state(), PipelineState::Idle);
        assert!(f.pipeline.current_result().is_none());
        assert!(f.pipeline.preview_uri().is_none());
        assert_eq!(f.pipeline.history().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejected_while_in_flight() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        let _pending = f.pipeline.select(file("a.png")).unwrap();

        let err = f.pipeline.submit().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LeafscanError>(),
            Some(LeafscanError::SubmissionInFlight)
        ));
    }

    #[tokio::test]
    async fn test_resubmit_after_success_rejected() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        f.pipeline.classify(file("a.png")).await.unwrap();

        let err = f.pipeline.submit().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LeafscanError>(),
            Some(LeafscanError::Validation(_))
        ));
        assert_eq!(f.pipeline.state(), PipelineState::Succeeded);
        assert_eq!(f.pipeline.history().len(), 1);
        assert_eq!(f.inference.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_credential_ends_session() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, Some("tok"));

        let pending = f.pipeline.select(file("expired.png")).unwrap();
        let outcome = pending.send().await;
        assert_eq!(f.pipeline.complete(outcome), Completion::SessionRejected);

        assert!(!f.sessions.is_authenticated());
        assert_eq!(f.pipeline.state(), PipelineState::Failed);
        assert!(f.pipeline.current_result().unwrap().is_sentinel());
        assert!(f.pipeline.history().is_empty());
    }

    #[tokio::test]
    async fn test_classify_surfaces_rejected_credential() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, Some("tok"));

        let err = f.pipeline.classify(file("expired.png")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LeafscanError>(),
            Some(LeafscanError::SessionExpired(_))
        ));
        assert!(!f.sessions.is_authenticated());
    }

    #[tokio::test]
    async fn test_resubmit_after_failure_retries_same_selection() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        f.pipeline.classify(file("fail.png")).await.unwrap();
        assert_eq!(f.pipeline.state(), PipelineState::Failed);

        let retry = f.pipeline.submit().unwrap();
        assert_eq!(f.pipeline.state(), PipelineState::Submitting);
        let outcome = retry.send().await;
        f.pipeline.complete(outcome);
        assert_eq!(f.inference.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.minter.minted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_without_selection_fails() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        assert!(f.pipeline.submit().is_err());
        assert_eq!(f.pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_require_session_without_token_fails_locally() {
        let mut f = fixture(SubmitPolicy::RequireSession, None);

        let err = f.pipeline.select(file("a.png")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LeafscanError>(),
            Some(LeafscanError::Unauthenticated)
        ));
        assert_eq!(f.pipeline.state(), PipelineState::Failed);
        assert!(f.pipeline.current_result().unwrap().is_sentinel());
        assert_eq!(f.inference.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_previews_released_once_per_mint() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);

        f.pipeline.classify(file("a")).await.unwrap();
        f.pipeline.clear();
        f.pipeline.classify(file("b")).await.unwrap();
        let _pending = f.pipeline.select(file("c")).unwrap();
        assert_eq!(f.minter.minted.load(Ordering::SeqCst), 3);
        assert_eq!(f.minter.released.load(Ordering::SeqCst), 2);

        drop(f.pipeline);
        assert_eq!(f.minter.released.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_history_capacity_respected() {
        let mut f = fixture(SubmitPolicy::AllowAnonymous, None);
        for name in ["a", "b", "c"] {
            f.pipeline.classify(file(name)).await.unwrap();
        }
        let labels: Vec<_> = f
            .pipeline
            .history()
            .iter()
            .map(|e| e.result.label().to_string())
            .collect();
        assert_eq!(labels, vec!["c", "b"]);
    }
}
