//! Conversation session: owns the transcript and connection status, and runs
//! one question/answer exchange at a time.
//!
//! All mutation goes through a single `watch` sender, so the controller and
//! the connection monitor never write concurrently and every change is
//! published to subscribers as a fresh snapshot.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError, ChatRequest, ChatResponse};
use crate::classify::{Category, ErrorClassifier};
use crate::config::BackendConfig;
use crate::language;
use crate::monitor::{self, ConnectionMonitor, ConnectionStatus, MonitorHandle, MonitorSettings};
use crate::transcript::{ChatMessage, MessageLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    AwaitingResponse,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub log: MessageLog,
    pub status: ConnectionStatus,
    pub phase: Phase,
}

impl SessionState {
    fn new() -> Self {
        let mut log = MessageLog::new();
        log.append(ChatMessage::welcome());
        SessionState {
            log,
            status: ConnectionStatus::Checking,
            phase: Phase::Idle,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.snapshot()
    }

    /// Input should be disabled while this is true.
    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Empty input, a request already in flight, or the session has ended.
    Ignored,
    Answered,
    Failed(Category),
    /// The session was shut down while the question was outstanding.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: String,
    pub startup_script: String,
    pub request_timeout: Duration,
    pub monitor: MonitorSettings,
}

impl From<&BackendConfig> for SessionSettings {
    fn from(config: &BackendConfig) -> Self {
        SessionSettings {
            base_url: config.url.clone(),
            startup_script: config.startup_script.clone(),
            request_timeout: config.request_timeout(),
            monitor: MonitorSettings {
                probe_timeout: config.probe_timeout(),
                interval: config.probe_interval(),
            },
        }
    }
}

struct Inner {
    state: Arc<watch::Sender<SessionState>>,
    backend: Arc<dyn Backend>,
    classifier: ErrorClassifier,
    settings: SessionSettings,
    cancel: CancellationToken,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cheaply cloneable handle to one conversation. The session ends when
/// [`Session::shutdown`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>, settings: SessionSettings) -> Self {
        let (state, _) = watch::channel(SessionState::new());
        let classifier = ErrorClassifier::new(&settings.base_url, &settings.startup_script);

        tracing::info!("Session created for {}", settings.base_url);

        Session {
            inner: Arc::new(Inner {
                state: Arc::new(state),
                backend,
                classifier,
                settings,
                cancel: CancellationToken::new(),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.settings.base_url
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Start the connection monitor. Calling it again, or after shutdown,
    /// does nothing. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let Ok(mut monitor) = self.inner.monitor.lock() else {
            return;
        };
        if monitor.is_some() {
            return;
        }

        let state = Arc::clone(&self.inner.state);
        *monitor = Some(ConnectionMonitor::spawn(
            Arc::clone(&self.inner.backend),
            self.inner.settings.monitor,
            self.inner.cancel.child_token(),
            move |status| publish_status(&state, status),
        ));
        tracing::debug!("Connection monitor started");
    }

    /// End the session: stop the monitor and abandon any outstanding question.
    pub fn shutdown(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        tracing::info!("Session shutting down");
        if let Ok(monitor) = self.inner.monitor.lock() {
            if let Some(handle) = monitor.as_ref() {
                handle.stop();
            }
        }
        self.inner.cancel.cancel();
    }

    #[cfg(test)]
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Ask one question. Resolves once the exchange has been recorded in the
    /// transcript (or immediately, if the submission is ignored).
    pub async fn submit(&self, input: &str) -> SubmitOutcome {
        let query = input.trim();
        if query.is_empty() || self.inner.cancel.is_cancelled() {
            return SubmitOutcome::Ignored;
        }

        let accepted = self.inner.state.send_if_modified(|state| {
            if state.phase != Phase::Idle {
                return false;
            }
            state.log.append(ChatMessage::user(query));
            state.phase = Phase::Submitting;
            true
        });
        if !accepted {
            tracing::debug!("Submit ignored: a request is already in flight");
            return SubmitOutcome::Ignored;
        }

        let request = ChatRequest {
            query: query.to_string(),
            language: language::detect(query),
        };
        tracing::info!(language = request.language.code(), "Submitting question");

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => None,
            result = self.exchange(&request) => Some(result),
        };

        match result {
            Some(Ok(response)) => {
                self.record_answer(response);
                SubmitOutcome::Answered
            }
            Some(Err(failure)) => SubmitOutcome::Failed(self.record_failure(&failure)),
            None => {
                tracing::info!("Question abandoned on shutdown");
                self.set_phase(Phase::Idle);
                SubmitOutcome::Aborted
            }
        }
    }

    async fn exchange(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let backend = self.inner.backend.as_ref();

        let preflight = monitor::probe(backend, self.inner.settings.monitor.probe_timeout).await;
        match preflight {
            Ok(()) => publish_status(&self.inner.state, ConnectionStatus::Connected),
            Err(e) => {
                tracing::warn!("Pre-flight probe failed: {}", e);
                publish_status(&self.inner.state, ConnectionStatus::Disconnected);
                // Any failed probe means the question is never sent
                return Err(if matches!(e, BackendError::Unreachable(_)) {
                    e
                } else {
                    BackendError::Unreachable(e.to_string())
                });
            }
        }

        self.set_phase(Phase::AwaitingResponse);

        let timeout = self.inner.settings.request_timeout;
        match tokio::time::timeout(timeout, backend.ask(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Unreachable(format!(
                "request timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn record_answer(&self, response: ChatResponse) {
        tracing::info!(
            sources = response.metadata.num_sources,
            confidence = ?response.confidence_score,
            "Answer received"
        );
        let message = ChatMessage::answer(
            response.answer,
            response.confidence_score,
            response.metadata.num_sources,
            response.metadata.detected_language,
        );
        self.inner.state.send_modify(|state| {
            state.log.append(message);
            state.phase = Phase::Completed;
        });
        self.set_phase(Phase::Idle);
    }

    fn record_failure(&self, failure: &BackendError) -> Category {
        let classified = self.inner.classifier.classify(failure);
        tracing::warn!(category = %classified.category, "Question failed: {}", failure);

        self.inner.state.send_modify(|state| {
            state.log.append(ChatMessage::error(classified.message));
            state.phase = Phase::Failed;
        });
        self.set_phase(Phase::Idle);
        classified.category
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.state.send_modify(|state| state.phase = phase);
    }
}

fn publish_status(state: &watch::Sender<SessionState>, status: ConnectionStatus) {
    state.send_if_modified(|s| {
        if s.status == status {
            return false;
        }
        tracing::info!("Connection status: {:?} -> {:?}", s.status, status);
        s.status = status;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::test_support::{response, AskScript, HealthScript, StubBackend};
    use crate::transcript::Role;

    fn settings() -> SessionSettings {
        SessionSettings::from(&crate::config::Config::default().backend)
    }

    fn session_with(backend: &Arc<StubBackend>) -> Session {
        Session::new(backend.clone(), settings())
    }

    #[tokio::test]
    async fn test_new_session_is_seeded_with_welcome() {
        let backend = Arc::new(StubBackend::new());
        let session = session_with(&backend);

        let state = session.snapshot();
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].role, Role::Assistant);
        assert!(!state.messages()[0].is_error);
        assert_eq!(state.status, ConnectionStatus::Checking);
        assert_eq!(state.phase, Phase::Idle);
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let backend = Arc::new(StubBackend::new());
        let session = session_with(&backend);

        for input in ["", "   ", "\n\t "] {
            assert_eq!(session.submit(input).await, SubmitOutcome::Ignored);
        }

        let state = session.snapshot();
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(backend.health_calls(), 0);
        assert_eq!(backend.ask_calls(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_answer() {
        let backend = Arc::new(StubBackend::new());
        backend.set_ask(AskScript::Answer(response(
            "Rabindranath Tagore",
            Some(0.92),
            3,
            Language::En,
        )));
        let session = session_with(&backend);

        let outcome = session.submit("Who is the author of Oporichita story?").await;
        assert_eq!(outcome, SubmitOutcome::Answered);

        let state = session.snapshot();
        assert_eq!(state.messages().len(), 3);

        let question = &state.messages()[1];
        assert_eq!(question.role, Role::User);
        assert_eq!(question.content, "Who is the author of Oporichita story?");

        let answer = state.log.last().unwrap();
        assert_eq!(answer.role, Role::Assistant);
        assert_eq!(answer.content, "Rabindranath Tagore");
        assert_eq!(answer.confidence_score, Some(0.92));
        assert_eq!(answer.source_count, Some(3));
        assert_eq!(answer.detected_language, Some(Language::En));
        assert!(!answer.is_error);

        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.status, ConnectionStatus::Connected);

        let sent = backend.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].language, Language::En);
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_not_shown() {
        let backend = Arc::new(StubBackend::new());
        let session = session_with(&backend);

        for score in [7.5, -0.1] {
            backend.set_ask(AskScript::Answer(response("উত্তর", Some(score), 2, Language::Bn)));
            assert_eq!(session.submit("প্রশ্ন").await, SubmitOutcome::Answered);

            let state = session.snapshot();
            let answer = state.log.last().unwrap();
            assert_eq!(answer.confidence_score, None);
            let meta = answer.meta_line().unwrap();
            assert!(!meta.contains("নির্ভরযোগ্যতা"), "{}", meta);
        }
    }

    #[tokio::test]
    async fn test_question_is_trimmed_and_language_detected() {
        let backend = Arc::new(StubBackend::new());
        let session = session_with(&backend);

        session.submit("  অপরিচিতা গল্পের লেখক কে?  ").await;

        let sent = backend.requests();
        assert_eq!(sent[0].query, "অপরিচিতা গল্পের লেখক কে?");
        assert_eq!(sent[0].language, Language::Bn);
        assert_eq!(session.snapshot().messages()[1].content, "অপরিচিতা গল্পের লেখক কে?");
    }

    #[tokio::test]
    async fn test_backend_language_is_shown_not_the_hint() {
        let backend = Arc::new(StubBackend::new());
        backend.set_ask(AskScript::Answer(response("উত্তর", None, 1, Language::Bn)));
        let session = session_with(&backend);

        session.submit("Hello").await;

        assert_eq!(backend.requests()[0].language, Language::En);
        let answer = session.snapshot().log.last().cloned().unwrap();
        assert_eq!(answer.detected_language, Some(Language::Bn));
    }

    #[tokio::test]
    async fn test_failed_preflight_skips_question() {
        let backend = Arc::new(StubBackend::new());
        backend.set_health(HealthScript::Fail);
        let session = session_with(&backend);

        let outcome = session.submit("Hello").await;
        assert_eq!(outcome, SubmitOutcome::Failed(Category::NetworkUnreachable));
        assert_eq!(backend.ask_calls(), 0);

        let state = session.snapshot();
        assert_eq!(state.messages().len(), 3);
        let last = state.log.last().unwrap();
        assert!(last.is_error);
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("ব্যাকএন্ড সার্ভার চালু করুন"));
        assert!(last.content.contains("start the backend server"));
        assert!(last.content.lines().last().unwrap().starts_with("Error: "));
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_preflight_is_unreachable() {
        let backend = Arc::new(StubBackend::new());
        backend.set_health(HealthScript::Hang);
        let session = session_with(&backend);

        let outcome = session.submit("Hello").await;
        assert_eq!(outcome, SubmitOutcome::Failed(Category::NetworkUnreachable));
        assert_eq!(backend.ask_calls(), 0);
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let backend = Arc::new(StubBackend::new());
        backend.set_ask(AskScript::Fail(BackendError::Http {
            status: 500,
            body: r#"{"detail":"boom"}"#.to_string(),
        }));
        let session = session_with(&backend);

        let outcome = session.submit("Hello").await;
        assert_eq!(outcome, SubmitOutcome::Failed(Category::HttpError));

        let last = session.snapshot().log.last().cloned().unwrap();
        assert!(last.is_error);
        assert!(last.content.contains("500"));
        assert!(last.content.contains("boom"));
        assert_eq!(last.confidence_score, None);
    }

    #[tokio::test]
    async fn test_decode_failure_is_unknown() {
        let backend = Arc::new(StubBackend::new());
        backend.set_ask(AskScript::Fail(BackendError::Decode("missing field `metadata`".into())));
        let session = session_with(&backend);

        let outcome = session.submit("Hello").await;
        assert_eq!(outcome, SubmitOutcome::Failed(Category::Unknown));
        assert!(session
            .snapshot()
            .log
            .last()
            .unwrap()
            .content
            .ends_with("missing field `metadata`"));
    }

    #[tokio::test]
    async fn test_concurrent_submit_is_ignored() {
        let backend = Arc::new(StubBackend::new());
        let gate = backend.gate_ask();
        let session = session_with(&backend);
        let mut rx = session.subscribe();

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("first question").await })
        };

        let state = rx
            .wait_for(|s| s.phase == Phase::AwaitingResponse)
            .await
            .unwrap()
            .clone();
        // The question is already visible while the answer is outstanding
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.log.last().unwrap().content, "first question");
        assert!(state.is_busy());

        assert_eq!(session.submit("second question").await, SubmitOutcome::Ignored);
        assert_eq!(session.snapshot().messages().len(), 2);
        assert_eq!(backend.health_calls(), 1);
        assert_eq!(backend.ask_calls(), 1);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), SubmitOutcome::Answered);
        assert_eq!(session.snapshot().messages().len(), 3);
        assert_eq!(backend.ask_calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let backend = Arc::new(StubBackend::new());
        backend.set_health(HealthScript::Fail);
        let session = session_with(&backend);

        session.submit("Hello").await;
        backend.set_health(HealthScript::Ok);
        let outcome = session.submit("Hello again").await;

        assert_eq!(outcome, SubmitOutcome::Answered);
        let state = session.snapshot();
        assert_eq!(state.messages().len(), 5);
        assert_eq!(state.status, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_times_out() {
        let backend = Arc::new(StubBackend::new());
        backend.set_ask(AskScript::Hang);
        let session = session_with(&backend);

        let outcome = session.submit("Hello").await;
        assert_eq!(outcome, SubmitOutcome::Failed(Category::NetworkUnreachable));

        let last = session.snapshot().log.last().cloned().unwrap();
        assert!(last.content.ends_with("Error: request timed out after 60s"));
        assert_eq!(session.snapshot().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_in_flight_question() {
        let backend = Arc::new(StubBackend::new());
        backend.set_ask(AskScript::Hang);
        let session = session_with(&backend);
        let mut rx = session.subscribe();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("Hello").await })
        };
        rx.wait_for(|s| s.phase == Phase::AwaitingResponse)
            .await
            .unwrap();

        session.shutdown();
        assert_eq!(pending.await.unwrap(), SubmitOutcome::Aborted);

        let state = session.snapshot();
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.phase, Phase::Idle);

        assert!(session.is_shut_down());
        assert_eq!(session.submit("again").await, SubmitOutcome::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_single_monitor() {
        let backend = Arc::new(StubBackend::new());
        let session = session_with(&backend);
        let mut rx = session.subscribe();

        session.start();
        session.start();

        rx.wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.health_calls(), 1);

        // Monitor failures only change the status, never the transcript
        backend.set_health(HealthScript::Fail);
        tokio::time::sleep(Duration::from_secs(30)).await;
        let state = session.snapshot();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.messages().len(), 1);
        assert_eq!(backend.health_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_monitor() {
        let backend = Arc::new(StubBackend::new());
        let session = session_with(&backend);

        session.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.shutdown();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(backend.health_calls(), 1);

        // Cannot be restarted once ended
        session.start();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.health_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_handle_stops_monitor() {
        let backend = Arc::new(StubBackend::new());
        let session = session_with(&backend);

        session.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(session);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(backend.health_calls(), 1);
    }
}
