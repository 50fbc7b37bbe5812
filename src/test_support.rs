//! Scripted backend used by the session and monitor tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::backend::{Backend, BackendError, ChatRequest, ChatResponse, ResponseMetadata};
use crate::language::Language;

#[derive(Debug, Clone)]
pub enum HealthScript {
    Ok,
    Fail,
    Hang,
}

#[derive(Debug, Clone)]
pub enum AskScript {
    Answer(ChatResponse),
    Fail(BackendError),
    Hang,
}

pub fn response(answer: &str, confidence: Option<f64>, sources: u32, lang: Language) -> ChatResponse {
    ChatResponse {
        answer: answer.to_string(),
        context_chunks: None,
        confidence_score: confidence,
        metadata: ResponseMetadata {
            num_sources: sources,
            detected_language: lang,
        },
    }
}

pub struct StubBackend {
    health: Mutex<HealthScript>,
    ask: Mutex<AskScript>,
    ask_gate: Mutex<Option<Arc<Notify>>>,
    health_calls: AtomicUsize,
    ask_calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl StubBackend {
    /// Healthy backend answering every question with "ok".
    pub fn new() -> Self {
        StubBackend {
            health: Mutex::new(HealthScript::Ok),
            ask: Mutex::new(AskScript::Answer(response("ok", None, 0, Language::En))),
            ask_gate: Mutex::new(None),
            health_calls: AtomicUsize::new(0),
            ask_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_health(&self, script: HealthScript) {
        *self.health.lock().unwrap() = script;
    }

    pub fn set_ask(&self, script: AskScript) {
        *self.ask.lock().unwrap() = script;
    }

    /// Hold every `ask` until the returned notify is triggered.
    pub fn gate_ask(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.ask_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn ask_calls(&self) -> usize {
        self.ask_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn health(&self) -> Result<(), BackendError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.health.lock().unwrap().clone();
        match script {
            HealthScript::Ok => Ok(()),
            HealthScript::Fail => Err(BackendError::Unreachable(
                "error trying to connect: tcp connect error: Connection refused (os error 111)"
                    .to_string(),
            )),
            HealthScript::Hang => std::future::pending().await,
        }
    }

    async fn ask(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        self.ask_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.ask_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let script = self.ask.lock().unwrap().clone();
        match script {
            AskScript::Answer(response) => Ok(response),
            AskScript::Fail(err) => Err(err),
            AskScript::Hang => std::future::pending().await,
        }
    }
}
