//! Scripted provider used by the dispatcher and store tests, plus a one-shot
//! local HTTP responder for the provider tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::DispatchError;
use crate::providers::{
    HistoryPayload, LlmProvider, ProviderKind, context_block, structured_history,
};
use crate::types::ChatMessage;

pub(crate) enum Script {
    Reply(&'static str),
    Empty,
    Fail,
}

/// Lets a test observe the provider while a call is pending
#[derive(Clone, Default)]
pub(crate) struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

pub(crate) type Calls = Arc<Mutex<Vec<(String, HistoryPayload)>>>;

pub(crate) struct ScriptedProvider {
    kind: ProviderKind,
    script: Mutex<VecDeque<Script>>,
    calls: Calls,
    gate: Option<Gate>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind, script: Vec<Script>) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into()),
            calls: Arc::default(),
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Calls {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn format_history(&self, prior: &[ChatMessage]) -> HistoryPayload {
        match self.kind {
            ProviderKind::Gemini => HistoryPayload::ContextBlock(context_block(prior)),
            ProviderKind::OpenAi => HistoryPayload::Turns(structured_history(prior)),
        }
    }

    async fn invoke(
        &self,
        prompt: &str,
        history: HistoryPayload,
    ) -> Result<Option<String>, DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), history));

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Script::Reply("ok")) {
            Script::Reply(text) => Ok(Some(text.to_string())),
            Script::Empty => Ok(None),
            Script::Fail => Err(DispatchError::Status {
                provider: self.kind,
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".to_string(),
            }),
        }
    }
}

/// Answer one HTTP request on a loopback port with `status` and a JSON
/// `body`. Returns the base URL and a handle yielding the raw request.
pub(crate) async fn serve_once(
    status: &'static str,
    body: &'static str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if request_complete(&raw) {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&raw).into_owned()
    });

    (base_url, handle)
}

/// Headers received and the body matches its content-length
fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    raw.len() >= header_end + 4 + content_length
}
