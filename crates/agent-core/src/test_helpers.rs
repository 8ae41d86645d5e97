//! Shared test helpers for orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::provider::{
    Completion, FragmentStream, LlmProvider, ModelFragment, ModelInfo, ModelRequest, ProviderInfo,
};

/// A mock provider that replays scripted fragment sequences.
///
/// Each call to `stream` consumes the next round and records the request.
/// Running out of rounds is reported as a provider error.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Vec<Result<ModelFragment>>>>,
    requests: Mutex<Vec<ModelRequest>>,
    title: Mutex<Option<String>>,
    cancel_mid_stream: Mutex<Option<CancellationToken>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Vec<ModelFragment>>) -> Self {
        Self::with_results(
            rounds
                .into_iter()
                .map(|round| round.into_iter().map(Ok).collect())
                .collect(),
        )
    }

    pub fn with_results(rounds: Vec<Vec<Result<ModelFragment>>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
            title: Mutex::new(None),
            cancel_mid_stream: Mutex::new(None),
        }
    }

    /// Answer the title completion with this text
    pub fn title(self, title: &str) -> Self {
        *self.title.lock().unwrap() = Some(title.to_string());
        self
    }

    /// Cancel `token` when the second fragment of the next round is pulled
    pub fn cancel_mid_stream(self, token: CancellationToken) -> Self {
        *self.cancel_mid_stream.lock().unwrap() = Some(token);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn text(s: &str) -> ModelFragment {
    ModelFragment::Text(s.to_string())
}

pub fn call(name: &str, args: serde_json::Value, token: Option<&str>) -> ModelFragment {
    ModelFragment::ToolCall {
        name: name.to_string(),
        args,
        continuation_token: token.map(String::from),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "scripted".into(),
            models: vec![ModelInfo {
                id: "scripted".into(),
                supports_vision: true,
            }],
            supports_tools: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, _request: ModelRequest) -> Result<Completion> {
        let content = self
            .title
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AgentError::Provider("no completion scripted".into()))?;
        Ok(Completion {
            content,
            model: "scripted".into(),
        })
    }

    async fn stream(&self, request: ModelRequest) -> Result<FragmentStream> {
        self.requests.lock().unwrap().push(request);
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Provider("script exhausted".into()))?;

        let cancel = self.cancel_mid_stream.lock().unwrap().take();
        let stream = futures::stream::iter(round).enumerate().map(move |(i, fragment)| {
            if i == 1 {
                if let Some(token) = &cancel {
                    token.cancel();
                }
            }
            fragment
        });
        Ok(Box::pin(stream))
    }
}
