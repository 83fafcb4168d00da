use super::{CompletionRequest, CompletionService};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum Scripted {
    Reply(String),
    Fail(String),
}

/// Scripted [`CompletionService`]: replies are consumed in order and every
/// request is recorded for inspection.
#[derive(Clone)]
pub struct MockCompletionClient {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(response.into()));
        self
    }

    /// Queue a failure; it surfaces as a 503 that already used up its retries.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.into()));
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionService for MockCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(text)) => Ok(text.trim().to_string()),
            Some(Scripted::Fail(message)) => Err(Error::RetriesExhausted {
                attempts: 1,
                last: Box::new(Error::Server {
                    status: 503,
                    body: message,
                }),
            }),
            None => Err(Error::Invariant(
                "MockCompletionClient has no scripted response left".to_string(),
            )),
        }
    }
}
