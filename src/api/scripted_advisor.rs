//! Implements the `Advisor` trait without a network connection.
//!
//! Note: this is compiled even in the "production" version of this app so that the advisor can be
//! exercised when `LIFTUP_IN_TEST_MODE` is set.

use crate::api::Advisor;
use crate::model::Message;
use crate::Result;
use anyhow::bail;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const DEFAULT_REPLY: &str = "Una buena primera práctica es anotar cada ingreso y cada gasto, por \
pequeño que sea. Al final del mes resta los gastos de los ingresos: si el resultado es positivo, tu \
negocio está generando dinero. ¿Qué parte de tus números te gustaría entender mejor?";

/// Replies from a queue of canned answers, falling back to a fixed tip when the queue is empty.
/// Every prompt it receives is recorded.
#[derive(Clone, Default)]
pub struct ScriptedAdvisor {
    replies: Arc<Mutex<VecDeque<Result<String>>>>,
    prompts: Arc<Mutex<Vec<(String, Vec<Message>)>>>,
}

impl ScriptedAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queues a failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(anyhow::anyhow!(message.into())));
        self
    }

    /// The prompts and histories received so far.
    pub fn prompts(&self) -> Vec<(String, Vec<Message>)> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn push(&self, reply: Result<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }
}

#[async_trait::async_trait]
impl Advisor for ScriptedAdvisor {
    async fn generate(&self, prompt: &str, history: &[Message]) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((prompt.to_string(), history.to_vec()));
        }
        let next = match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(_) => bail!("The scripted advisor is unusable"),
        };
        next.unwrap_or_else(|| Ok(DEFAULT_REPLY.to_string()))
    }
}
