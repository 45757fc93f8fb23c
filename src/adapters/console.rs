use crate::domain::model::{InputReply, PendingStepRequest, StepKind};
use crate::domain::ports::InputProvider;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

/// 從終端機讀取使用者輸入；空白行或 `q` 視為取消
pub struct ConsoleInputProvider {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for ConsoleInputProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleInputProvider {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl InputProvider for ConsoleInputProvider {
    async fn request(&self, request: &PendingStepRequest) -> InputReply {
        let mut stdout = tokio::io::stdout();
        let prompt = format!("{} (empty line or 'q' cancels): ", request.prompt);
        if stdout.write_all(prompt.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return InputReply::Cancelled;
        }

        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => {
                let answer = line.trim();
                if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
                    InputReply::Cancelled
                } else {
                    InputReply::Value(answer.to_string())
                }
            }
            Ok(None) => InputReply::Cancelled,
            Err(e) => {
                tracing::warn!("Failed to read from stdin: {}", e);
                InputReply::Cancelled
            }
        }
    }
}

/// Answers prompts from a fixed script, in order per step kind.
///
/// Once the answers for a kind are used up, further prompts of that kind
/// are cancelled.
#[derive(Default)]
pub struct ScriptedInputProvider {
    answers: Mutex<HashMap<StepKind, VecDeque<String>>>,
    asked: Mutex<Vec<PendingStepRequest>>,
}

impl ScriptedInputProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, kind: StepKind, value: impl Into<String>) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.entry(kind).or_default().push_back(value.into());
        }
        self
    }

    /// Every request presented so far.
    pub fn asked(&self) -> Vec<PendingStepRequest> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InputProvider for ScriptedInputProvider {
    async fn request(&self, request: &PendingStepRequest) -> InputReply {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(request.clone());
        }

        let next = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.get_mut(&request.kind).and_then(VecDeque::pop_front));

        match next {
            Some(value) => {
                tracing::debug!(step = %request.kind, attempt = request.attempt, "Scripted answer");
                InputReply::Value(value)
            }
            None => InputReply::Cancelled,
        }
    }
}
