use crate::core::orchestrator::{InboundEvent, PairingOrchestrator};
use crate::core::session::Session;
use crate::domain::model::{InputReply, PendingStepRequest, ProtocolState, ResumeHandle, StepKind};
use crate::domain::ports::InputProvider;
use crate::utils::error::CardLinkError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

type AnswerFuture = Pin<Box<dyn Future<Output = Option<InputReply>> + Send>>;

/// Per-session event loop.
///
/// Owns the session while it runs, so events and answers for it are applied
/// strictly one at a time. Independent sessions get independent drivers.
pub struct SessionDriver {
    orchestrator: Arc<PairingOrchestrator>,
    input: Arc<dyn InputProvider>,
    sms_code_timeout: Duration,
    step_timeout: Option<Duration>,
}

enum Wake {
    Answer(Option<InputReply>),
    Event(Option<InboundEvent>),
}

/// 目前請求的等待狀態；期限依 handle 固定，事件不會重新計時
struct Prompt {
    handle: ResumeHandle,
    deadline: Option<Instant>,
    answer: Option<AnswerFuture>,
}

impl SessionDriver {
    pub fn new(
        orchestrator: Arc<PairingOrchestrator>,
        input: Arc<dyn InputProvider>,
        sms_code_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            input,
            sms_code_timeout,
            step_timeout: None,
        }
    }

    /// Upper bound for answering the CAN and phone number prompts.
    pub fn with_step_timeout(mut self, step_timeout: Option<Duration>) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    fn answer_timeout(&self, kind: StepKind) -> Option<Duration> {
        match kind {
            StepKind::SmsCode => Some(self.sms_code_timeout),
            StepKind::Can | StepKind::PhoneNumber => self.step_timeout,
        }
    }

    /// Runs until the session is terminal, or authenticated with its
    /// capabilities delivered, or the event stream closes.
    pub async fn run(&self, mut session: Session, mut events: mpsc::UnboundedReceiver<InboundEvent>) -> Session {
        tracing::info!(session = %session.token(), "🚀 Driving pairing session");

        let mut prompt: Option<Prompt> = None;

        while !Self::finished(&session) {
            match session.pending().cloned() {
                Some(request) => {
                    if prompt.as_ref().map(|p| p.handle) != Some(request.handle) {
                        let deadline = self.answer_timeout(request.kind).map(|limit| Instant::now() + limit);
                        prompt = Some(Prompt {
                            handle: request.handle,
                            deadline,
                            answer: None,
                        });
                    }
                    if let Some(p) = prompt.as_mut() {
                        if p.answer.is_none() {
                            p.answer = Some(self.ask(request, p.deadline));
                        }
                    }
                }
                None => prompt = None,
            }

            // 等待回答的同時仍處理新事件（例如卡片被移除）
            let wake = match prompt.as_mut().and_then(|p| p.answer.as_mut()) {
                Some(answer) => tokio::select! {
                    reply = answer => Wake::Answer(reply),
                    event = events.recv() => Wake::Event(event),
                },
                None => Wake::Event(events.recv().await),
            };

            if let (Wake::Answer(_), Some(p)) = (&wake, prompt.as_mut()) {
                p.answer = None;
            }

            match wake {
                Wake::Answer(reply) => self.apply_answer(&mut session, reply).await,
                Wake::Event(Some(event)) => self.apply_event(&mut session, event).await,
                Wake::Event(None) => {
                    if !session.state().is_authenticated() {
                        tracing::warn!(session = %session.token(), "Event stream closed, cancelling session");
                        self.orchestrator.cancel(&mut session);
                    }
                    break;
                }
            }
        }

        match session.state() {
            ProtocolState::Error(reason) => {
                tracing::error!(session = %session.token(), reason = %reason, "❌ Pairing failed: {}", reason.describe());
            }
            state => {
                tracing::info!(session = %session.token(), state = %state, "✅ Session driver finished");
            }
        }
        session
    }

    fn finished(session: &Session) -> bool {
        session.is_terminal()
            || (session.state() == &ProtocolState::Authenticated && !session.capabilities().is_empty())
    }

    fn ask(&self, request: PendingStepRequest, deadline: Option<Instant>) -> AnswerFuture {
        let input = self.input.clone();
        Box::pin(async move {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, input.request(&request)).await.ok(),
                None => Some(input.request(&request).await),
            }
        })
    }

    async fn apply_answer(&self, session: &mut Session, reply: Option<InputReply>) {
        let request = match session.pending().cloned() {
            Some(request) => request,
            None => return,
        };

        match reply {
            Some(InputReply::Value(value)) => {
                match self.orchestrator.supply(session, request.handle, &value).await {
                    Ok(_) => {}
                    Err(CardLinkError::StaleResumeHandle { handle }) => {
                        tracing::debug!(session = %session.token(), handle, "Stale answer ignored");
                    }
                    Err(e) => {
                        tracing::error!(session = %session.token(), step = %request.kind, error = %e, "❌ Answer could not be applied");
                    }
                }
            }
            Some(InputReply::Cancelled) => {
                tracing::info!(session = %session.token(), step = %request.kind, "User cancelled");
                self.orchestrator.cancel(session);
            }
            None => self.orchestrator.expire(session, request.kind),
        }
    }

    async fn apply_event(&self, session: &mut Session, event: InboundEvent) {
        let name = event.name();
        if let Err(e) = self.orchestrator.handle_event(session, event).await {
            tracing::warn!(session = %session.token(), event = name, error = %e, "Event rejected");
        }
    }
}
