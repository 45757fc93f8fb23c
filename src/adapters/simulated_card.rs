use crate::core::negotiator::ProtocolCapability;
use crate::core::orchestrator::{InboundEvent, RandomCodeGenerator};
use crate::domain::model::{
    ActivationResult, Confirmation, PrescriptionEntry, PrescriptionList, PrescriptionListRequest,
    PrescriptionListing, SelectionRequest, SessionToken, StepKind, StepOutcome,
};
use crate::domain::ports::{CardSession, CodeGenerator, ResourceService};
use crate::utils::error::{NegotiationError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-process stand-in for the card/session layer and the CardLink server.
///
/// Issues the SMS code (as [`CodeGenerator`]) and checks it (as
/// [`CardSession`]). With an attached event stream it also emits the next
/// step request after each accepted answer, like the real session layer.
pub struct SimulatedCard {
    can: Option<String>,
    fixed_code: Option<String>,
    generator: RandomCodeGenerator,
    issued: Mutex<Option<String>>,
    resumed: Mutex<Vec<StepKind>>,
    events: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
    prescriptions: Option<Arc<dyn ResourceService>>,
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCard {
    pub fn new() -> Self {
        Self {
            can: None,
            fixed_code: None,
            generator: RandomCodeGenerator::default(),
            issued: Mutex::new(None),
            resumed: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            prescriptions: None,
        }
    }

    /// Only this CAN is accepted. Without it any non-empty CAN passes.
    pub fn with_can(mut self, can: impl Into<String>) -> Self {
        self.can = Some(can.into());
        self
    }

    pub fn with_fixed_code(mut self, code: impl Into<String>) -> Self {
        self.fixed_code = Some(code.into());
        self
    }

    pub fn with_code_length(mut self, length: usize) -> Self {
        self.generator = RandomCodeGenerator::new(length);
        self
    }

    pub fn with_prescriptions(mut self, service: Arc<dyn ResourceService>) -> Self {
        self.prescriptions = Some(service);
        self
    }

    pub fn attach(&self, events: mpsc::UnboundedSender<InboundEvent>) {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(events);
        }
    }

    pub fn resumed_steps(&self) -> Vec<StepKind> {
        self.resumed.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn issued_code(&self) -> Option<String> {
        self.issued.lock().ok().and_then(|code| code.clone())
    }

    fn emit(&self, event: InboundEvent) {
        if let Ok(slot) = self.events.lock() {
            if let Some(events) = slot.as_ref() {
                let _ = events.send(event);
            }
        }
    }
}

#[async_trait]
impl CardSession for SimulatedCard {
    async fn resume(&self, _token: &SessionToken, kind: StepKind, value: &str) -> Result<StepOutcome> {
        if let Ok(mut resumed) = self.resumed.lock() {
            resumed.push(kind);
        }

        let outcome = match kind {
            StepKind::Can => match &self.can {
                Some(expected) if expected != value => StepOutcome::Rejected,
                _ => StepOutcome::Accepted,
            },
            StepKind::PhoneNumber => StepOutcome::Accepted,
            StepKind::SmsCode => {
                if self.issued_code().as_deref() == Some(value) {
                    StepOutcome::Accepted
                } else {
                    StepOutcome::Rejected
                }
            }
        };

        if outcome == StepOutcome::Accepted {
            match kind {
                StepKind::Can => self.emit(InboundEvent::PhoneNumberRequested),
                StepKind::PhoneNumber => self.emit(InboundEvent::SmsCodeRequested),
                StepKind::SmsCode => {
                    self.emit(InboundEvent::InteractionComplete);
                    self.emit(InboundEvent::AuthenticationCompleted {
                        result: ActivationResult::ok(),
                        capabilities: self
                            .prescriptions
                            .iter()
                            .map(|service| ProtocolCapability::Prescriptions(service.clone()))
                            .collect(),
                    });
                }
            }
        }
        Ok(outcome)
    }
}

impl CodeGenerator for SimulatedCard {
    fn generate(&self) -> String {
        let code = self
            .fixed_code
            .clone()
            .unwrap_or_else(|| self.generator.generate());
        if let Ok(mut issued) = self.issued.lock() {
            *issued = Some(code.clone());
        }
        code
    }
}

/// Fixed prescription lists answering every request.
pub struct StaticPrescriptions {
    lists: Vec<PrescriptionList>,
    selections: Mutex<Vec<SelectionRequest>>,
}

impl StaticPrescriptions {
    pub fn new(lists: Vec<PrescriptionList>) -> Self {
        Self {
            lists,
            selections: Mutex::new(Vec::new()),
        }
    }

    /// One list per card, with a couple of sample entries.
    pub fn sample(iccsns: &[crate::domain::model::Iccsn]) -> Self {
        let lists = iccsns
            .iter()
            .map(|iccsn| PrescriptionList {
                iccsn: iccsn.clone(),
                entries: vec![
                    PrescriptionEntry {
                        index: 0,
                        label: "Ibuprofen 400 mg, 20 St.".to_string(),
                    },
                    PrescriptionEntry {
                        index: 1,
                        label: "Amoxicillin 1000 mg, 10 St.".to_string(),
                    },
                ],
            })
            .collect();
        Self::new(lists)
    }

    pub fn selections(&self) -> Vec<SelectionRequest> {
        self.selections.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ResourceService for StaticPrescriptions {
    async fn request_prescriptions(
        &self,
        request: &PrescriptionListRequest,
    ) -> std::result::Result<PrescriptionListing, NegotiationError> {
        let lists = self
            .lists
            .iter()
            .filter(|list| request.iccsns.is_empty() || request.iccsns.contains(&list.iccsn))
            .cloned()
            .collect();
        Ok(PrescriptionListing {
            message_id: request.message_id,
            available_prescription_lists: lists,
        })
    }

    async fn select_prescriptions(
        &self,
        selection: &SelectionRequest,
    ) -> std::result::Result<Confirmation, NegotiationError> {
        if let Ok(mut selections) = self.selections.lock() {
            selections.push(selection.clone());
        }
        Ok(Confirmation {
            message_id: selection.message_id,
            iccsn: selection.iccsn.clone(),
            accepted: true,
        })
    }
}
