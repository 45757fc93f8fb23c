use cardlink::adapters::{RecordingGateway, ScriptedInputProvider, SimulatedCard, StaticPrescriptions};
use cardlink::core::orchestrator::InboundEvent;
use cardlink::domain::model::{FailureReason, Iccsn, ProtocolState, StepKind};
use cardlink::{CardLinkConfig, Notifier, PairingOrchestrator, Session, SessionDriver};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
[pairing]
base_url = "https://mock.test.example.com/cardlink"
session_ttl_seconds = 600
sms_code_timeout_seconds = 5
sms_retry_limit = 2

[gateway]
endpoint = "https://rest.example.com"
api_key = "test-key"
sender = "Apotheke"
"#;

fn load_config() -> anyhow::Result<CardLinkConfig> {
    let mut file = NamedTempFile::new()?;
    file.write_all(CONFIG.as_bytes())?;
    let config = CardLinkConfig::from_file(file.path())?;
    config.validate_config()?;
    Ok(config)
}

fn iccsn() -> Iccsn {
    Iccsn::from_bytes(&[0x80, 0x27, 0x60, 0x01, 0x23])
}

struct Harness {
    orchestrator: Arc<PairingOrchestrator>,
    card: Arc<SimulatedCard>,
    gateway: Arc<RecordingGateway>,
}

fn harness(config: &CardLinkConfig, card: SimulatedCard) -> Harness {
    let card = Arc::new(card);
    let gateway = Arc::new(RecordingGateway::new());
    let notifier = Arc::new(Notifier::new(gateway.clone(), config.gateway.sender()));
    let orchestrator = Arc::new(PairingOrchestrator::new(
        card.clone(),
        notifier,
        card.clone(),
        config.pairing_settings(),
    ));
    Harness {
        orchestrator,
        card,
        gateway,
    }
}

fn start(config: &CardLinkConfig, card: &SimulatedCard) -> anyhow::Result<(Session, tokio::sync::mpsc::UnboundedReceiver<InboundEvent>)> {
    let mut session = Session::start(&config.pairing.base_url, config.session_ttl())?;
    let (events, stream) = session.event_channel();
    card.attach(events.clone());
    events.send(InboundEvent::CardInsertionRequested)?;
    events.send(InboundEvent::CardDetected { iccsns: vec![iccsn()] })?;
    events.send(InboundEvent::CanRequested)?;
    Ok((session, stream))
}

#[tokio::test]
async fn test_driver_runs_full_handshake() -> anyhow::Result<()> {
    let config = load_config()?;
    let h = harness(
        &config,
        SimulatedCard::new()
            .with_can("123456")
            .with_fixed_code("777777")
            .with_prescriptions(Arc::new(StaticPrescriptions::sample(&[iccsn()]))),
    );
    let input = Arc::new(
        ScriptedInputProvider::new()
            .answer(StepKind::Can, "000000")
            .answer(StepKind::Can, "123456")
            .answer(StepKind::PhoneNumber, "0151 23456789")
            .answer(StepKind::SmsCode, "777777"),
    );
    let driver = SessionDriver::new(h.orchestrator.clone(), input.clone(), config.sms_code_timeout());

    let (session, stream) = start(&config, &h.card)?;
    let mut session = driver.run(session, stream).await;

    assert_eq!(session.state(), &ProtocolState::Authenticated);
    assert_eq!(session.capabilities().len(), 1);
    assert_eq!(session.card_identifiers(), &[iccsn()]);

    let asked: Vec<(StepKind, u32)> = input.asked().iter().map(|r| (r.kind, r.attempt)).collect();
    assert_eq!(
        asked,
        vec![
            (StepKind::Can, 1),
            (StepKind::Can, 2),
            (StepKind::PhoneNumber, 1),
            (StepKind::SmsCode, 1),
        ]
    );

    if let Some(delivery) = session.take_delivery() {
        delivery.await?;
    }
    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "+4915123456789");
    assert_eq!(sent[0].sender, "Apotheke");
    assert!(sent[0].body.ends_with("777777"));

    let negotiator = h.orchestrator.negotiator(&session)?;
    let cards = session.card_identifiers().to_vec();
    let listing = negotiator.list_resources(&mut session, &cards).await?;
    assert_eq!(listing.available_prescription_lists.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_driver_stops_after_retry_limit() -> anyhow::Result<()> {
    let config = load_config()?;
    let h = harness(&config, SimulatedCard::new().with_fixed_code("777777"));
    let input = Arc::new(
        ScriptedInputProvider::new()
            .answer(StepKind::Can, "123456")
            .answer(StepKind::PhoneNumber, "+49 151 23456789")
            .answer(StepKind::SmsCode, "111111")
            .answer(StepKind::SmsCode, "222222")
            .answer(StepKind::SmsCode, "777777"),
    );
    let driver = SessionDriver::new(h.orchestrator.clone(), input.clone(), config.sms_code_timeout());

    let (session, stream) = start(&config, &h.card)?;
    let session = driver.run(session, stream).await;

    assert_eq!(session.failure_reason(), Some(&FailureReason::SmsRetriesExhausted));
    assert_eq!(session.sms_rejections(), 2);
    assert_eq!(
        input.asked().iter().filter(|r| r.kind == StepKind::SmsCode).count(),
        2
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_driver_times_out_waiting_for_sms_code() -> anyhow::Result<()> {
    let config = load_config()?;
    let h = harness(&config, SimulatedCard::new());
    // SMS code prompt gets no answer and is cancelled only after the timeout fires
    let input = Arc::new(SlowInput(
        ScriptedInputProvider::new()
            .answer(StepKind::Can, "123456")
            .answer(StepKind::PhoneNumber, "+4915123456789"),
    ));
    let driver = SessionDriver::new(h.orchestrator.clone(), input, config.sms_code_timeout());

    let (session, stream) = start(&config, &h.card)?;
    let session = driver.run(session, stream).await;

    assert_eq!(
        session.failure_reason().map(|r| r.code()),
        Some("sms-code-timeout".to_string())
    );
    Ok(())
}

/// Scripted answers; unanswered prompts hang instead of cancelling.
struct SlowInput(ScriptedInputProvider);

#[async_trait::async_trait]
impl cardlink::domain::ports::InputProvider for SlowInput {
    async fn request(
        &self,
        request: &cardlink::domain::model::PendingStepRequest,
    ) -> cardlink::domain::model::InputReply {
        match self.0.request(request).await {
            cardlink::domain::model::InputReply::Cancelled => std::future::pending().await,
            reply => reply,
        }
    }
}
