use cardlink::adapters::{HttpResourceClient, RecordingGateway, SimulatedCard, StaticPrescriptions};
use cardlink::core::negotiator::ProtocolCapability;
use cardlink::core::notifier::Notifier;
use cardlink::core::orchestrator::{InboundEvent, PairingSettings};
use cardlink::domain::model::{ActivationResult, Iccsn, Selection, SupplyOption};
use cardlink::domain::ports::ResourceService;
use cardlink::utils::error::NegotiationError;
use cardlink::{PairingOrchestrator, Session};
use httpmock::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn iccsn() -> Iccsn {
    Iccsn::from_bytes(&[0x80, 0x27, 0x60, 0x01, 0x23])
}

fn orchestrator() -> PairingOrchestrator {
    let card = Arc::new(SimulatedCard::new());
    let notifier = Arc::new(Notifier::new(Arc::new(RecordingGateway::new()), "Cardlink"));
    PairingOrchestrator::new(card.clone(), notifier, card, PairingSettings::default())
}

async fn authenticated(
    orchestrator: &PairingOrchestrator,
    service: Arc<dyn ResourceService>,
) -> anyhow::Result<Session> {
    let mut session = Session::start("https://mock.test.example.com/cardlink", Duration::from_secs(600))?;
    orchestrator
        .handle_event(&mut session, InboundEvent::CardInsertionRequested)
        .await?;
    orchestrator
        .handle_event(&mut session, InboundEvent::CardDetected { iccsns: vec![iccsn()] })
        .await?;
    orchestrator
        .handle_event(
            &mut session,
            InboundEvent::AuthenticationCompleted {
                result: ActivationResult::ok(),
                capabilities: vec![ProtocolCapability::Prescriptions(service)],
            },
        )
        .await?;
    Ok(session)
}

#[tokio::test]
async fn test_list_and_select_once_per_list() -> anyhow::Result<()> {
    let orchestrator = orchestrator();
    let service = Arc::new(StaticPrescriptions::sample(&[iccsn()]));
    let mut session = authenticated(&orchestrator, service.clone()).await?;

    let negotiator = orchestrator.negotiator(&session)?;
    let cards = session.card_identifiers().to_vec();
    let listing = negotiator.list_resources(&mut session, &cards).await?;
    assert_eq!(listing.available_prescription_lists.len(), 1);
    assert_eq!(listing.list(&iccsn()).map(|l| l.entries.len()), Some(2));

    let first = negotiator
        .select_resources(&mut session, &iccsn(), &Selection::all(SupplyOption::Delivery))
        .await?;
    assert!(first.accepted);

    let second = negotiator
        .select_resources(&mut session, &iccsn(), &Selection::indices(vec![0], SupplyOption::OnPremise))
        .await;
    assert_eq!(
        second,
        Err(NegotiationError::DuplicateSelection {
            list_id: iccsn().to_string()
        })
    );
    assert_eq!(session.confirmation(&iccsn()), Some(&first));

    let submitted = service.selections();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].prescription_index_list, vec![String::new()]);
    Ok(())
}

#[tokio::test]
async fn test_second_negotiator_sees_earlier_selection() -> anyhow::Result<()> {
    let orchestrator = orchestrator();
    let service = Arc::new(StaticPrescriptions::sample(&[iccsn()]));
    let mut session = authenticated(&orchestrator, service.clone()).await?;

    let first = orchestrator.negotiator(&session)?;
    first.list_resources(&mut session, &[iccsn()]).await?;
    let confirmation = first
        .select_resources(&mut session, &iccsn(), &Selection::all(SupplyOption::OnPremise))
        .await?;

    // 同一 session 換一個 negotiator 也不能再選一次
    let second = orchestrator.negotiator(&session)?;
    second.list_resources(&mut session, &[iccsn()]).await?;
    let result = second
        .select_resources(&mut session, &iccsn(), &Selection::indices(vec![1], SupplyOption::Delivery))
        .await;

    assert_eq!(
        result,
        Err(NegotiationError::DuplicateSelection {
            list_id: iccsn().to_string()
        })
    );
    assert_eq!(session.confirmation(&iccsn()), Some(&confirmation));
    assert_eq!(service.selections().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_listing_can_be_repeated_with_fresh_ids() -> anyhow::Result<()> {
    let orchestrator = orchestrator();
    let mut session = authenticated(&orchestrator, Arc::new(StaticPrescriptions::sample(&[iccsn()]))).await?;
    let negotiator = orchestrator.negotiator(&session)?;

    let first = negotiator.list_resources(&mut session, &[iccsn()]).await?;
    let second = negotiator.list_resources(&mut session, &[iccsn()]).await?;
    assert_ne!(first.message_id, second.message_id);
    Ok(())
}

#[tokio::test]
async fn test_select_requires_prior_listing() -> anyhow::Result<()> {
    let orchestrator = orchestrator();
    let mut session = authenticated(&orchestrator, Arc::new(StaticPrescriptions::sample(&[iccsn()]))).await?;
    let negotiator = orchestrator.negotiator(&session)?;

    let result = negotiator
        .select_resources(&mut session, &iccsn(), &Selection::all(SupplyOption::OnPremise))
        .await;
    assert!(matches!(result, Err(NegotiationError::UnknownList { .. })));
    Ok(())
}

#[tokio::test]
async fn test_negotiator_requires_authentication() -> anyhow::Result<()> {
    let orchestrator = orchestrator();
    let session = Session::start("https://mock.test.example.com/cardlink", Duration::from_secs(600))?;

    let result = orchestrator.negotiator(&session);
    assert!(matches!(result, Err(NegotiationError::NotAuthenticated { .. })));
    Ok(())
}

#[tokio::test]
async fn test_http_service_session_expiry() -> anyhow::Result<()> {
    let server = MockServer::start();
    let list_mock = server.mock(|when, then| {
        when.method(POST).path("/prescriptions/list");
        then.status(401);
    });

    let orchestrator = orchestrator();
    // token only matters for the Authorization header
    let client = HttpResourceClient::new(
        &server.base_url(),
        cardlink::domain::model::SessionToken::new("expired-token"),
        Duration::from_secs(2),
    )?;
    let mut session = authenticated(&orchestrator, Arc::new(client)).await?;
    let negotiator = orchestrator.negotiator(&session)?;

    let result = negotiator.list_resources(&mut session, &[iccsn()]).await;
    list_mock.assert();
    assert_eq!(result, Err(NegotiationError::SessionExpired));
    Ok(())
}

#[tokio::test]
async fn test_http_selection_wire_format() -> anyhow::Result<()> {
    let server = MockServer::start();
    let list_id = iccsn();
    let list_mock = server.mock(|when, then| {
        when.method(POST).path("/prescriptions/list");
        then.status(200).json_body(serde_json::json!({
            "messageId": "6f1c2d38-3c1c-4a4c-9d55-0c6fbb7c8d11",
            "availablePrescriptionLists": [{
                "iccsn": "8027600123",
                "entries": [{ "index": 0, "label": "Ibuprofen 400" }]
            }]
        }));
    });
    let select_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/prescriptions/select")
            .json_body_partial(
                r#"{
                    "iccsn": "8027600123",
                    "prescriptionIndexList": [""],
                    "supplyOptionsType": "delivery",
                    "name": "Erika Mustermann",
                    "address": "Heidestrasse 17, 51147 Koeln"
                }"#,
            );
        then.status(200).json_body(serde_json::json!({
            "messageId": "0b8f5e1a-3a43-4d59-8b0e-7d2c7e0c4b22",
            "iccsn": "8027600123",
            "accepted": true
        }));
    });

    let orchestrator = orchestrator();
    let client = HttpResourceClient::new(
        &server.base_url(),
        cardlink::domain::model::SessionToken::new("tok"),
        Duration::from_secs(2),
    )?;
    let mut session = authenticated(&orchestrator, Arc::new(client)).await?;
    let negotiator = orchestrator.negotiator(&session)?;

    negotiator.list_resources(&mut session, &[list_id.clone()]).await?;
    let selection = Selection::all(SupplyOption::Delivery).with_delivery(
        cardlink::domain::model::DeliveryDetails {
            name: Some("Erika Mustermann".to_string()),
            address: Some("Heidestrasse 17, 51147 Koeln".to_string()),
            ..Default::default()
        },
    );
    let confirmation = negotiator.select_resources(&mut session, &list_id, &selection).await?;

    list_mock.assert();
    select_mock.assert();
    assert!(confirmation.accepted);
    Ok(())
}
