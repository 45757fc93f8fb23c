use crate::core::session::Session;
use crate::domain::model::{
    Confirmation, EntrySelection, Iccsn, PrescriptionList, PrescriptionListRequest,
    PrescriptionListing, ProtocolState, Selection, SelectionRequest,
};
use crate::domain::ports::ResourceService;
use crate::utils::error::NegotiationError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 認證完成後由 session 層交付的協定能力
#[derive(Clone)]
pub enum ProtocolCapability {
    Prescriptions(Arc<dyn ResourceService>),
}

impl fmt::Debug for ProtocolCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolCapability::Prescriptions(_) => f.write_str("Prescriptions"),
        }
    }
}

/// Lists prescriptions for the card and submits one selection per list.
///
/// Holds no bookkeeping of its own: listed and confirmed lists are recorded
/// on the [`Session`], so every negotiator obtained for the same session
/// sees the same history.
pub struct ResourceNegotiator {
    service: Arc<dyn ResourceService>,
    timeout: Duration,
}

impl ResourceNegotiator {
    pub fn new(service: Arc<dyn ResourceService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Picks the prescription capability delivered with authentication.
    pub fn from_session(session: &Session, timeout: Duration) -> Result<Self, NegotiationError> {
        Self::check_session(session)?;

        let service = session
            .capabilities()
            .iter()
            .map(|capability| match capability {
                ProtocolCapability::Prescriptions(service) => service.clone(),
            })
            .next()
            .ok_or_else(|| NegotiationError::Service {
                message: "session offers no prescription capability".to_string(),
            })?;

        Ok(Self::new(service, timeout))
    }

    fn check_session(session: &Session) -> Result<(), NegotiationError> {
        if session.is_expired() {
            return Err(NegotiationError::SessionExpired);
        }
        if session.state() != &ProtocolState::Authenticated {
            return Err(NegotiationError::NotAuthenticated {
                state: session.state().to_string(),
            });
        }
        Ok(())
    }

    /// Requests the prescription lists for `card_identifiers`.
    ///
    /// May be called again on the same session; every call carries a fresh
    /// correlation id.
    pub async fn list_resources(
        &self,
        session: &mut Session,
        card_identifiers: &[Iccsn],
    ) -> Result<PrescriptionListing, NegotiationError> {
        Self::check_session(session)?;

        let request = PrescriptionListRequest {
            iccsns: card_identifiers.to_vec(),
            message_id: Uuid::new_v4(),
        };
        tracing::debug!(
            session = %session.token(),
            message_id = %request.message_id,
            cards = card_identifiers.len(),
            "Requesting prescription lists"
        );

        let listing = tokio::time::timeout(self.timeout, self.service.request_prescriptions(&request))
            .await
            .map_err(|_| NegotiationError::Timeout(self.timeout))??;

        if listing.message_id != request.message_id {
            tracing::warn!(
                expected = %request.message_id,
                received = %listing.message_id,
                "Prescription listing answered with a different correlation id"
            );
        }

        for list in &listing.available_prescription_lists {
            session.record_listed(list.clone());
        }

        tracing::info!(
            session = %session.token(),
            lists = listing.available_prescription_lists.len(),
            "💊 Prescription lists received"
        );
        Ok(listing)
    }

    /// Submits the selection for one listed group. At most once per `list_id`
    /// for the lifetime of the session.
    pub async fn select_resources(
        &self,
        session: &mut Session,
        list_id: &Iccsn,
        selection: &Selection,
    ) -> Result<Confirmation, NegotiationError> {
        Self::check_session(session)?;

        if session.confirmation(list_id).is_some() {
            return Err(NegotiationError::DuplicateSelection {
                list_id: list_id.to_string(),
            });
        }
        let list = session.listed(list_id).ok_or_else(|| NegotiationError::UnknownList {
            list_id: list_id.to_string(),
        })?;
        Self::check_indices(list, list_id, selection)?;

        let request = SelectionRequest::new(list_id, selection, Uuid::new_v4());
        let confirmation = tokio::time::timeout(self.timeout, self.service.select_prescriptions(&request))
            .await
            .map_err(|_| NegotiationError::Timeout(self.timeout))??;

        tracing::info!(
            session = %session.token(),
            list = %list_id,
            accepted = confirmation.accepted,
            "✅ Prescription selection submitted"
        );
        session.record_confirmation(list_id.clone(), confirmation.clone());
        Ok(confirmation)
    }

    fn check_indices(list: &PrescriptionList, list_id: &Iccsn, selection: &Selection) -> Result<(), NegotiationError> {
        if let EntrySelection::Indices(indices) = &selection.entries {
            if indices.is_empty() {
                return Err(NegotiationError::InvalidSelection {
                    list_id: list_id.to_string(),
                    reason: "no entries selected".to_string(),
                });
            }
            if let Some(missing) = indices
                .iter()
                .find(|i| !list.entries.iter().any(|entry| entry.index == **i))
            {
                return Err(NegotiationError::InvalidSelection {
                    list_id: list_id.to_string(),
                    reason: format!("entry {} is not part of the list", missing),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{PrescriptionEntry, SupplyOption};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeService {
        lists: Vec<PrescriptionList>,
        selections: Mutex<Vec<SelectionRequest>>,
        delay: Option<Duration>,
    }

    impl FakeService {
        fn new() -> Self {
            Self {
                lists: vec![PrescriptionList {
                    iccsn: Iccsn::from_bytes(&[0x80, 0x27]),
                    entries: vec![
                        PrescriptionEntry {
                            index: 0,
                            label: "Ibuprofen 400".to_string(),
                        },
                        PrescriptionEntry {
                            index: 1,
                            label: "Amoxicillin 1000".to_string(),
                        },
                    ],
                }],
                selections: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ResourceService for FakeService {
        async fn request_prescriptions(
            &self,
            request: &PrescriptionListRequest,
        ) -> Result<PrescriptionListing, NegotiationError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(PrescriptionListing {
                message_id: request.message_id,
                available_prescription_lists: self.lists.clone(),
            })
        }

        async fn select_prescriptions(
            &self,
            selection: &SelectionRequest,
        ) -> Result<Confirmation, NegotiationError> {
            self.selections.lock().unwrap().push(selection.clone());
            Ok(Confirmation {
                message_id: selection.message_id,
                iccsn: selection.iccsn.clone(),
                accepted: true,
            })
        }
    }

    fn negotiator(service: FakeService) -> ResourceNegotiator {
        ResourceNegotiator::new(Arc::new(service), Duration::from_secs(5))
    }

    fn authenticated_session() -> Session {
        let mut session = Session::start("https://example.com/cardlink", Duration::from_secs(60)).unwrap();
        session.transition(ProtocolState::Authenticated, "test");
        session
    }

    #[tokio::test]
    async fn test_requires_authenticated_session() {
        let mut session = Session::start("https://example.com/cardlink", Duration::from_secs(60)).unwrap();
        let negotiator = negotiator(FakeService::new());
        let result = negotiator.list_resources(&mut session, &[]).await;
        assert!(matches!(result, Err(NegotiationError::NotAuthenticated { .. })));
    }

    #[tokio::test]
    async fn test_expired_session() {
        let mut session = Session::start("https://example.com/cardlink", Duration::ZERO).unwrap();
        session.transition(ProtocolState::Authenticated, "test");
        let negotiator = negotiator(FakeService::new());
        let result = negotiator.list_resources(&mut session, &[]).await;
        assert_eq!(result, Err(NegotiationError::SessionExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_times_out() {
        let mut session = authenticated_session();
        let mut service = FakeService::new();
        service.delay = Some(Duration::from_secs(30));
        let negotiator = negotiator(service);
        let result = negotiator.list_resources(&mut session, &[]).await;
        assert_eq!(result, Err(NegotiationError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn test_unknown_list_is_rejected() {
        let mut session = authenticated_session();
        let negotiator = negotiator(FakeService::new());
        let result = negotiator
            .select_resources(&mut session, &Iccsn::from_bytes(&[1]), &Selection::all(SupplyOption::Delivery))
            .await;
        assert!(matches!(result, Err(NegotiationError::UnknownList { .. })));
    }

    #[tokio::test]
    async fn test_selection_indices_must_exist() {
        let mut session = authenticated_session();
        let negotiator = negotiator(FakeService::new());
        let listing = negotiator.list_resources(&mut session, &[]).await.unwrap();
        let list_id = listing.available_prescription_lists[0].iccsn.clone();

        let result = negotiator
            .select_resources(&mut session, &list_id, &Selection::indices(vec![7], SupplyOption::Shipment))
            .await;
        assert!(matches!(result, Err(NegotiationError::InvalidSelection { .. })));

        // 失敗的提交不佔用這份清單
        let confirmation = negotiator
            .select_resources(&mut session, &list_id, &Selection::indices(vec![1], SupplyOption::Shipment))
            .await
            .unwrap();
        assert!(confirmation.accepted);
    }

    #[tokio::test]
    async fn test_listing_can_be_repeated() {
        let mut session = authenticated_session();
        let negotiator = negotiator(FakeService::new());
        let first = negotiator.list_resources(&mut session, &[]).await.unwrap();
        let second = negotiator.list_resources(&mut session, &[]).await.unwrap();
        assert_ne!(first.message_id, second.message_id);
        assert_eq!(first.available_prescription_lists, second.available_prescription_lists);
    }

    #[tokio::test]
    async fn test_selection_is_once_per_session_not_per_negotiator() {
        let mut session = authenticated_session();
        let service = Arc::new(FakeService::new());
        let first = ResourceNegotiator::new(service.clone(), Duration::from_secs(5));
        let listing = first.list_resources(&mut session, &[]).await.unwrap();
        let list_id = listing.available_prescription_lists[0].iccsn.clone();
        first
            .select_resources(&mut session, &list_id, &Selection::all(SupplyOption::OnPremise))
            .await
            .unwrap();

        let second = ResourceNegotiator::new(service.clone(), Duration::from_secs(5));
        second.list_resources(&mut session, &[]).await.unwrap();
        let result = second
            .select_resources(&mut session, &list_id, &Selection::all(SupplyOption::Delivery))
            .await;

        assert!(matches!(result, Err(NegotiationError::DuplicateSelection { .. })));
        assert_eq!(service.selections.lock().unwrap().len(), 1);
        assert_eq!(
            session.confirmation(&list_id).map(|c| c.iccsn.clone()),
            Some(list_id)
        );
    }
}
