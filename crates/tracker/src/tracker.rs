use crate::audit::{AuditEvent, AuditLog};
use crate::collaborators::{CancellationService, PayloadBuilder, RemarkLog};
use crate::error::{Result, TrackerError};
use crate::state::{transition, Event, Failure, IdentifierPolicy, Step};
use crate::store::DocumentStore;
use chrono::{NaiveDateTime, Utc};
use do_ecf_core::validation::is_valid_security_code;
use do_ecf_core::{FiscalDocument, InvoiceData, SendState};
use gateway::{GatewayClient, GatewayError, GatewayReceipt, GatewayStatus, SubmitReply};
use std::sync::Arc;

/// Outcome of a single tracker operation on one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub document_id: String,
    pub from: SendState,
    pub to: SendState,
    pub contacted_gateway: bool,
    /// Set when the gateway could not be reached; the document is then
    /// `not_sent`.
    pub connection_error: Option<String>,
}

impl TransitionResult {
    fn unchanged(doc: &FiscalDocument, contacted_gateway: bool) -> Self {
        Self {
            document_id: doc.id.clone(),
            from: doc.send_state,
            to: doc.send_state,
            contacted_gateway,
            connection_error: None,
        }
    }

    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Identifiers handed out when a document is signed, locally or by the
/// gateway.
#[derive(Debug, Clone, Default)]
pub struct LocalSignature {
    pub security_code: String,
    pub signed_at: NaiveDateTime,
    pub tracking_id: Option<String>,
    pub signed_xml: Option<String>,
}

#[derive(Debug, Default)]
struct Identifiers {
    tracking_id: Option<String>,
    security_code: Option<String>,
    signed_at: Option<NaiveDateTime>,
    signed_xml: Option<String>,
}

impl Identifiers {
    fn from_receipt(receipt: &GatewayReceipt) -> Self {
        Self {
            tracking_id: receipt.track_id.clone(),
            security_code: receipt.security_code.clone(),
            signed_at: receipt.signed_at(),
            signed_xml: receipt.signed_xml(),
        }
    }

    fn apply(self, doc: &mut FiscalDocument, policy: IdentifierPolicy) {
        match policy {
            IdentifierPolicy::Keep => {}
            IdentifierPolicy::FillEmpty => {
                fill_text(&mut doc.tracking_id, self.tracking_id);
                fill_text(&mut doc.security_code, self.security_code);
                fill_text(&mut doc.signed_xml, self.signed_xml);
                if doc.signed_at.is_none() {
                    doc.signed_at = self.signed_at;
                }
            }
            IdentifierPolicy::Replace => {
                replace(&mut doc.tracking_id, self.tracking_id);
                replace(&mut doc.security_code, self.security_code);
                replace(&mut doc.signed_xml, self.signed_xml);
                replace(&mut doc.signed_at, self.signed_at);
            }
        }
    }
}

fn fill_text(slot: &mut Option<String>, value: Option<String>) {
    let empty = slot.as_deref().map_or(true, |s| s.trim().is_empty());
    if empty {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            *slot = Some(value);
        }
    }
}

fn replace<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// What the gateway (or the operator) told us about one document.
#[derive(Debug)]
struct Observation {
    event: Event,
    identifiers: Identifiers,
    remarks: Vec<String>,
    detail: Option<String>,
    digest: Option<String>,
}

impl Observation {
    fn new(event: Event) -> Self {
        Self {
            event,
            identifiers: Identifiers::default(),
            remarks: Vec::new(),
            detail: None,
            digest: None,
        }
    }

    fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Counts of a scheduled batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub changed: usize,
    /// `(document id, error)` for each document the batch could not handle.
    pub failed: Vec<(String, String)>,
}

/// Drives fiscal documents through their submission lifecycle against the
/// e-CF gateway.
///
/// Every operation works on one document at a time and persists the new
/// state before any follow-up effect (remarks, cancellation) runs.
pub struct Tracker {
    store: DocumentStore,
    gateway: Arc<dyn GatewayClient>,
    builder: Arc<dyn PayloadBuilder>,
    remarks: Arc<dyn RemarkLog>,
    cancellation: Arc<dyn CancellationService>,
    audit: Option<AuditLog>,
}

impl Tracker {
    pub fn new(
        store: DocumentStore,
        gateway: Arc<dyn GatewayClient>,
        builder: Arc<dyn PayloadBuilder>,
        remarks: Arc<dyn RemarkLog>,
        cancellation: Arc<dyn CancellationService>,
    ) -> Self {
        Self {
            store,
            gateway,
            builder,
            remarks,
            cancellation,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Submits the document and records the gateway's verdict.
    ///
    /// A connection failure is not an error: the document moves to
    /// `not_sent` and the result carries the failure. Terminal documents
    /// fail without a network call.
    pub async fn submit(&self, doc: &mut FiscalDocument) -> Result<TransitionResult> {
        if doc.send_state.is_delivered() {
            return Err(TrackerError::AlreadyDelivered {
                document_id: doc.id.clone(),
            });
        }
        if doc.send_state.is_terminal() {
            return Err(TrackerError::AlreadyRefused {
                document_id: doc.id.clone(),
            });
        }

        let payload = self
            .builder
            .build(doc)
            .map_err(|messages| TrackerError::Validation {
                document_id: doc.id.clone(),
                messages,
            })?;

        tracing::info!(document_id=%doc.id, ncf=%doc.ncf, state=%doc.send_state, "submitting e-CF");
        let mut observation = match self.gateway.submit(&payload).await {
            Err(GatewayError::MissingConfiguration(what)) => {
                return Err(TrackerError::MissingConfiguration(what.to_string()))
            }
            Err(e) => Observation::new(Event::UnexpectedReply).with_detail(e.to_string()),
            Ok(SubmitReply::ConnectionFailed(err)) => {
                Observation::new(Event::ConnectionFailed).with_detail(err)
            }
            Ok(SubmitReply::Received(receipt)) => match receipt.gateway_status() {
                Some(status) => Observation {
                    identifiers: Identifiers::from_receipt(&receipt),
                    remarks: receipt.remarks(),
                    ..Observation::new(Event::Received(status))
                },
                None => Observation::new(Event::UnexpectedReply).with_detail(format!(
                    "reply without a known status: {}",
                    receipt.status.as_deref().unwrap_or("none")
                )),
            },
            Ok(SubmitReply::AuthorityTimeout) => Observation::new(Event::AuthorityTimeout),
            Ok(SubmitReply::SchemaRejected(messages)) => Observation {
                remarks: messages,
                ..Observation::new(Event::SchemaRejected)
            },
            Ok(SubmitReply::Unexpected { status, body }) => {
                Observation::new(Event::UnexpectedReply).with_detail(format!("HTTP {status}: {body}"))
            }
        };
        observation.digest = Some(payload.digest);

        self.apply(doc, observation, true).await
    }

    /// Asks the gateway for the verdict of a submitted document. Missing
    /// tracking ids, unreadable replies and unknown statuses leave the
    /// document untouched.
    pub async fn poll_status(&self, doc: &mut FiscalDocument) -> Result<TransitionResult> {
        if !doc.send_state.awaits_verdict() {
            return Ok(TransitionResult::unchanged(doc, false));
        }
        let Some(track_id) = doc.tracking_id.clone().filter(|t| !t.trim().is_empty()) else {
            tracing::debug!(document_id=%doc.id, "no tracking id, nothing to poll");
            return Ok(TransitionResult::unchanged(doc, false));
        };

        let reply = match self.gateway.status(&track_id).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(document_id=%doc.id, track_id=%track_id, error=%e, "status query failed");
                return Ok(TransitionResult::unchanged(doc, true));
            }
        };

        let status = match reply.estado_or_pending().parse::<GatewayStatus>() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(document_id=%doc.id, track_id=%track_id, error=%e, "ignoring status reply");
                return Ok(TransitionResult::unchanged(doc, true));
            }
        };

        let observation = Observation {
            remarks: reply.remarks(),
            ..Observation::new(Event::Polled(status))
        };
        self.apply(doc, observation, true).await
    }

    /// Resubmits a document signed during contingency. Identifiers set at
    /// signature time are kept; missing ones are taken from the reply.
    pub async fn resend_contingency(&self, doc: &mut FiscalDocument) -> Result<TransitionResult> {
        if doc.send_state != SendState::Contingency {
            return Ok(TransitionResult::unchanged(doc, false));
        }
        self.submit(doc).await
    }

    /// Records that the document was signed locally while the authority
    /// was unreachable.
    pub async fn declare_contingency(
        &self,
        doc: &mut FiscalDocument,
        signature: LocalSignature,
    ) -> Result<TransitionResult> {
        if !is_valid_security_code(&signature.security_code) {
            return Err(TrackerError::Validation {
                document_id: doc.id.clone(),
                messages: vec![format!(
                    "security code {} must be 6 alphanumeric characters",
                    signature.security_code
                )],
            });
        }
        let observation = Observation {
            identifiers: Identifiers {
                tracking_id: signature.tracking_id,
                security_code: Some(signature.security_code),
                signed_at: Some(signature.signed_at),
                signed_xml: signature.signed_xml,
            },
            ..Observation::new(Event::ContingencyDeclared)
        };
        self.apply(doc, observation, false).await
    }

    /// Registers a freshly posted document and submits it unless it waits
    /// for its payment.
    pub async fn on_posted(
        &self,
        doc: &mut FiscalDocument,
        invoice: Option<&InvoiceData>,
    ) -> Result<TransitionResult> {
        self.store.insert(doc, invoice)?;
        self.audit(AuditEvent::for_document("document_posted", doc));
        tracing::info!(document_id=%doc.id, ncf=%doc.ncf, "e-CF posted");

        if !doc.sends_on_post() {
            tracing::info!(document_id=%doc.id, "immediate payment terms, waiting for payment");
            return Ok(TransitionResult::unchanged(doc, false));
        }
        self.submit(doc).await
    }

    /// Submits a document once its payment is registered. Documents that
    /// are terminal or already awaiting a verdict are left alone.
    pub async fn on_payment(&self, id: &str) -> Result<TransitionResult> {
        let mut doc = self.store.load(id)?;
        if !doc.send_state.is_sendable() {
            tracing::debug!(document_id=%doc.id, state=%doc.send_state, "payment registered, nothing to send");
            return Ok(TransitionResult::unchanged(&doc, false));
        }
        self.submit(&mut doc).await
    }

    /// Polls every document awaiting a verdict that has a tracking id.
    pub async fn check_pending(&self) -> Result<BatchReport> {
        let docs: Vec<_> = self
            .store
            .in_states(&[SendState::DeliveredPending, SendState::SignedPending])?
            .into_iter()
            .filter(|d| d.has_tracking_id())
            .collect();

        let mut report = BatchReport::default();
        for mut doc in docs {
            report.processed += 1;
            match self.poll_status(&mut doc).await {
                Ok(result) if result.changed() => report.changed += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(document_id=%doc.id, error=%e, "polling failed");
                    report.failed.push((doc.id.clone(), e.to_string()));
                }
            }
        }
        tracing::info!(processed = report.processed, changed = report.changed, failed = report.failed.len(), "pending e-CF check done");
        Ok(report)
    }

    /// Resends every document left in contingency.
    pub async fn resend_contingencies(&self) -> Result<BatchReport> {
        let docs = self.store.in_states(&[SendState::Contingency])?;

        let mut report = BatchReport::default();
        for mut doc in docs {
            report.processed += 1;
            match self.resend_contingency(&mut doc).await {
                Ok(result) => {
                    if result.changed() {
                        report.changed += 1;
                    }
                    if let Some(err) = result.connection_error {
                        report.failed.push((doc.id.clone(), err));
                    }
                }
                Err(e) => {
                    tracing::error!(document_id=%doc.id, error=%e, "contingency resend failed");
                    report.failed.push((doc.id.clone(), e.to_string()));
                }
            }
        }
        tracing::info!(processed = report.processed, changed = report.changed, failed = report.failed.len(), "contingency resend done");
        Ok(report)
    }

    async fn apply(
        &self,
        doc: &mut FiscalDocument,
        observation: Observation,
        contacted_gateway: bool,
    ) -> Result<TransitionResult> {
        let from = doc.send_state;
        let Observation {
            event,
            identifiers,
            remarks,
            detail,
            digest,
        } = observation;

        let (to, effects) = match transition(from, event) {
            Step::Stay => return Ok(TransitionResult::unchanged(doc, contacted_gateway)),
            Step::Fail(failure) => {
                let err = self.failure(doc, failure, event, remarks, detail);
                self.audit(
                    AuditEvent::for_document("transition_refused", doc)
                        .with_digest(digest)
                        .with_error(err.to_string()),
                );
                return Err(err);
            }
            Step::Move { to, effects } => (to, effects),
        };

        identifiers.apply(doc, effects.identifiers);
        doc.send_state = to;
        doc.last_error = match event {
            Event::ConnectionFailed => detail.clone(),
            _ => None,
        };
        doc.updated_at = Utc::now();
        self.store.save(doc)?;

        tracing::info!(document_id=%doc.id, ncf=%doc.ncf, from=%from, to=%to, event=%event, "e-CF state changed");
        let mut audit = AuditEvent::for_document("state_changed", doc)
            .with_from_state(from)
            .with_digest(digest)
            .with_message(event.to_string());
        if let Some(detail) = &detail {
            audit = audit.with_error(detail.clone());
        }
        self.audit(audit);

        if effects.log_remarks {
            let message = if remarks.is_empty() {
                format!("e-CF {} {}", doc.ncf, to)
            } else {
                format!("e-CF {} {}: {}", doc.ncf, to, remarks.join("; "))
            };
            self.remarks.log_remark(doc, &message);
        }

        if effects.cancel {
            let reason = if remarks.is_empty() {
                "refused by DGII".to_string()
            } else {
                format!("refused by DGII: {}", remarks.join("; "))
            };
            self.cancel(doc, &reason).await?;
        }

        Ok(TransitionResult {
            document_id: doc.id.clone(),
            from,
            to,
            contacted_gateway,
            connection_error: match event {
                Event::ConnectionFailed => detail,
                _ => None,
            },
        })
    }

    async fn cancel(&self, doc: &FiscalDocument, reason: &str) -> Result<()> {
        let cancelled = async {
            self.cancellation.unreconcile_payments(doc).await?;
            self.cancellation.cancel_document(doc, reason).await
        }
        .await;

        cancelled.map_err(|e| {
            tracing::error!(document_id=%doc.id, error=%e, "cancellation failed");
            TrackerError::Cancellation {
                document_id: doc.id.clone(),
                reason: e.to_string(),
            }
        })
    }

    fn failure(
        &self,
        doc: &FiscalDocument,
        failure: Failure,
        event: Event,
        remarks: Vec<String>,
        detail: Option<String>,
    ) -> TrackerError {
        let document_id = doc.id.clone();
        match failure {
            Failure::AlreadyDelivered => TrackerError::AlreadyDelivered { document_id },
            Failure::AlreadyRefused => TrackerError::AlreadyRefused { document_id },
            Failure::Validation => TrackerError::Validation {
                document_id,
                messages: remarks,
            },
            Failure::ServiceUnreachable => TrackerError::ServiceUnreachable {
                document_id,
                detail: detail.unwrap_or_else(|| event.to_string()),
            },
            Failure::IllegalTransition => TrackerError::IllegalTransition {
                document_id,
                from: doc.send_state,
                event: event.to_string(),
            },
        }
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StoredInvoiceBuilder;
    use crate::fixtures::consumer_invoice;
    use async_trait::async_trait;
    use do_ecf_core::DocumentType;
    use gateway::mock::MockGateway;
    use gateway::PollReply;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_cancel: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RemarkLog for Recorder {
        fn log_remark(&self, doc: &FiscalDocument, message: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remark {}: {message}", doc.id));
        }
    }

    #[async_trait]
    impl CancellationService for Recorder {
        async fn unreconcile_payments(&self, doc: &FiscalDocument) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("unreconcile {}", doc.id));
            Ok(())
        }

        async fn cancel_document(&self, doc: &FiscalDocument, _reason: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("cancel {}", doc.id));
            if self.fail_cancel {
                anyhow::bail!("ledger locked");
            }
            Ok(())
        }
    }

    struct Fixture {
        tracker: Tracker,
        gateway: Arc<MockGateway>,
        recorder: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        fixture_with(Recorder::default())
    }

    fn fixture_with(recorder: Recorder) -> Fixture {
        let store = DocumentStore::temporary().unwrap();
        let gateway = MockGateway::new();
        let recorder = Arc::new(recorder);
        let tracker = Tracker::new(
            store.clone(),
            gateway.clone(),
            Arc::new(StoredInvoiceBuilder::new(store)),
            recorder.clone(),
            recorder.clone(),
        );
        Fixture {
            tracker,
            gateway,
            recorder,
        }
    }

    impl Fixture {
        /// Stores a consumer invoice in `state` without submitting it.
        fn document(&self, id: &str, state: SendState) -> FiscalDocument {
            let ncf = format!("E32{:010}", self.tracker.store().list().unwrap().len() + 1);
            let mut doc = FiscalDocument::new(id, &ncf, DocumentType::Consumo, false);
            doc.send_state = state;
            self.tracker
                .store()
                .insert(&doc, Some(&consumer_invoice(&ncf)))
                .unwrap();
            doc
        }

        fn stored(&self, id: &str) -> FiscalDocument {
            self.tracker.store().load(id).unwrap()
        }
    }

    fn receipt(status: &str, track_id: &str, code: &str) -> GatewayReceipt {
        GatewayReceipt {
            status: Some(status.into()),
            track_id: Some(track_id.into()),
            security_code: Some(code.into()),
            signature_datetime: Some("2020-06-20 10:00:00".into()),
            ..Default::default()
        }
    }

    fn poll(estado: &str) -> PollReply {
        PollReply {
            estado: Some(estado.into()),
            mensajes: None,
        }
    }

    #[tokio::test]
    async fn accepted_submission_stores_identifiers() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway.push_receipt(receipt("Aceptado", "T1", "ABC123"));

        let result = f.tracker.submit(&mut doc).await.unwrap();

        assert_eq!(result.to, SendState::DeliveredAccepted);
        assert!(result.contacted_gateway);
        let stored = f.stored("INV/1");
        assert_eq!(stored, doc);
        assert_eq!(stored.tracking_id.as_deref(), Some("T1"));
        assert_eq!(stored.security_code.as_deref(), Some("ABC123"));
        assert_eq!(stored.signed_at.unwrap().to_string(), "2020-06-20 10:00:00");
        assert!(f.recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn delivered_documents_are_never_resent() {
        let f = fixture();
        for state in [SendState::DeliveredAccepted, SendState::ConditionallyAccepted] {
            let mut doc = f.document(state.as_str(), state);
            let err = f.tracker.submit(&mut doc).await.unwrap_err();
            assert!(matches!(err, TrackerError::AlreadyDelivered { .. }));
            assert_eq!(f.stored(state.as_str()).send_state, state);
        }
        assert_eq!(f.gateway.submit_calls(), 0);
    }

    #[tokio::test]
    async fn connection_failure_is_reported_as_not_sent() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway
            .push_submit(SubmitReply::ConnectionFailed("connection refused".into()));

        let result = f.tracker.submit(&mut doc).await.unwrap();

        assert_eq!(result.to, SendState::NotSent);
        assert_eq!(result.connection_error.as_deref(), Some("connection refused"));
        let stored = f.stored("INV/1");
        assert_eq!(stored.send_state, SendState::NotSent);
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn authority_timeout_leaves_document_signed_pending() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::NotSent);
        f.gateway.push_submit(SubmitReply::AuthorityTimeout);

        let result = f.tracker.submit(&mut doc).await.unwrap();

        assert_eq!(result.to, SendState::SignedPending);
        assert!(f.stored("INV/1").tracking_id.is_none());
    }

    #[tokio::test]
    async fn schema_and_unexpected_replies_keep_the_state() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway
            .push_submit(SubmitReply::SchemaRejected(vec!["TipoIngresos invalido".into()]));
        f.gateway.push_submit(SubmitReply::Unexpected {
            status: 502,
            body: "bad gateway".into(),
        });

        match f.tracker.submit(&mut doc).await.unwrap_err() {
            TrackerError::Validation { messages, .. } => {
                assert_eq!(messages, vec!["TipoIngresos invalido"])
            }
            other => panic!("unexpected error {other:?}"),
        }
        match f.tracker.submit(&mut doc).await.unwrap_err() {
            TrackerError::ServiceUnreachable { detail, .. } => assert!(detail.contains("502")),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(doc.send_state, SendState::ToSend);
        assert_eq!(f.stored("INV/1").send_state, SendState::ToSend);
    }

    #[tokio::test]
    async fn local_validation_failure_never_reaches_the_gateway() {
        let f = fixture();
        let mut doc = FiscalDocument::new("INV/1", "E3200000001", DocumentType::Consumo, false);
        f.tracker
            .store()
            .insert(&doc, Some(&consumer_invoice("E3200000001")))
            .unwrap();

        let err = f.tracker.submit(&mut doc).await.unwrap_err();

        assert!(matches!(err, TrackerError::Validation { .. }));
        assert_eq!(f.gateway.submit_calls(), 0);
        assert_eq!(f.stored("INV/1").send_state, SendState::ToSend);
    }

    #[tokio::test]
    async fn refusal_cancels_exactly_once() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway.push_receipt(GatewayReceipt {
            messages: Some(vec![serde_json::json!("RNC invalido")]),
            ..receipt("Rechazado", "T1", "ABC123")
        });

        let result = f.tracker.submit(&mut doc).await.unwrap();

        assert_eq!(result.to, SendState::DeliveredRefused);
        assert_eq!(
            f.recorder.calls(),
            vec![
                "remark INV/1: e-CF E320000000001 delivered_refused: RNC invalido",
                "unreconcile INV/1",
                "cancel INV/1",
            ]
        );
        assert!(f.stored("INV/1").tracking_id.is_none());

        // Refused documents are terminal for polling.
        let polled = f.tracker.poll_status(&mut doc).await.unwrap();
        assert!(!polled.changed());
        assert_eq!(f.recorder.calls().len(), 3);
    }

    #[tokio::test]
    async fn refused_documents_are_never_resent() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway.push_receipt(receipt("Rechazado", "T1", "ABC123"));
        f.tracker.submit(&mut doc).await.unwrap();

        let paid = f.tracker.on_payment("INV/1").await.unwrap();
        assert!(!paid.contacted_gateway);
        assert_eq!(paid.to, SendState::DeliveredRefused);

        let err = f.tracker.submit(&mut doc).await.unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyRefused { .. }));

        assert_eq!(f.gateway.submit_calls(), 1);
        assert_eq!(f.stored("INV/1").send_state, SendState::DeliveredRefused);
        assert_eq!(f.recorder.calls().len(), 3);
    }

    #[tokio::test]
    async fn failed_cancellation_keeps_the_refused_state() {
        let f = fixture_with(Recorder {
            fail_cancel: true,
            ..Default::default()
        });
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway.push_receipt(receipt("Rechazado", "T1", "ABC123"));

        let err = f.tracker.submit(&mut doc).await.unwrap_err();

        assert!(matches!(err, TrackerError::Cancellation { .. }));
        assert_eq!(f.stored("INV/1").send_state, SendState::DeliveredRefused);
    }

    #[tokio::test]
    async fn conditional_acceptance_logs_remarks() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway
            .push_receipt(receipt("AceptadoCondicional", "T1", "ABC123"));

        f.tracker.submit(&mut doc).await.unwrap();

        assert_eq!(doc.send_state, SendState::ConditionallyAccepted);
        assert_eq!(
            f.recorder.calls(),
            vec!["remark INV/1: e-CF E320000000001 conditionally_accepted"]
        );
        assert!(matches!(
            f.tracker.submit(&mut doc).await,
            Err(TrackerError::AlreadyDelivered { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_receipt_status_is_service_unreachable() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        f.gateway.push_receipt(receipt("Procesando", "T1", "ABC123"));

        assert!(matches!(
            f.tracker.submit(&mut doc).await,
            Err(TrackerError::ServiceUnreachable { .. })
        ));
        assert_eq!(f.stored("INV/1").send_state, SendState::ToSend);
    }

    #[tokio::test]
    async fn existing_identifiers_are_not_overwritten() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::NotSent);
        doc.tracking_id = Some("OLD".into());
        f.tracker.store().save(&doc).unwrap();
        f.gateway.push_receipt(receipt("EnProceso", "NEW", "ABC123"));

        f.tracker.submit(&mut doc).await.unwrap();

        let stored = f.stored("INV/1");
        assert_eq!(stored.send_state, SendState::DeliveredPending);
        assert_eq!(stored.tracking_id.as_deref(), Some("OLD"));
        assert_eq!(stored.security_code.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn signed_pending_identifiers_are_replaced() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::SignedPending);
        doc.tracking_id = Some("OLD".into());
        doc.security_code = Some("OLD001".into());
        f.tracker.store().save(&doc).unwrap();
        f.gateway.push_receipt(receipt("Aceptado", "NEW", "NEW001"));

        f.tracker.submit(&mut doc).await.unwrap();

        assert_eq!(doc.tracking_id.as_deref(), Some("NEW"));
        assert_eq!(doc.security_code.as_deref(), Some("NEW001"));
    }

    #[tokio::test]
    async fn polling_resolves_pending_documents() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::DeliveredPending);
        doc.tracking_id = Some("T1".into());
        f.tracker.store().save(&doc).unwrap();
        f.gateway.push_poll(poll("EnProceso"));
        f.gateway.push_poll(poll("Aceptado"));

        let first = f.tracker.poll_status(&mut doc).await.unwrap();
        assert!(!first.changed());
        let second = f.tracker.poll_status(&mut doc).await.unwrap();
        assert_eq!(second.to, SendState::DeliveredAccepted);
        assert_eq!(f.stored("INV/1").send_state, SendState::DeliveredAccepted);

        // Terminal now: no further status queries.
        f.tracker.poll_status(&mut doc).await.unwrap();
        assert_eq!(f.gateway.polled(), vec!["T1", "T1"]);
    }

    #[tokio::test]
    async fn polling_without_tracking_id_is_a_noop() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::SignedPending);

        let result = f.tracker.poll_status(&mut doc).await.unwrap();

        assert!(!result.contacted_gateway);
        assert_eq!(f.gateway.poll_calls(), 0);
    }

    #[tokio::test]
    async fn unreadable_poll_replies_are_ignored() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::DeliveredPending);
        doc.tracking_id = Some("T1".into());
        f.tracker.store().save(&doc).unwrap();
        f.gateway.push_poll_error("not json");
        f.gateway.push_poll(poll("Anulado"));
        f.gateway.push_poll(PollReply::default());

        for _ in 0..3 {
            let result = f.tracker.poll_status(&mut doc).await.unwrap();
            assert!(result.contacted_gateway);
            assert!(!result.changed());
        }
        assert_eq!(f.stored("INV/1").send_state, SendState::DeliveredPending);
    }

    #[tokio::test]
    async fn polled_refusal_cancels() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::DeliveredPending);
        doc.tracking_id = Some("T1".into());
        f.tracker.store().save(&doc).unwrap();
        f.gateway.push_poll(PollReply {
            estado: Some("Rechazado".into()),
            mensajes: Some(vec![serde_json::json!({"codigo": 2, "valor": "Firma invalida"})]),
        });

        f.tracker.poll_status(&mut doc).await.unwrap();

        assert_eq!(doc.send_state, SendState::DeliveredRefused);
        assert_eq!(
            f.recorder.calls(),
            vec![
                "remark INV/1: e-CF E320000000001 delivered_refused: 2: Firma invalida",
                "unreconcile INV/1",
                "cancel INV/1",
            ]
        );
    }

    #[tokio::test]
    async fn contingency_resend_keeps_local_identifiers() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::NotSent);
        let signed_at = NaiveDateTime::parse_from_str("2020-06-20 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        f.tracker
            .declare_contingency(
                &mut doc,
                LocalSignature {
                    security_code: "LOC001".into(),
                    signed_at,
                    tracking_id: Some("LOCAL".into()),
                    signed_xml: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(f.stored("INV/1").send_state, SendState::Contingency);

        f.gateway.push_receipt(GatewayReceipt {
            xml: Some("PEVDRi8+".into()),
            ..receipt("Aceptado", "GATEWAY", "GTW001")
        });
        let result = f.tracker.resend_contingency(&mut doc).await.unwrap();

        assert_eq!(result.to, SendState::DeliveredAccepted);
        let stored = f.stored("INV/1");
        assert_eq!(stored.tracking_id.as_deref(), Some("LOCAL"));
        assert_eq!(stored.security_code.as_deref(), Some("LOC001"));
        assert_eq!(stored.signed_at, Some(signed_at));
        assert_eq!(stored.signed_xml.as_deref(), Some("<ECF/>"));
        assert!(f.gateway.submitted()[0].json.contains("20-06-2020 09:00:00"));
    }

    #[tokio::test]
    async fn contingency_resend_takes_a_missing_tracking_id_from_the_reply() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::NotSent);
        let signature = LocalSignature {
            security_code: "LOC001".into(),
            ..Default::default()
        };
        f.tracker.declare_contingency(&mut doc, signature).await.unwrap();
        assert!(f.stored("INV/1").tracking_id.is_none());

        f.gateway.push_receipt(receipt("EnProceso", "T9", "GTW001"));
        let result = f.tracker.resend_contingency(&mut doc).await.unwrap();

        assert_eq!(result.to, SendState::DeliveredPending);
        let stored = f.stored("INV/1");
        assert_eq!(stored.tracking_id.as_deref(), Some("T9"));
        assert_eq!(stored.security_code.as_deref(), Some("LOC001"));

        f.gateway.push_poll(poll("Aceptado"));
        let report = f.tracker.check_pending().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(f.gateway.polled(), vec!["T9"]);
        assert_eq!(f.stored("INV/1").send_state, SendState::DeliveredAccepted);
    }

    #[tokio::test]
    async fn resend_skips_documents_outside_contingency() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::NotSent);

        let result = f.tracker.resend_contingency(&mut doc).await.unwrap();

        assert!(!result.contacted_gateway);
        assert_eq!(f.gateway.submit_calls(), 0);
    }

    #[tokio::test]
    async fn contingency_requires_a_valid_security_code_and_an_open_document() {
        let f = fixture();
        let mut doc = f.document("INV/1", SendState::ToSend);
        let signature = LocalSignature {
            security_code: "12".into(),
            ..Default::default()
        };
        assert!(matches!(
            f.tracker.declare_contingency(&mut doc, signature).await,
            Err(TrackerError::Validation { .. })
        ));

        let mut pending = f.document("INV/2", SendState::DeliveredPending);
        let signature = LocalSignature {
            security_code: "ABC123".into(),
            ..Default::default()
        };
        assert!(matches!(
            f.tracker.declare_contingency(&mut pending, signature).await,
            Err(TrackerError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn posting_waits_for_payment_on_immediate_terms() {
        let f = fixture();
        let ncf = "E320000000001";
        let mut doc = FiscalDocument::new("INV/1", ncf, DocumentType::Consumo, true);

        let posted = f
            .tracker
            .on_posted(&mut doc, Some(&consumer_invoice(ncf)))
            .await
            .unwrap();
        assert!(!posted.contacted_gateway);
        assert!(f.stored("INV/1").expecting_payment());

        let paid = f.tracker.on_payment("INV/1").await.unwrap();
        assert_eq!(paid.to, SendState::DeliveredAccepted);

        // A second payment does not resend.
        let again = f.tracker.on_payment("INV/1").await.unwrap();
        assert!(!again.contacted_gateway);
        assert_eq!(f.gateway.submit_calls(), 1);
    }

    #[tokio::test]
    async fn posting_on_credit_submits_right_away() {
        let f = fixture();
        let ncf = "E320000000001";
        let mut doc = FiscalDocument::new("INV/1", ncf, DocumentType::Consumo, false);

        let posted = f
            .tracker
            .on_posted(&mut doc, Some(&consumer_invoice(ncf)))
            .await
            .unwrap();

        assert_eq!(posted.to, SendState::DeliveredAccepted);
        assert!(matches!(
            f.tracker.on_posted(&mut doc, None).await,
            Err(TrackerError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn batches_report_per_document_outcomes() {
        let f = fixture();
        for (id, track) in [("A", Some("TA")), ("B", Some("TB")), ("C", None)] {
            let mut doc = f.document(id, SendState::DeliveredPending);
            doc.tracking_id = track.map(String::from);
            f.tracker.store().save(&doc).unwrap();
        }
        f.gateway.push_poll(poll("Aceptado"));
        f.gateway.push_poll(poll("EnProceso"));

        let report = f.tracker.check_pending().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.changed, 1);
        assert!(report.failed.is_empty());

        f.document("D", SendState::Contingency);
        f.document("E", SendState::Contingency);
        f.gateway
            .push_submit(SubmitReply::ConnectionFailed("connection refused".into()));

        let report = f.tracker.resend_contingencies().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.changed, 2);
        assert_eq!(report.failed, vec![("D".to_string(), "connection refused".to_string())]);
        assert_eq!(f.stored("D").send_state, SendState::NotSent);
        assert_eq!(f.stored("E").send_state, SendState::DeliveredAccepted);
    }

    #[tokio::test]
    async fn audit_trail_records_transitions_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("audit.jsonl"));
        let f = fixture();
        let tracker = f.tracker.with_audit(audit.clone());
        let mut doc = FiscalDocument::new("INV/1", "E320000000001", DocumentType::Consumo, false);
        tracker
            .on_posted(&mut doc, Some(&consumer_invoice("E320000000001")))
            .await
            .unwrap();

        let events: Vec<AuditEvent> = std::fs::read_to_string(audit.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let submitted = f.gateway.submitted();
        assert_eq!(events[0].event_type, "document_posted");
        assert_eq!(events[1].event_type, "state_changed");
        assert_eq!(events[1].from_state.as_deref(), Some("to_send"));
        assert_eq!(events[1].state, "delivered_accepted");
        assert_eq!(events[1].payload_digest.as_deref(), Some(submitted[0].digest.as_str()));
    }
}
