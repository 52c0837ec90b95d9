use super::{GatewayClient, GatewayError, GatewayReceipt, PollReply, Result, SubmitReply};
use async_trait::async_trait;
use do_ecf_core::PayloadBody;
use rand::{distributions::Alphanumeric, Rng};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// In-process gateway. Replies are served from scripted queues; once a
/// queue runs dry submissions are accepted and polls report acceptance.
#[derive(Default)]
pub struct MockGateway {
    submit_replies: Mutex<VecDeque<SubmitReply>>,
    poll_replies: Mutex<VecDeque<Result<PollReply>>>,
    submitted: Mutex<Vec<PayloadBody>>,
    polled: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_submit(&self, reply: SubmitReply) {
        lock(&self.submit_replies).push_back(reply);
    }

    pub fn push_receipt(&self, receipt: GatewayReceipt) {
        self.push_submit(SubmitReply::Received(receipt));
    }

    pub fn push_poll(&self, reply: PollReply) {
        lock(&self.poll_replies).push_back(Ok(reply));
    }

    pub fn push_poll_error(&self, message: &str) {
        lock(&self.poll_replies).push_back(Err(GatewayError::Malformed(message.to_string())));
    }

    pub fn submit_calls(&self) -> usize {
        lock(&self.submitted).len()
    }

    pub fn submitted(&self) -> Vec<PayloadBody> {
        lock(&self.submitted).clone()
    }

    pub fn poll_calls(&self) -> usize {
        lock(&self.polled).len()
    }

    pub fn polled(&self) -> Vec<String> {
        lock(&self.polled).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn random_code(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn accepted_receipt() -> GatewayReceipt {
    GatewayReceipt {
        status: Some("Aceptado".to_string()),
        track_id: Some(random_code(16)),
        security_code: Some(random_code(6)),
        signature_datetime: Some(
            chrono::Local::now()
                .naive_local()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        xml: None,
        messages: None,
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn submit(&self, payload: &PayloadBody) -> Result<SubmitReply> {
        lock(&self.submitted).push(payload.clone());
        let scripted = lock(&self.submit_replies).pop_front();
        Ok(scripted.unwrap_or_else(|| SubmitReply::Received(accepted_receipt())))
    }

    async fn status(&self, track_id: &str) -> Result<PollReply> {
        lock(&self.polled).push(track_id.to_string());
        let scripted = lock(&self.poll_replies).pop_front();
        scripted.unwrap_or_else(|| {
            Ok(PollReply {
                estado: Some("Aceptado".to_string()),
                mensajes: None,
            })
        })
    }
}
