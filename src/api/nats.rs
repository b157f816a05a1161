use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use async_nats::Client;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::service::{PickupHook, PickupResponse, PickupServiceImpl};
use crate::domain::{
    repository::JobStore,
    request::{RequestError, TypeRequest, WorkerIdentity},
};

pub const WORKER_NAME_HEADER: &str = "x-worker-name";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Body of a pickup request: the poll's query string and headers.
#[derive(Debug, Default, Deserialize)]
struct PollRequest {
    #[serde(default)]
    query: HashMap<String, String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl PollRequest {
    fn parse(payload: &[u8]) -> Result<Self, RequestError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let mut request: Self =
            serde_json::from_slice(payload).map_err(RequestError::MalformedRequest)?;
        request.headers = request
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollReply {
    pub status: u16,
    pub body: Value,
}

impl PollReply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: String) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }
}

/// Turns one raw pickup request into its reply. Malformed input is rejected
/// before the service, and therefore the store, is touched.
pub async fn respond<S>(
    service: &PickupServiceImpl<S>,
    payload: &[u8],
    reply_to: Option<&str>,
    hook: Option<&dyn PickupHook>,
) -> PollReply
where
    S: JobStore,
{
    let request = match PollRequest::parse(payload) {
        Ok(request) => request,
        Err(e) => return PollReply::error(400, e.to_string()),
    };

    let types = match TypeRequest::parse_list(request.query.get("types").map(String::as_str)) {
        Ok(types) => types,
        Err(e) => {
            warn!(error = %e, "Rejected pickup request");
            return PollReply::error(400, e.to_string());
        }
    };

    let identity = WorkerIdentity {
        worker_name: request.headers.get(WORKER_NAME_HEADER).cloned(),
        forwarded_for: request.headers.get(FORWARDED_FOR_HEADER).cloned(),
        remote_addr: reply_to.map(String::from),
    };

    match service.pickup(&types, &identity, hook).await {
        Ok(PickupResponse::Picked(job)) => match serde_json::to_value(&job) {
            Ok(body) => PollReply::ok(body),
            Err(e) => PollReply::error(500, e.to_string()),
        },
        Ok(PickupResponse::NoWork) => PollReply::ok(json!({})),
        Err(e) => {
            error!(error = ?e, "Pickup failed");
            PollReply::error(500, format!("{:#}", e))
        }
    }
}

/// Serves pickup requests arriving on a NATS subject. Instances share the
/// subject through a queue group.
pub struct NatsPickupListener<S>
where
    S: JobStore,
{
    client: Client,
    subject: String,
    queue_group: String,
    service: Arc<PickupServiceImpl<S>>,
    hook: Option<Arc<dyn PickupHook>>,
}

impl<S> NatsPickupListener<S>
where
    S: JobStore + 'static,
{
    pub fn new(
        client: Client,
        subject: String,
        queue_group: String,
        service: Arc<PickupServiceImpl<S>>,
        hook: Option<Arc<dyn PickupHook>>,
    ) -> Self {
        Self {
            client,
            subject,
            queue_group,
            service,
            hook,
        }
    }

    pub async fn listen(self) -> Result<()> {
        let mut requests = self
            .client
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await
            .map_err(|e| anyhow!("subscribing to {}: {}", self.subject, e))?;

        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "Listening for pickup requests"
        );

        while let Some(message) = requests.next().await {
            let reply_to = match message.reply {
                Some(reply_to) => reply_to,
                None => {
                    warn!(subject = %message.subject, "Dropping pickup request without reply");
                    continue;
                }
            };

            let payload = message.payload;
            let client = self.client.clone();
            let service = self.service.clone();
            let hook = self.hook.clone();

            // Detached, so a requester that goes away can't abandon a claim.
            tokio::spawn(async move {
                let reply =
                    respond(&service, &payload, Some(&reply_to), hook.as_deref()).await;

                let bytes = match serde_json::to_vec(&reply) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(error = %e, "Encoding pickup reply");
                        return;
                    }
                };

                if let Err(e) = client.publish(reply_to, Bytes::from(bytes)).await {
                    error!(error = %e, "Publishing pickup reply");
                }
            });
        }

        Ok(())
    }
}
