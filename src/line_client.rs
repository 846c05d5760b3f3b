use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use uuid::Uuid;

use crate::api::{BetError, EventResponse, RowId};
use crate::rabbit::{BetRequest, Rabbit, REQUEST_QUEUE_NAME, REQUEST_ROUTING_KEY};

/// The betting service's view of the line provider. One impl speaks the
/// correlated request/response protocol over the broker, the other is an
/// in-memory stand-in for tests.
#[async_trait]
pub trait LineClient {
    async fn available_events(&self) -> Result<Vec<EventResponse>>;
    async fn event_detail(&self, event_id: RowId) -> Result<EventResponse>;
}

pub fn error_reason(payload: &serde_json::Value) -> Option<&str> {
    payload.get("error").and_then(|reason| reason.as_str())
}

pub struct RabbitLineClient {
    rabbit: Rabbit,
    response_timeout: Duration,
}
impl RabbitLineClient {
    pub fn new(url: String, response_timeout: Duration) -> Self {
        Self {
            rabbit: Rabbit::new(url),
            response_timeout,
        }
    }
    async fn request(&self, request: &BetRequest) -> Result<serde_json::Value> {
        let correlation_id = Uuid::new_v4().to_string();
        let body = serde_json::to_vec(request)?;
        self.rabbit
            .publish_message(
                REQUEST_ROUTING_KEY,
                &body,
                REQUEST_QUEUE_NAME,
                Some(&correlation_id),
            )
            .await?;
        info!("Sent {:?} with correlation_id {}", request, correlation_id);
        self.rabbit
            .await_response(&correlation_id, self.response_timeout)
            .await
    }
}
#[async_trait]
impl LineClient for RabbitLineClient {
    async fn available_events(&self) -> Result<Vec<EventResponse>> {
        let payload = self.request(&BetRequest::GetAvailableEvents).await?;
        if let Some(reason) = error_reason(&payload) {
            bail!("couldn't list available events: {}", reason);
        }
        serde_json::from_value(payload).context("couldn't decode available events payload")
    }
    async fn event_detail(&self, event_id: RowId) -> Result<EventResponse> {
        let payload = self
            .request(&BetRequest::GetAvailableEventDetail { event_id })
            .await?;
        if let Some(reason) = error_reason(&payload) {
            error!("{}. event_id: {}", reason, event_id);
            return Err(BetError::EventNotFound.into());
        }
        serde_json::from_value(payload).context("couldn't decode event detail payload")
    }
}

#[derive(Debug, Default, Clone)]
pub struct TestLineClient {
    events: Arc<Mutex<HashMap<RowId, EventResponse>>>,
}
impl TestLineClient {
    pub fn add_event(&self, event: EventResponse) {
        self.events.lock().unwrap().insert(event.id, event);
    }
}
#[async_trait]
impl LineClient for TestLineClient {
    async fn available_events(&self) -> Result<Vec<EventResponse>> {
        let events = self.events.lock().unwrap();
        let mut available: Vec<EventResponse> = events
            .values()
            .filter(|event| event.deadline > Utc::now())
            .cloned()
            .collect();
        available.sort_by_key(|event| event.id);
        Ok(available)
    }
    async fn event_detail(&self, event_id: RowId) -> Result<EventResponse> {
        let events = self.events.lock().unwrap();
        if let Some(event) = events
            .get(&event_id)
            .filter(|event| event.deadline > Utc::now())
        {
            Ok(event.clone())
        } else {
            Err(BetError::EventNotFound.into())
        }
    }
}
