#![allow(unused)]
use crate::api::*;
use crate::line_db::{EventDB, SQLite};
use crate::rabbit::{
    amqp_addr, BetRequest, Rabbit, StatusUpdateEvent, EVENT_UPDATE_QUEUE_NAME, REQUEST_QUEUE_NAME,
    RESPONSE_QUEUE_NAME, RESPONSE_ROUTING_KEY, STATUS_UPDATE_ROUTING_KEY,
};
use anyhow::Result;
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Router;
use axum_macros::debug_handler;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use futures_util::StreamExt;
use lapin::options::BasicAckOptions;
use log::{debug, error, info, LevelFilter};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

mod api;
mod client;
mod line_db;
mod rabbit;

pub struct LineProvider {
    db: Box<dyn EventDB + Send + Sync>,
    rabbit: Rabbit,
}
impl LineProvider {
    pub fn new(db: Box<dyn EventDB + Send + Sync>, rabbit: Rabbit) -> Self {
        Self { db, rabbit }
    }
    pub async fn create_event(&self, request: EventCreateRequest) -> Result<EventResponse> {
        validate_coefficient(request.coef_1st_team_win)?;
        validate_coefficient(request.coef_2nd_team_win)?;
        self.db.create_event(request).await
    }
    pub async fn events(&self, pagination: Pagination) -> Result<Vec<EventResponse>> {
        self.db
            .get_events(pagination.offset, pagination.limit)
            .await
    }
    pub async fn update_event(
        &self,
        event: RowId,
        update: EventUpdateRequest,
    ) -> Result<Option<EventResponse>> {
        if let Some(coefficient) = update.coef_1st_team_win {
            validate_coefficient(coefficient)?;
        }
        if let Some(coefficient) = update.coef_2nd_team_win {
            validate_coefficient(coefficient)?;
        }
        let Some((old_status, updated)) = self.db.update_event(event, update).await? else {
            return Ok(None);
        };
        if old_status != updated.status {
            info!("Sending status update message to broker");
            self.notify_status_change(updated.id, updated.status).await;
        }
        Ok(Some(updated))
    }
    /// Best effort: the committed update is the source of truth, a failed
    /// publish is logged and never retried or rolled back.
    async fn notify_status_change(&self, event_id: RowId, new_status: EventStatus) {
        let update = StatusUpdateEvent {
            event_id,
            new_status,
        };
        let body = match serde_json::to_vec(&update) {
            Ok(body) => body,
            Err(e) => {
                error!("Couldn't encode status update: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .rabbit
            .publish_message(
                STATUS_UPDATE_ROUTING_KEY,
                &body,
                EVENT_UPDATE_QUEUE_NAME,
                None,
            )
            .await
        {
            error!("Failed to send status update message: {:#}", e);
        }
    }
    pub async fn handle_request_body(&self, body: &[u8]) -> serde_json::Value {
        match serde_json::from_slice::<BetRequest>(body) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!("Unsupported request: {}", e);
                json!({"error": "Unsupported request"})
            }
        }
    }
    pub async fn handle_request(&self, request: BetRequest) -> serde_json::Value {
        match request {
            BetRequest::GetAvailableEvents => match self.db.get_available_events().await {
                Ok(events) => serde_json::to_value(events).unwrap_or_else(|e| {
                    error!("Couldn't encode available events: {}", e);
                    json!({"error": "Error during getting available events occurred."})
                }),
                Err(e) => {
                    error!("Error during getting available events: {:#}", e);
                    json!({"error": "Error during getting available events occurred."})
                }
            },
            BetRequest::GetAvailableEventDetail { event_id } => {
                match self.db.get_available_event_detail(event_id).await {
                    Ok(Some(event)) => serde_json::to_value(event).unwrap_or_else(|e| {
                        error!("Couldn't encode event detail: {}", e);
                        json!({"error": "Database error occurred"})
                    }),
                    Ok(None) => {
                        debug!(
                            "Event with ID {} not found or deadline has passed",
                            event_id
                        );
                        json!({"error": "Event not found or deadline has passed"})
                    }
                    Err(e) => {
                        error!("Error during getting event detail: {:#}", e);
                        json!({"error": "Database error occurred"})
                    }
                }
            }
        }
    }
}

#[debug_handler]
async fn create_event(
    State(state): State<Arc<LineProvider>>,
    Json(request): Json<EventCreateRequest>,
) -> Result<(StatusCode, Json<EventResponse>), (StatusCode, String)> {
    let event = state
        .create_event(request)
        .await
        .map_err(map_any_err_and_code)?;
    debug!("Created event {}: {}", event.id, event.name);
    Ok((StatusCode::CREATED, Json(event)))
}
#[debug_handler]
async fn list_events(
    State(state): State<Arc<LineProvider>>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<EventResponse>>, (StatusCode, String)> {
    let events = state
        .events(pagination)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(events))
}
#[debug_handler]
async fn update_event(
    State(state): State<Arc<LineProvider>>,
    Path(event_id): Path<RowId>,
    Json(request): Json<EventUpdateRequest>,
) -> Result<Json<EventResponse>, (StatusCode, String)> {
    let updated = state
        .update_event(event_id, request)
        .await
        .map_err(map_any_err_and_code)?;
    if let Some(event) = updated {
        Ok(Json(event))
    } else {
        Err((StatusCode::NOT_FOUND, "Event not found".to_string()))
    }
}

/// Consume the request queue for the process lifetime. Every request gets a
/// response tagged with its correlation id, even undecodable ones; the
/// inbound message is acked on every path.
async fn run_request_worker(state: Arc<LineProvider>) -> Result<()> {
    let (_connection, mut consumer) = state.rabbit.consumer(REQUEST_QUEUE_NAME).await?;
    info!("Consuming messages from request queue...");
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                error!("Request consumer failed: {}", e);
                continue;
            }
        };
        let response = state.handle_request_body(&delivery.data).await;
        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string());
        match serde_json::to_vec(&response) {
            Ok(body) => {
                if let Err(e) = state
                    .rabbit
                    .publish_message(
                        RESPONSE_ROUTING_KEY,
                        &body,
                        RESPONSE_QUEUE_NAME,
                        correlation_id.as_deref(),
                    )
                    .await
                {
                    error!("Error processing request: {:#}", e);
                }
            }
            Err(e) => error!("Couldn't encode response: {}", e),
        }
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("Couldn't ack request message: {}", e);
        }
    }
    Ok(())
}

#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 8081)]
    port: u16,
    #[arg(short, long)]
    db: Option<String>,
    #[arg(short, long)]
    amqp: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let amqp = amqp_addr(cli.amqp);
    let state = Arc::new(LineProvider::new(
        Box::new(SQLite::new(cli.db).await),
        Rabbit::new(amqp),
    ));
    let worker_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = run_request_worker(worker_state).await {
            error!("Failed to start request consumer: {:#}", e);
        }
    });
    let (_port, handle) = run_server(state, Some(cli.port)).await;
    handle.await;
    Ok(())
}

async fn run_server(state: Arc<LineProvider>, port: Option<u16>) -> (u16, JoinHandle<()>) {
    let app = Router::new()
        .route("/events/", post(create_event).get(list_events))
        .route("/events/:event_id", put(update_event))
        .with_state(state);

    let addr = "127.0.0.1:".to_string() + port.unwrap_or(0).to_string().as_str();
    let server = axum::Server::bind(&addr.parse().unwrap()).serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        server.await.unwrap();
    });
    (port, handle)
}
