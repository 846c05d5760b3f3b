#![allow(unused)]
use crate::api::*;
use crate::bet_db::{BetDB, SQLite};
use crate::line_client::{LineClient, RabbitLineClient};
use crate::rabbit::{amqp_addr, Rabbit, StatusUpdateEvent, EVENT_UPDATE_QUEUE_NAME};
use anyhow::Result;
use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use chrono::{DateTime, Utc};
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use futures_util::StreamExt;
use lapin::options::BasicAckOptions;
use log::{debug, error, info, warn, LevelFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

mod api;
mod bet_db;
mod client;
mod line_client;
mod rabbit;

pub struct BetMaker {
    db: Box<dyn BetDB + Send + Sync>,
    line: Box<dyn LineClient + Send + Sync>,
    events_cache: RwLock<Option<(DateTime<Utc>, Vec<EventResponse>)>>,
}
impl BetMaker {
    pub fn new(db: Box<dyn BetDB + Send + Sync>, line: Box<dyn LineClient + Send + Sync>) -> Self {
        Self {
            db,
            line,
            events_cache: RwLock::new(None),
        }
    }
    pub async fn place_bet(&self, request: BetCreateRequest) -> Result<Bet> {
        validate_amount(request.amount)?;
        let event = self.line.event_detail(request.event_id).await?;
        let coefficient = match request.bet_prediction {
            BetPrediction::FirstTeamWin => event.coef_1st_team_win,
            BetPrediction::SecondTeamWin => event.coef_2nd_team_win,
        };
        validate_coefficient(coefficient)?;
        let possible_winning = (request.amount * coefficient).round_dp(2);
        self.db
            .create_bet(
                request.event_id,
                request.bet_prediction,
                coefficient,
                request.amount,
                possible_winning,
            )
            .await
    }
    pub async fn bets(&self, pagination: Pagination) -> Result<Vec<Bet>> {
        self.db.get_bets(pagination.offset, pagination.limit).await
    }
    pub async fn available_events(&self) -> Result<Vec<EventResponse>> {
        {
            let cache = self.events_cache.read().await;
            if let Some((fetched_at, events)) = cache.as_ref() {
                if Utc::now() - *fetched_at < chrono::Duration::seconds(30) {
                    return Ok(events.clone());
                }
            }
        }
        let events = self.line.available_events().await?;
        *self.events_cache.write().await = Some((Utc::now(), events.clone()));
        Ok(events)
    }
    pub async fn apply_status_update(&self, update: StatusUpdateEvent) -> Result<()> {
        let Some(winner) = winning_prediction(update.new_status) else {
            warn!(
                "Ignoring non-terminal status update for event {}",
                update.event_id
            );
            return Ok(());
        };
        self.db.settle_bets(update.event_id, winner).await?;
        info!("Bet statuses updated for event_id: {}", update.event_id);
        Ok(())
    }
}

pub fn winning_prediction(status: EventStatus) -> Option<BetPrediction> {
    match status {
        EventStatus::FirstTeamWon => Some(BetPrediction::FirstTeamWin),
        EventStatus::SecondTeamWon => Some(BetPrediction::SecondTeamWin),
        EventStatus::NotFinished => None,
    }
}

#[debug_handler]
async fn place_bet(
    State(state): State<Arc<BetMaker>>,
    Json(request): Json<BetCreateRequest>,
) -> Result<(StatusCode, Json<Bet>), (StatusCode, String)> {
    let bet = state
        .place_bet(request)
        .await
        .map_err(map_any_err_and_code)?;
    debug!("Created bet {} on event {}", bet.id, bet.event_id);
    Ok((StatusCode::CREATED, Json(bet)))
}
#[debug_handler]
async fn list_bets(
    State(state): State<Arc<BetMaker>>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Bet>>, (StatusCode, String)> {
    let bets = state.bets(pagination).await.map_err(map_any_err_and_code)?;
    Ok(Json(bets))
}
#[debug_handler]
async fn list_events(
    State(state): State<Arc<BetMaker>>,
) -> Result<Json<Vec<EventResponse>>, (StatusCode, String)> {
    let events = state
        .available_events()
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(events))
}

/// Consume the event-update queue for the process lifetime and settle bets
/// on every status change. Messages are acked whether settlement succeeded
/// or not; a failed settlement is logged, never retried.
async fn run_status_listener(rabbit: Rabbit, state: Arc<BetMaker>) -> Result<()> {
    let (_connection, mut consumer) = rabbit.consumer(EVENT_UPDATE_QUEUE_NAME).await?;
    info!("Consuming messages from event updates queue...");
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                error!("Event updates consumer failed: {}", e);
                continue;
            }
        };
        match serde_json::from_slice::<StatusUpdateEvent>(&delivery.data) {
            Ok(update) => {
                info!(
                    "Received event update: ID={}, New Status={}",
                    update.event_id, update.new_status
                );
                if let Err(e) = state.apply_status_update(update).await {
                    error!("Error processing message: {:#}", e);
                }
            }
            Err(e) => error!("Couldn't decode status update: {}", e),
        }
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("Couldn't ack event update: {}", e);
        }
    }
    Ok(())
}

#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    #[arg(short, long)]
    db: Option<String>,
    #[arg(short, long)]
    amqp: Option<String>,
    #[arg(short, long, default_value_t = 30)]
    response_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let amqp = amqp_addr(cli.amqp);
    let line = RabbitLineClient::new(
        amqp.clone(),
        Duration::from_secs(cli.response_timeout_secs),
    );
    let state = Arc::new(BetMaker::new(
        Box::new(SQLite::new(cli.db).await),
        Box::new(line),
    ));
    let listener_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = run_status_listener(Rabbit::new(amqp), listener_state).await {
            error!("Failed to start event updates consumer: {:#}", e);
        }
    });
    let (_port, handle) = run_server(state, Some(cli.port)).await;
    handle.await;
    Ok(())
}

async fn run_server(state: Arc<BetMaker>, port: Option<u16>) -> (u16, JoinHandle<()>) {
    let app = Router::new()
        .route("/bets/", post(place_bet).get(list_bets))
        .route("/events/", get(list_events))
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::BetMakerClient;
    use crate::line_client::TestLineClient;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn upcoming_event(id: RowId) -> EventResponse {
        EventResponse {
            id,
            name: "Test event".to_string(),
            description: None,
            coef_1st_team_win: dec!(1.80),
            coef_2nd_team_win: dec!(2.10),
            timestamp: Utc::now(),
            deadline: Utc::now() + Duration::hours(1),
            status: EventStatus::NotFinished,
        }
    }
    async fn test_server(line: TestLineClient) -> (Arc<BetMaker>, BetMakerClient) {
        let state = Arc::new(BetMaker::new(
            Box::new(SQLite::new(None).await),
            Box::new(line),
        ));
        let (port, _) = run_server(state.clone(), None).await;
        let client =
            BetMakerClient::new("http://127.0.0.1:".to_string() + port.to_string().as_str());
        (state, client)
    }

    #[tokio::test]
    async fn place_bet_freezes_coefficient_and_winning() {
        let line = TestLineClient::default();
        line.add_event(upcoming_event(1));
        let (_state, client) = test_server(line).await;

        let response = client
            .place_bet(BetCreateRequest {
                event_id: 1,
                bet_prediction: BetPrediction::FirstTeamWin,
                amount: dec!(100.00),
            })
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let bet = response.json::<Bet>().await.unwrap();
        assert_eq!(bet.event_id, 1);
        assert_eq!(bet.coefficient, dec!(1.80));
        assert_eq!(bet.possible_winning, dec!(180.00));
        assert_eq!(bet.status, BetStatus::NotPlayed);
    }

    #[tokio::test]
    async fn second_team_prediction_takes_the_other_coefficient() {
        let line = TestLineClient::default();
        line.add_event(upcoming_event(1));
        let (_state, client) = test_server(line).await;

        let response = client
            .place_bet(BetCreateRequest {
                event_id: 1,
                bet_prediction: BetPrediction::SecondTeamWin,
                amount: dec!(50.00),
            })
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let bet = response.json::<Bet>().await.unwrap();
        assert_eq!(bet.coefficient, dec!(2.10));
        assert_eq!(bet.possible_winning, dec!(105.00));
    }

    #[tokio::test]
    async fn bet_on_passed_deadline_is_not_found() {
        let line = TestLineClient::default();
        let mut finished = upcoming_event(1);
        finished.deadline = Utc::now() - Duration::hours(1);
        line.add_event(finished);
        let (_state, client) = test_server(line).await;

        let response = client
            .place_bet(BetCreateRequest {
                event_id: 1,
                bet_prediction: BetPrediction::FirstTeamWin,
                amount: dec!(10.00),
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bet_on_unknown_event_is_not_found() {
        let (_state, client) = test_server(TestLineClient::default()).await;
        let response = client
            .place_bet(BetCreateRequest {
                event_id: 99,
                bet_prediction: BetPrediction::FirstTeamWin,
                amount: dec!(10.00),
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_amount_is_bad_request() {
        let line = TestLineClient::default();
        line.add_event(upcoming_event(1));
        let (_state, client) = test_server(line).await;

        for amount in [dec!(0), dec!(-5.00), dec!(1.001)] {
            let response = client
                .place_bet(BetCreateRequest {
                    event_id: 1,
                    bet_prediction: BetPrediction::FirstTeamWin,
                    amount,
                })
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn bets_are_listed_with_pagination() {
        let line = TestLineClient::default();
        line.add_event(upcoming_event(1));
        let (_state, client) = test_server(line).await;

        for _ in 0..3 {
            client
                .place_bet(BetCreateRequest {
                    event_id: 1,
                    bet_prediction: BetPrediction::FirstTeamWin,
                    amount: dec!(10.00),
                })
                .await;
        }
        let all = client.get_bets(Pagination::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        let page = client
            .get_bets(Pagination {
                offset: 1,
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, all[1].id);
    }

    #[tokio::test]
    async fn status_update_settles_bets_once() {
        let line = TestLineClient::default();
        line.add_event(upcoming_event(1));
        let (state, client) = test_server(line).await;

        let winner = client
            .place_bet(BetCreateRequest {
                event_id: 1,
                bet_prediction: BetPrediction::FirstTeamWin,
                amount: dec!(100.00),
            })
            .await
            .json::<Bet>()
            .await
            .unwrap();
        let loser = client
            .place_bet(BetCreateRequest {
                event_id: 1,
                bet_prediction: BetPrediction::SecondTeamWin,
                amount: dec!(40.00),
            })
            .await
            .json::<Bet>()
            .await
            .unwrap();

        state
            .apply_status_update(StatusUpdateEvent {
                event_id: 1,
                new_status: EventStatus::FirstTeamWon,
            })
            .await
            .unwrap();

        let bets = client.get_bets(Pagination::default()).await.unwrap();
        let winner = bets.iter().find(|bet| bet.id == winner.id).unwrap();
        let loser = bets.iter().find(|bet| bet.id == loser.id).unwrap();
        assert_eq!(winner.status, BetStatus::Won);
        assert_eq!(loser.status, BetStatus::Lost);
    }

    #[tokio::test]
    async fn non_terminal_status_update_is_ignored() {
        let line = TestLineClient::default();
        line.add_event(upcoming_event(1));
        let (state, client) = test_server(line).await;

        let bet = client
            .place_bet(BetCreateRequest {
                event_id: 1,
                bet_prediction: BetPrediction::FirstTeamWin,
                amount: dec!(10.00),
            })
            .await
            .json::<Bet>()
            .await
            .unwrap();

        state
            .apply_status_update(StatusUpdateEvent {
                event_id: 1,
                new_status: EventStatus::NotFinished,
            })
            .await
            .unwrap();

        let bets = client.get_bets(Pagination::default()).await.unwrap();
        assert_eq!(bets[0].status, BetStatus::NotPlayed);
        assert_eq!(bets[0].id, bet.id);
    }

    #[tokio::test]
    async fn available_events_are_cached() {
        let line = TestLineClient::default();
        line.add_event(upcoming_event(1));
        let (_state, client) = test_server(line.clone()).await;

        let first = client.get_events().await.unwrap();
        assert_eq!(first.len(), 1);

        // A second event shows up upstream, but the 30s cache still serves
        // the earlier answer.
        line.add_event(upcoming_event(2));
        let second = client.get_events().await.unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn winner_derivation() {
        assert_eq!(
            winning_prediction(EventStatus::FirstTeamWon),
            Some(BetPrediction::FirstTeamWin)
        );
        assert_eq!(
            winning_prediction(EventStatus::SecondTeamWon),
            Some(BetPrediction::SecondTeamWin)
        );
        assert_eq!(winning_prediction(EventStatus::NotFinished), None);
    }
}
