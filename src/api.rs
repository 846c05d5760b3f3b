use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type RowId = i64;

// Requests
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BetCreateRequest {
    pub event_id: RowId,
    pub bet_prediction: BetPrediction,
    pub amount: Decimal,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventCreateRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_coefficient")]
    pub coef_1st_team_win: Decimal,
    #[serde(default = "default_coefficient")]
    pub coef_2nd_team_win: Decimal,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub status: EventStatus,
}
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EventUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub coef_1st_team_win: Option<Decimal>,
    pub coef_2nd_team_win: Option<Decimal>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: Option<EventStatus>,
}
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct Pagination {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}
impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
        }
    }
}
fn default_limit() -> i64 {
    10
}
fn default_coefficient() -> Decimal {
    Decimal::new(150, 2)
}

// Responses
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct Bet {
    pub id: RowId,
    pub event_id: RowId,
    pub bet_prediction: BetPrediction,
    pub coefficient: Decimal,
    pub amount: Decimal,
    pub possible_winning: Decimal,
    pub status: BetStatus,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct EventResponse {
    pub id: RowId,
    pub name: String,
    pub description: Option<String>,
    pub coef_1st_team_win: Decimal,
    pub coef_2nd_team_win: Decimal,
    pub timestamp: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: EventStatus,
}

// Types
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetStatus {
    NotPlayed,
    Won,
    Lost,
}
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetPrediction {
    FirstTeamWin,
    SecondTeamWin,
}
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    NotFinished,
    FirstTeamWon,
    SecondTeamWon,
}
impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FirstTeamWon | Self::SecondTeamWon)
    }
}
impl Display for BetStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::NotPlayed => "NOT_PLAYED",
            Self::Won => "WON",
            Self::Lost => "LOST",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NOT_PLAYED" => Ok(Self::NotPlayed),
            "WON" => Ok(Self::Won),
            "LOST" => Ok(Self::Lost),
            e => bail!("Couldn't deserialize to BetStatus: {}", e),
        }
    }
}
impl Display for BetPrediction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::FirstTeamWin => "FIRST_TEAM_WIN",
            Self::SecondTeamWin => "SECOND_TEAM_WIN",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for BetPrediction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "FIRST_TEAM_WIN" => Ok(Self::FirstTeamWin),
            "SECOND_TEAM_WIN" => Ok(Self::SecondTeamWin),
            e => bail!("Couldn't deserialize to BetPrediction: {}", e),
        }
    }
}
impl Display for EventStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::NotFinished => "NOT_FINISHED",
            Self::FirstTeamWon => "FIRST_TEAM_WON",
            Self::SecondTeamWon => "SECOND_TEAM_WON",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NOT_FINISHED" => Ok(Self::NotFinished),
            "FIRST_TEAM_WON" => Ok(Self::FirstTeamWon),
            "SECOND_TEAM_WON" => Ok(Self::SecondTeamWon),
            e => bail!("Couldn't deserialize to EventStatus: {}", e),
        }
    }
}

/// Errors the HTTP boundary turns into status codes. Everything else stays
/// an anyhow error and maps to 500.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BetError {
    #[error("Available event not found")]
    EventNotFound,
    #[error("Amount must be positive with at most two decimal places")]
    InvalidAmount,
    #[error("Coefficients must be positive with at most two decimal places")]
    InvalidCoefficient,
    #[error("No response arrived for the request in time")]
    ResponseTimeout,
}
impl BetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EventNotFound => StatusCode::NOT_FOUND,
            Self::InvalidAmount | Self::InvalidCoefficient => StatusCode::BAD_REQUEST,
            Self::ResponseTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

pub fn validate_amount(amount: Decimal) -> Result<(), BetError> {
    if amount <= Decimal::ZERO || amount.round_dp(2) != amount {
        return Err(BetError::InvalidAmount);
    }
    Ok(())
}
pub fn validate_coefficient(coefficient: Decimal) -> Result<(), BetError> {
    if coefficient <= Decimal::ZERO || coefficient.round_dp(2) != coefficient {
        return Err(BetError::InvalidCoefficient);
    }
    Ok(())
}

// helper functions
pub fn map_any_err_and_code(e: anyhow::Error) -> (StatusCode, String) {
    debug!("Error: {:#}", e);
    if let Some(bet_err) = e.downcast_ref::<BetError>() {
        return (bet_err.status_code(), bet_err.to_string());
    }
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{:?}", e))
}
pub fn map_any_err(e: anyhow::Error) -> String {
    debug!("Error: {:#}", e);
    format!("{:?}", e)
}
