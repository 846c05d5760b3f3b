use std::str::FromStr;

use crate::api::{Bet, BetPrediction, BetStatus, RowId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, SqlitePool};

#[async_trait]
pub trait BetDB {
    async fn create_bet(
        &self,
        event_id: RowId,
        bet_prediction: BetPrediction,
        coefficient: Decimal,
        amount: Decimal,
        possible_winning: Decimal,
    ) -> Result<Bet>;
    async fn get_bet(&self, bet: RowId) -> Result<Bet>;
    async fn get_bets(&self, offset: i64, limit: i64) -> Result<Vec<Bet>>;
    /// Settle every bet on the event in one transaction: WON where the
    /// prediction matches the winner, LOST everywhere else.
    async fn settle_bets(&self, event_id: RowId, winner: BetPrediction) -> Result<()>;
}

pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Self {
        // A fresh connection to sqlite::memory: is a fresh database, so the
        // pool is pinned to one connection that never gets reaped.
        let connection = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(
                db_conn
                    .unwrap_or_else(|| "sqlite::memory:".to_string())
                    .as_str(),
            )
            .await
            .unwrap();
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS bets (\
            id INTEGER PRIMARY KEY,\
            event_id INTEGER NOT NULL,\
            bet_prediction TEXT NOT NULL,\
            coefficient TEXT NOT NULL,\
            amount TEXT NOT NULL,\
            possible_winning TEXT NOT NULL,\
            status TEXT NOT NULL DEFAULT 'NOT_PLAYED'\
            )",
            )
            .await
            .unwrap();
        Self { connection }
    }
}
fn bet_from_row(row: &SqliteRow) -> Result<Bet> {
    Ok(Bet {
        id: row.get("id"),
        event_id: row.get("event_id"),
        bet_prediction: BetPrediction::from_str(row.get("bet_prediction"))?,
        coefficient: Decimal::from_str(row.get("coefficient"))?,
        amount: Decimal::from_str(row.get("amount"))?,
        possible_winning: Decimal::from_str(row.get("possible_winning"))?,
        status: BetStatus::from_str(row.get("status"))?,
    })
}
#[async_trait]
impl BetDB for SQLite {
    async fn create_bet(
        &self,
        event_id: RowId,
        bet_prediction: BetPrediction,
        coefficient: Decimal,
        amount: Decimal,
        possible_winning: Decimal,
    ) -> Result<Bet> {
        let id = self
            .connection
            .execute(
                query(
                    "INSERT INTO bets (\
            event_id,\
            bet_prediction,\
            coefficient,\
            amount,\
            possible_winning,\
            status)\
            VALUES (?,?,?,?,?,'NOT_PLAYED')",
                )
                .bind(event_id)
                .bind(bet_prediction.to_string())
                .bind(coefficient.to_string())
                .bind(amount.to_string())
                .bind(possible_winning.to_string()),
            )
            .await?
            .last_insert_rowid();
        self.get_bet(id).await
    }
    async fn get_bet(&self, bet: RowId) -> Result<Bet> {
        let row = self
            .connection
            .fetch_one(query("SELECT * FROM bets WHERE id = ?").bind(bet))
            .await
            .with_context(|| format!("couldn't get bet {}", bet))?;
        bet_from_row(&row)
    }
    async fn get_bets(&self, offset: i64, limit: i64) -> Result<Vec<Bet>> {
        let rows = self
            .connection
            .fetch_all(
                query("SELECT * FROM bets ORDER BY id LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset),
            )
            .await?;
        rows.iter().map(bet_from_row).collect()
    }
    async fn settle_bets(&self, event_id: RowId, winner: BetPrediction) -> Result<()> {
        let mut tx = self.connection.begin().await?;
        query(
            "UPDATE bets \
            SET status = 'WON' \
            WHERE event_id = ? AND bet_prediction = ?",
        )
        .bind(event_id)
        .bind(winner.to_string())
        .execute(&mut *tx)
        .await?;
        query(
            "UPDATE bets \
            SET status = 'LOST' \
            WHERE event_id = ? AND bet_prediction != ?",
        )
        .bind(event_id)
        .bind(winner.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
