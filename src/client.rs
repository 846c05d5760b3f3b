use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};

use crate::api::*;

pub struct BetMakerClient {
    url: String,
    client: reqwest::Client,
}
impl BetMakerClient {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    pub async fn place_bet(&self, request: BetCreateRequest) -> Response {
        self.client
            .post(self.url.clone() + "/bets/")
            .json(&request)
            .send()
            .await
            .unwrap()
    }
    pub async fn get_bets(&self, pagination: Pagination) -> Result<Vec<Bet>> {
        let response = self
            .client
            .get(self.url.clone() + "/bets/")
            .query(&pagination)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<Vec<Bet>>().await?)
    }
    pub async fn get_events(&self) -> Result<Vec<EventResponse>> {
        let response = self.client.get(self.url.clone() + "/events/").send().await?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<Vec<EventResponse>>().await?)
    }
}

pub struct LineProviderClient {
    url: String,
    client: reqwest::Client,
}
impl LineProviderClient {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    pub async fn create_event(&self, request: EventCreateRequest) -> Response {
        self.client
            .post(self.url.clone() + "/events/")
            .json(&request)
            .send()
            .await
            .unwrap()
    }
    pub async fn update_event(&self, event: RowId, request: EventUpdateRequest) -> Response {
        self.client
            .put(self.url.clone() + "/events/" + event.to_string().as_str())
            .json(&request)
            .send()
            .await
            .unwrap()
    }
    pub async fn get_events(&self, pagination: Pagination) -> Result<Vec<EventResponse>> {
        let response = self
            .client
            .get(self.url.clone() + "/events/")
            .query(&pagination)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<Vec<EventResponse>>().await?)
    }
}
