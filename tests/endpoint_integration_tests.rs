/// Slot endpoint smoke suite.
///
/// Runs against a live server. Point `SLOT_API_URL` at it (default
/// `http://localhost:3000`) and set `SLOT_TEST_TOKEN` to a bearer token of a
/// verified doctor account.

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "http://localhost:3000";

pub struct ApiTestClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiTestClient {
    pub fn from_env() -> Self {
        Self {
            client: Client::new(),
            base_url: std::env::var("SLOT_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            auth_token: std::env::var("SLOT_TEST_TOKEN").ok(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let request = match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request.send().await.context("request failed")
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(self.client.get(self.url(path))).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Response> {
        self.send(self.client.post(self.url(path)).json(&body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Response> {
        self.send(self.client.put(self.url(path)).json(&body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.send(self.client.delete(self.url(path))).await
    }
}

#[derive(Debug, Default)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub failures: Vec<String>,
}

impl TestResults {
    pub fn record(&mut self, name: &str, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                self.passed += 1;
                println!("PASS {}", name);
            }
            Err(e) => {
                self.failed += 1;
                self.failures.push(format!("{}: {:#}", name, e));
                println!("FAIL {}: {:#}", name, e);
            }
        }
    }

    pub fn summary(&self) {
        println!("\nPassed: {}  Failed: {}", self.passed, self.failed);
        for failure in &self.failures {
            println!("  - {}", failure);
        }
    }
}

async fn expect_status(response: Response, expected: StatusCode) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status != expected {
        bail!("expected {}, got {}: {}", expected, status, body);
    }
    Ok(body)
}

pub async fn run_slot_tests(client: &ApiTestClient) -> Result<TestResults> {
    let mut results = TestResults::default();
    let date = (Utc::now() + Duration::days(7)).format("%Y-%m-%d").to_string();

    println!("Slot endpoint tests against {}", client.base_url);

    let unauthenticated = ApiTestClient {
        auth_token: None,
        ..ApiTestClient::from_env()
    };
    results.record(
        "rejects missing token",
        async {
            expect_status(unauthenticated.get("/slots/mine").await?, StatusCode::UNAUTHORIZED).await?;
            Ok(())
        }
        .await,
    );

    let created = async {
        let body = expect_status(
            client
                .post(
                    "/slots",
                    json!({
                        "entity_type": "OPD",
                        "date": date,
                        "time_slots": [
                            { "start_time": "09:00", "end_time": "09:30", "capacity": 2 },
                            { "start_time": "09:30", "end_time": "10:00", "capacity": 2 }
                        ]
                    }),
                )
                .await?,
            StatusCode::CREATED,
        )
        .await?;
        body["slot"]["id"]
            .as_str()
            .map(str::to_string)
            .context("response has no slot id")
    }
    .await;

    let slot_id = match created {
        Ok(id) => {
            results.record("creates multi-window slot", Ok(()));
            id
        }
        Err(e) => {
            results.record("creates multi-window slot", Err(e));
            return Ok(results);
        }
    };

    results.record(
        "rejects overlapping slot",
        async {
            let body = expect_status(
                client
                    .post(
                        "/slots",
                        json!({
                            "entity_type": "OPD",
                            "date": date,
                            "start_time": "09:15",
                            "end_time": "09:45",
                            "capacity": 1
                        }),
                    )
                    .await?,
                StatusCode::CONFLICT,
            )
            .await?;
            if body["code"] != "SLOT_OVERLAP" {
                bail!("unexpected code {}", body["code"]);
            }
            Ok(())
        }
        .await,
    );

    results.record(
        "lists availability",
        async {
            let body = expect_status(
                client
                    .get(&format!("/slots/availability?entity_type=OPD&date={}&start_time=09:00&end_time=09:30", date))
                    .await?,
                StatusCode::OK,
            )
            .await?;
            if body["count"].as_u64().unwrap_or(0) == 0 {
                bail!("no available slots returned");
            }
            Ok(())
        }
        .await,
    );

    results.record(
        "updates windows",
        async {
            expect_status(
                client
                    .put(
                        &format!("/slots/{}", slot_id),
                        json!({
                            "time_slots": [
                                { "start_time": "09:00", "end_time": "09:30", "capacity": 3 },
                                { "start_time": "10:00", "end_time": "10:30", "capacity": 1 }
                            ]
                        }),
                    )
                    .await?,
                StatusCode::OK,
            )
            .await?;
            Ok(())
        }
        .await,
    );

    results.record(
        "reports validation errors per field",
        async {
            let body = expect_status(
                client
                    .put(&format!("/slots/{}", slot_id), json!({ "capacity": 0 }))
                    .await?,
                StatusCode::BAD_REQUEST,
            )
            .await?;
            if body["errors"][0]["field"] != "capacity" {
                bail!("unexpected errors {}", body["errors"]);
            }
            Ok(())
        }
        .await,
    );

    results.record(
        "deletes slot",
        async {
            let body = expect_status(client.delete(&format!("/slots/{}", slot_id)).await?, StatusCode::OK).await?;
            if body["outcome"] != "deleted" {
                bail!("unexpected outcome {}", body["outcome"]);
            }
            expect_status(client.get(&format!("/slots/{}", slot_id)).await?, StatusCode::NOT_FOUND).await?;
            Ok(())
        }
        .await,
    );

    Ok(results)
}

#[tokio::main]
async fn main() -> Result<()> {
    let client = ApiTestClient::from_env();
    if client.auth_token.is_none() {
        bail!("SLOT_TEST_TOKEN must be set to a verified doctor's bearer token");
    }

    let results = run_slot_tests(&client).await?;
    results.summary();

    if results.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
