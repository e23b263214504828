//! Home Assistant REST API client
//!
//! `Backend` is the contract the repository consumes; `HassClient` is its
//! HTTP implementation.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::{Service, State};

/// Requests the repository issues against the server
pub trait Backend: Send + Sync + 'static {
    fn fetch_states(&self) -> impl Future<Output = Result<Vec<State>>> + Send;

    fn fetch_services(&self) -> impl Future<Output = Result<Vec<Service>>> + Send;

    /// History since `start`, one list per entity
    fn fetch_history(
        &self,
        start: DateTime<Utc>,
        entity_id: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Vec<State>>>> + Send;

    /// Call `domain.service`; resolves to the states the call changed
    fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &Value,
    ) -> impl Future<Output = Result<Vec<State>>> + Send;

    fn probe_availability(&self) -> impl Future<Output = bool> + Send;

    /// Replace the connection parameters used by subsequent requests
    ///
    /// Called while the repository holds its session lock, so it must not
    /// call back into the repository.
    fn set_connection(&self, base_url: Option<&str>, password: Option<&str>);
}

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            insecure: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Connection {
    base_url: String,
    password: String,
}

/// Home Assistant REST API client
pub struct HassClient {
    client: Client,
    connection: RwLock<Option<Connection>>,
}

impl HassClient {
    /// Create a client without connection parameters
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(options.timeout)
            .user_agent(format!("homeglance/{}", env!("CARGO_PKG_VERSION")));

        if options.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().context("building HTTP client")?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    fn connection(&self) -> Result<Connection> {
        self.connection.read().clone().ok_or_else(|| {
            anyhow!(
                "No Home Assistant server configured.\n\
                Log in first or set HASS_SERVER and HASS_PASSWORD."
            )
        })
    }

    /// Make a GET request to the API
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let connection = self.connection()?;
        let url = format!("{}/api{}", connection.base_url, path);
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&connection.password)
            .send()
            .await
            .with_context(|| format!("request to {url}"))?;

        self.handle_response(response).await
    }

    /// Make a POST request to the API
    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let connection = self.connection()?;
        let url = format!("{}/api{}", connection.base_url, path);
        log::debug!("POST {} {:?}", url, body);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&connection.password)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url}"))?;

        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let url = response.url().to_string();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, &url, &error_text));
        }

        response
            .json()
            .await
            .with_context(|| format!("parsing response from {url}"))
    }
}

fn status_to_error(status: StatusCode, url: &str, body: &str) -> anyhow::Error {
    let hint = match status {
        StatusCode::UNAUTHORIZED => "Check your password (HASS_PASSWORD or `homeglance login`)",
        StatusCode::FORBIDDEN => "Your credentials may not have sufficient permissions",
        StatusCode::NOT_FOUND => "The requested resource was not found",
        StatusCode::SERVICE_UNAVAILABLE => "Home Assistant may be starting up or restarting",
        StatusCode::BAD_REQUEST => "Invalid request parameters",
        _ => "",
    };

    let msg = if body.is_empty() {
        format!("HTTP {status} from {url}")
    } else {
        format!("HTTP {status} from {url}: {body}")
    };

    if hint.is_empty() {
        anyhow!(msg)
    } else {
        anyhow!("{msg}\nHint: {hint}")
    }
}

impl Backend for HassClient {
    async fn fetch_states(&self) -> Result<Vec<State>> {
        self.get("/states").await
    }

    async fn fetch_services(&self) -> Result<Vec<Service>> {
        self.get("/services").await
    }

    async fn fetch_history(
        &self,
        start: DateTime<Utc>,
        entity_id: Option<&str>,
    ) -> Result<Vec<Vec<State>>> {
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut path = format!("/history/period/{}", urlencoding::encode(&start));
        if let Some(entity_id) = entity_id {
            path.push_str(&format!(
                "?filter_entity_id={}",
                urlencoding::encode(entity_id)
            ));
        }

        self.get(&path).await
    }

    async fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<Vec<State>> {
        self.post(&format!("/services/{domain}/{service}"), data)
            .await
    }

    async fn probe_availability(&self) -> bool {
        match self.get::<Value>("/").await {
            Ok(_) => true,
            Err(err) => {
                log::debug!("API not available: {err:#}");
                false
            }
        }
    }

    fn set_connection(&self, base_url: Option<&str>, password: Option<&str>) {
        let connection = match (base_url, password) {
            (Some(base_url), Some(password)) => Some(Connection {
                base_url: base_url.trim_end_matches('/').to_string(),
                password: password.to_string(),
            }),
            _ => None,
        };

        log::debug!(
            "Connection {}",
            connection
                .as_ref()
                .map_or("cleared", |c| c.base_url.as_str())
        );
        *self.connection.write() = connection;
    }
}
