//! HTTP transport used to talk to index nodes.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use fleet_types::{FleetError, FleetSettings};

/// Raw HTTP answer from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-level failure; the request never produced an HTTP answer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body.
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    /// Issue a DELETE.
    async fn delete(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

/// Basic-auth credentials read from files at construction.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    /// Read username and password files, trimming trailing newlines.
    pub fn from_files(username_file: &Path, password_file: &Path) -> Result<Self, FleetError> {
        let username = std::fs::read_to_string(username_file).map_err(|e| {
            FleetError::Config(format!(
                "cannot read username file {}: {}",
                username_file.display(),
                e
            ))
        })?;
        let password = std::fs::read_to_string(password_file).map_err(|e| {
            FleetError::Config(format!(
                "cannot read password file {}: {}",
                password_file.display(),
                e
            ))
        })?;

        Ok(Self {
            username: username.trim().to_string(),
            password: SecretString::from(password.trim().to_string()),
        })
    }

    /// Credentials named by settings, if both files are configured.
    pub fn from_settings(settings: &FleetSettings) -> Result<Option<Self>, FleetError> {
        match (&settings.username_file, &settings.password_file) {
            (Some(user), Some(pass)) => {
                Self::from_files(Path::new(user), Path::new(pass)).map(Some)
            }
            (None, None) => Ok(None),
            _ => Err(FleetError::Config(
                "username_file and password_file must be set together".to_string(),
            )),
        }
    }
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
    credentials: Option<Credentials>,
}

impl HttpTransport {
    pub fn new(credentials: Option<Credentials>) -> Result<Self, FleetError> {
        let client = Client::builder()
            .build()
            .map_err(|e| FleetError::Config(e.to_string()))?;

        Ok(Self {
            client,
            credentials,
        })
    }

    pub fn from_settings(settings: &FleetSettings) -> Result<Self, FleetError> {
        Self::new(Credentials::from_settings(settings)?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(creds) => {
                request.basic_auth(&creds.username, Some(creds.password.expose_secret()))
            }
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .authorize(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;
        Ok(HttpResponse { status, body })
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        debug!(url, "POST");
        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        self.send(request, timeout).await
    }

    async fn delete(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        debug!(url, "DELETE");
        self.send(self.client.delete(url), timeout).await
    }
}

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
enum MockReply {
    Respond(HttpResponse),
    Fail(String),
}

/// Mock transport for testing.
///
/// Replies are matched by URL substring, first rule wins. Unmatched
/// requests fail with a connection error.
#[derive(Debug, Default)]
pub struct MockTransport {
    rules: Vec<(String, MockReply, Option<Duration>)>,
    calls: Mutex<VecDeque<RecordedCall>>,
}

impl MockTransport {
    /// Answer requests whose URL contains `pattern`.
    pub fn with_response(mut self, pattern: &str, response: HttpResponse) -> Self {
        self.rules
            .push((pattern.to_string(), MockReply::Respond(response), None));
        self
    }

    /// Answer requests whose URL contains `pattern` with a JSON body.
    pub fn with_json(self, pattern: &str, status: u16, body: Value) -> Self {
        self.with_response(pattern, HttpResponse::new(status, body.to_string()))
    }

    /// Fail requests whose URL contains `pattern` at the network level.
    pub fn with_failure(mut self, pattern: &str) -> Self {
        self.rules.push((
            pattern.to_string(),
            MockReply::Fail(format!("connection refused ({})", pattern)),
            None,
        ));
        self
    }

    /// Delay the most recently added rule.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        if let Some(rule) = self.rules.last_mut() {
            rule.2 = Some(delay);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().iter().cloned().collect()
    }

    /// Calls whose URL contains `pattern`.
    pub fn calls_to(&self, pattern: &str) -> Vec<RecordedCall> {
        self.lock()
            .iter()
            .filter(|c| c.url.contains(pattern))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RecordedCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn reply(&self, call: RecordedCall) -> Result<HttpResponse, TransportError> {
        let rule = self
            .rules
            .iter()
            .find(|(pattern, _, _)| call.url.contains(pattern.as_str()))
            .cloned();
        let url = call.url.clone();
        self.lock().push_back(call);

        match rule {
            Some((_, reply, delay)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match reply {
                    MockReply::Respond(response) => Ok(response),
                    MockReply::Fail(message) => Err(TransportError::Connect(message)),
                }
            }
            None => Err(TransportError::Connect(format!("no route to {}", url))),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.reply(RecordedCall {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
            timeout,
        })
        .await
    }

    async fn delete(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.reply(RecordedCall {
            method: "DELETE",
            url: url.to_string(),
            body: None,
            timeout,
        })
        .await
    }
}
