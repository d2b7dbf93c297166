//! Storefront customer directory (Admin REST API).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY_LEN: usize = 300;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("directory request failed: {0}")]
    Transport(String),

    #[error("unexpected directory response: {0}")]
    InvalidResponse(String),
}

impl DirectoryError {
    /// Upstream HTTP status, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(_) | Self::InvalidResponse(_) => None,
        }
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A storefront customer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryCustomer {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub tags: String,
}

#[derive(Clone)]
pub struct NewCustomer {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub tags: Vec<String>,
}

impl std::fmt::Debug for NewCustomer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCustomer")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Customer operations the login flow needs.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryCustomer>, DirectoryError>;

    async fn create(&self, customer: NewCustomer) -> Result<DirectoryCustomer, DirectoryError>;

    async fn update_password(&self, customer_id: i64, password: &str) -> Result<(), DirectoryError>;

    async fn get(&self, customer_id: i64) -> Result<Option<DirectoryCustomer>, DirectoryError>;
}

/// Builds a directory bound to one store's domain and access token.
pub trait DirectoryFactory: Send + Sync {
    fn for_tenant(&self, shop_domain: &str, access_token: &str) -> Arc<dyn CustomerDirectory>;
}

/// Factory for [`HttpCustomerDirectory`].
#[derive(Clone)]
pub struct HttpDirectoryFactory {
    http: reqwest::Client,
    api_version: String,
    base_url_override: Option<String>,
}

impl HttpDirectoryFactory {
    /// `http` should carry the outbound timeout.
    #[must_use]
    pub fn new(http: reqwest::Client, api_version: impl Into<String>) -> Self {
        Self {
            http,
            api_version: api_version.into(),
            base_url_override: None,
        }
    }

    /// Send every store's calls to one base URL (mock servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }
}

impl DirectoryFactory for HttpDirectoryFactory {
    fn for_tenant(&self, shop_domain: &str, access_token: &str) -> Arc<dyn CustomerDirectory> {
        let origin = self
            .base_url_override
            .clone()
            .unwrap_or_else(|| format!("https://{shop_domain}"));
        Arc::new(HttpCustomerDirectory {
            http: self.http.clone(),
            base_url: format!(
                "{}/admin/api/{}",
                origin.trim_end_matches('/'),
                self.api_version
            ),
            access_token: access_token.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct CustomerEnvelope {
    customer: DirectoryCustomer,
}

#[derive(Deserialize)]
struct CustomersEnvelope {
    customers: Vec<DirectoryCustomer>,
}

/// Admin REST customer directory for one store.
pub struct HttpCustomerDirectory {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpCustomerDirectory {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("X-Shopify-Access-Token", &self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        Err(DirectoryError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CustomerDirectory for HttpCustomerDirectory {
    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryCustomer>, DirectoryError> {
        let response = self
            .request(reqwest::Method::GET, "/customers/search.json")
            .query(&[("query", format!("email:\"{email}\""))])
            .send()
            .await?;
        let envelope: CustomersEnvelope = Self::check(response).await?.json().await?;

        // Search is fuzzy; only an exact (case-insensitive) address matches.
        Ok(envelope.customers.into_iter().find(|c| {
            c.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        }))
    }

    #[instrument(skip(self, customer), fields(email = %customer.email))]
    async fn create(&self, customer: NewCustomer) -> Result<DirectoryCustomer, DirectoryError> {
        let body = json!({
            "customer": {
                "email": customer.email,
                "first_name": customer.first_name,
                "last_name": customer.last_name,
                "password": customer.password,
                "password_confirmation": customer.password,
                "tags": customer.tags.join(", "),
                "verified_email": true,
                "send_email_welcome": false,
            }
        });
        let response = self
            .request(reqwest::Method::POST, "/customers.json")
            .json(&body)
            .send()
            .await?;
        let envelope: CustomerEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.customer)
    }

    #[instrument(skip(self, password))]
    async fn update_password(&self, customer_id: i64, password: &str) -> Result<(), DirectoryError> {
        let body = json!({
            "customer": {
                "id": customer_id,
                "password": password,
                "password_confirmation": password,
            }
        });
        let response = self
            .request(reqwest::Method::PUT, &format!("/customers/{customer_id}.json"))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, customer_id: i64) -> Result<Option<DirectoryCustomer>, DirectoryError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/customers/{customer_id}.json"))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: CustomerEnvelope = Self::check(response).await?.json().await?;
        Ok(Some(envelope.customer))
    }
}
