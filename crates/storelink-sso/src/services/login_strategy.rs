//! Downstream storefront login: multipass or password hand-off.
//!
//! Find-or-create, password update and link upsert are separate remote
//! calls with no transaction around them. A retry after a partial failure
//! repeats them; every step is idempotent for the same (shop, email).

use chrono::Utc;
use tracing::instrument;

use crate::crypto::{MultipassEncoder, MultipassPayload, PasswordGenerator};
use crate::error::{SsoError, SsoResult};
use crate::models::{LoginMethod, NormalizedProfile};
use crate::services::directory::{CustomerDirectory, NewCustomer};
use crate::state::{CredentialHandoff, StateService};

/// What to do when updating an existing customer's password fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PasswordUpdatePolicy {
    /// Log a warning and continue with the hand-off.
    #[default]
    BestEffort,
    /// Fail the login with a directory error.
    Strict,
}

impl PasswordUpdatePolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestEffort => "best_effort",
            Self::Strict => "strict",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "best_effort" => Some(Self::BestEffort),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// How the storefront session will be completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamLogin {
    Multipass { redirect_url: String },
    Password { handoff_token: String },
}

impl DownstreamLogin {
    #[must_use]
    pub fn method(&self) -> LoginMethod {
        match self {
            Self::Multipass { .. } => LoginMethod::Multipass,
            Self::Password { .. } => LoginMethod::Password,
        }
    }
}

/// Everything the strategy needs about one tenant and one login.
pub struct LoginRequest<'a> {
    pub shop_domain: &'a str,
    pub is_plus_tier: bool,
    /// Decrypted multipass secret, if the tenant has one.
    pub multipass_secret: Option<&'a str>,
    /// Provider type, or `login_code`; becomes a customer tag.
    pub source: &'a str,
    pub profile: &'a NormalizedProfile,
    pub return_to: &'a str,
}

#[derive(Clone)]
pub struct LoginStrategy {
    passwords: PasswordGenerator,
    state: StateService,
    policy: PasswordUpdatePolicy,
}

impl LoginStrategy {
    #[must_use]
    pub fn new(
        passwords: PasswordGenerator,
        state: StateService,
        policy: PasswordUpdatePolicy,
    ) -> Self {
        Self {
            passwords,
            state,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> PasswordUpdatePolicy {
        self.policy
    }

    /// Multipass when the tenant is on the Plus tier and has a secret,
    /// password hand-off otherwise.
    #[instrument(
        skip(self, request, directory),
        fields(shop = %request.shop_domain, source = %request.source)
    )]
    pub async fn complete(
        &self,
        request: &LoginRequest<'_>,
        directory: &dyn CustomerDirectory,
    ) -> SsoResult<DownstreamLogin> {
        match request.multipass_secret.filter(|s| !s.is_empty()) {
            Some(secret) if request.is_plus_tier => self.multipass(request, secret),
            _ => self.password(request, directory).await,
        }
    }

    fn multipass(&self, request: &LoginRequest<'_>, secret: &str) -> SsoResult<DownstreamLogin> {
        let mut payload = MultipassPayload::new(&request.profile.email, Utc::now());
        payload.first_name = request.profile.first_name.clone();
        payload.last_name = request.profile.last_name.clone();
        payload.return_to = Some(request.return_to.to_string());

        let redirect_url = MultipassEncoder::new(secret)
            .login_url(request.shop_domain, &payload)
            .map_err(|e| SsoError::Internal(format!("multipass encoding failed: {e}")))?;

        tracing::debug!("Completing storefront login with multipass");
        Ok(DownstreamLogin::Multipass { redirect_url })
    }

    async fn password(
        &self,
        request: &LoginRequest<'_>,
        directory: &dyn CustomerDirectory,
    ) -> SsoResult<DownstreamLogin> {
        let email = request.profile.email.as_str();
        let password = self.passwords.generate(request.shop_domain, email);

        match directory.find_by_email(email).await? {
            Some(customer) => {
                if let Err(err) = directory.update_password(customer.id, &password).await {
                    match self.policy {
                        PasswordUpdatePolicy::Strict => return Err(err.into()),
                        PasswordUpdatePolicy::BestEffort => {
                            tracing::warn!(
                                customer_id = customer.id,
                                upstream_status = ?err.status(),
                                error = %err,
                                "Password update failed, continuing with hand-off"
                            );
                        }
                    }
                }
            }
            None => {
                let created = directory
                    .create(NewCustomer {
                        email: email.to_string(),
                        password: password.clone(),
                        first_name: request.profile.first_name.clone(),
                        last_name: request.profile.last_name.clone(),
                        tags: vec!["sso".to_string(), request.source.to_string()],
                    })
                    .await?;
                tracing::info!(customer_id = created.id, "Created storefront customer");
            }
        }

        let handoff_token = self
            .state
            .create_handoff(&CredentialHandoff {
                email: email.to_string(),
                password,
                return_to: request.return_to.to_string(),
            })
            .await?;

        Ok(DownstreamLogin::Password { handoff_token })
    }
}
