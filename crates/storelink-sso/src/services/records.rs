//! Record store: tenants, provider records, customer links and login events.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use storelink_core::{LinkId, ProviderId, TenantId};
use storelink_db::{
    CustomerSsoLink, LinkStatus, LoginEvent, NewLoginEvent, SsoProvider, Tenant,
    UpsertCustomerSsoLink,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SsoResult;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_tenant(&self, tenant_id: TenantId) -> SsoResult<Option<Tenant>>;

    async fn find_provider(
        &self,
        tenant_id: TenantId,
        provider_id: ProviderId,
    ) -> SsoResult<Option<SsoProvider>>;

    async fn find_provider_by_type(
        &self,
        tenant_id: TenantId,
        provider_type: &str,
    ) -> SsoResult<Option<SsoProvider>>;

    /// Move a `pending_setup` record to `active` after a test flow.
    async fn activate_provider(&self, tenant_id: TenantId, provider_id: ProviderId)
        -> SsoResult<()>;

    /// Insert or refresh a link. Never changes `status`.
    async fn upsert_link(&self, input: UpsertCustomerSsoLink) -> SsoResult<CustomerSsoLink>;

    /// True when any of the customer's links in the tenant is blocked.
    async fn is_email_blocked(&self, tenant_id: TenantId, email: &str) -> SsoResult<bool>;

    async fn append_event(&self, event: NewLoginEvent) -> SsoResult<()>;
}

/// Postgres-backed record store.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_tenant(&self, tenant_id: TenantId) -> SsoResult<Option<Tenant>> {
        Ok(Tenant::find_by_id(&self.pool, tenant_id.into_uuid()).await?)
    }

    async fn find_provider(
        &self,
        tenant_id: TenantId,
        provider_id: ProviderId,
    ) -> SsoResult<Option<SsoProvider>> {
        Ok(SsoProvider::find_by_id(&self.pool, tenant_id.into_uuid(), provider_id.into_uuid()).await?)
    }

    async fn find_provider_by_type(
        &self,
        tenant_id: TenantId,
        provider_type: &str,
    ) -> SsoResult<Option<SsoProvider>> {
        Ok(SsoProvider::find_by_type(&self.pool, tenant_id.into_uuid(), provider_type).await?)
    }

    async fn activate_provider(
        &self,
        tenant_id: TenantId,
        provider_id: ProviderId,
    ) -> SsoResult<()> {
        SsoProvider::activate(&self.pool, tenant_id.into_uuid(), provider_id.into_uuid()).await?;
        Ok(())
    }

    async fn upsert_link(&self, input: UpsertCustomerSsoLink) -> SsoResult<CustomerSsoLink> {
        Ok(CustomerSsoLink::upsert_on_login(&self.pool, input).await?)
    }

    async fn is_email_blocked(&self, tenant_id: TenantId, email: &str) -> SsoResult<bool> {
        Ok(CustomerSsoLink::is_email_blocked(&self.pool, tenant_id.into_uuid(), email).await?)
    }

    async fn append_event(&self, event: NewLoginEvent) -> SsoResult<()> {
        LoginEvent::append(&self.pool, event).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Records {
    tenants: HashMap<Uuid, Tenant>,
    providers: HashMap<Uuid, SsoProvider>,
    links: HashMap<Uuid, CustomerSsoLink>,
    events: Vec<LoginEvent>,
}

/// Process-local record store for tests and single-instance setups.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecordStore {
    inner: Arc<RwLock<Records>>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant.
    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.inner.write().await.tenants.insert(tenant.id, tenant);
    }

    /// Insert or replace a provider record.
    pub async fn insert_provider(&self, provider: SsoProvider) {
        self.inner
            .write()
            .await
            .providers
            .insert(provider.id, provider);
    }

    pub async fn provider(&self, provider_id: ProviderId) -> Option<SsoProvider> {
        self.inner
            .read()
            .await
            .providers
            .get(provider_id.as_uuid())
            .cloned()
    }

    pub async fn link(&self, link_id: LinkId) -> Option<CustomerSsoLink> {
        self.inner.read().await.links.get(link_id.as_uuid()).cloned()
    }

    /// Block or unblock a link.
    pub async fn set_link_status(&self, link_id: LinkId, status: LinkStatus) {
        if let Some(link) = self.inner.write().await.links.get_mut(link_id.as_uuid()) {
            link.status = status.as_str().to_string();
            link.updated_at = Utc::now();
        }
    }

    /// Every appended event, oldest first.
    pub async fn events(&self) -> Vec<LoginEvent> {
        self.inner.read().await.events.clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_tenant(&self, tenant_id: TenantId) -> SsoResult<Option<Tenant>> {
        Ok(self.inner.read().await.tenants.get(tenant_id.as_uuid()).cloned())
    }

    async fn find_provider(
        &self,
        tenant_id: TenantId,
        provider_id: ProviderId,
    ) -> SsoResult<Option<SsoProvider>> {
        Ok(self
            .inner
            .read()
            .await
            .providers
            .get(provider_id.as_uuid())
            .filter(|p| p.tenant_id == tenant_id.into_uuid())
            .cloned())
    }

    async fn find_provider_by_type(
        &self,
        tenant_id: TenantId,
        provider_type: &str,
    ) -> SsoResult<Option<SsoProvider>> {
        Ok(self
            .inner
            .read()
            .await
            .providers
            .values()
            .find(|p| p.tenant_id == tenant_id.into_uuid() && p.provider_type == provider_type)
            .cloned())
    }

    async fn activate_provider(
        &self,
        tenant_id: TenantId,
        provider_id: ProviderId,
    ) -> SsoResult<()> {
        let mut records = self.inner.write().await;
        if let Some(provider) = records
            .providers
            .get_mut(provider_id.as_uuid())
            .filter(|p| p.tenant_id == tenant_id.into_uuid())
        {
            provider.status = "active".to_string();
            provider.enabled = true;
            provider.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn upsert_link(&self, input: UpsertCustomerSsoLink) -> SsoResult<CustomerSsoLink> {
        let mut records = self.inner.write().await;
        let now = Utc::now();

        let existing = records.links.values_mut().find(|l| {
            l.tenant_id == input.tenant_id
                && l.provider_id == input.provider_id
                && l.external_id == input.external_id
        });

        if let Some(link) = existing {
            link.email = input.email;
            if input.first_name.is_some() {
                link.first_name = input.first_name;
            }
            if input.last_name.is_some() {
                link.last_name = input.last_name;
            }
            link.login_count += 1;
            link.last_login_at = Some(now);
            link.updated_at = now;
            return Ok(link.clone());
        }

        let link = CustomerSsoLink {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            provider_id: input.provider_id,
            external_id: input.external_id,
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            status: LinkStatus::Active.as_str().to_string(),
            login_count: 1,
            last_login_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        records.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn is_email_blocked(&self, tenant_id: TenantId, email: &str) -> SsoResult<bool> {
        Ok(self.inner.read().await.links.values().any(|l| {
            l.tenant_id == tenant_id.into_uuid()
                && l.email.eq_ignore_ascii_case(email)
                && l.is_blocked()
        }))
    }

    async fn append_event(&self, event: NewLoginEvent) -> SsoResult<()> {
        self.inner
            .write()
            .await
            .events
            .push(LoginEvent::from_new(event));
        Ok(())
    }
}
