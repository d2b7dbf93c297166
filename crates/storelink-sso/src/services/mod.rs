//! Business services: customer directory, record store, login codes,
//! downstream login strategy and the auth orchestrator.

pub mod directory;
pub mod login_code;
pub mod login_strategy;
pub mod orchestrator;
pub mod records;

pub use directory::{
    CustomerDirectory, DirectoryCustomer, DirectoryError, DirectoryFactory, HttpCustomerDirectory,
    HttpDirectoryFactory, NewCustomer,
};
pub use login_code::{
    CodeDelivery, DeliveryError, LoginCodeMessage, WebhookCodeDelivery, MIN_WEBHOOK_SECRET_LEN,
};
pub use login_strategy::{DownstreamLogin, LoginRequest, LoginStrategy, PasswordUpdatePolicy};
pub use orchestrator::{
    AuthOrchestrator, OrchestratorSettings, DEFAULT_STOREFRONT_LOGIN_PATH, LOGIN_CODE_SOURCE,
};
pub use records::{InMemoryRecordStore, PgRecordStore, RecordStore};
