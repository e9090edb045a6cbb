//! Payment intents and reconciliation
//!
//! Gateways (mobile money, hosted checkout) sit behind the `PaymentGateway`
//! trait; the orchestrator opens intents and the reconciliation service
//! settles them from webhooks, confirmations and verifications.

pub mod currency;
pub mod notification;
pub mod orchestrator;
pub mod order_sync;
pub mod providers;
pub mod reconciliation;
pub mod status;
pub mod traits;
pub mod types;
