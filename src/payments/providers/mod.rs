//! Gateway adapter implementations
//!
//! Concrete implementations of the PaymentGateway trait, one per gateway style.

pub mod hosted_checkout;
pub mod http;
pub mod mobile_money;

pub use hosted_checkout::{HostedCheckoutConfig, HostedCheckoutGateway};
pub use http::RetryPolicy;
pub use mobile_money::{MobileMoneyConfig, MobileMoneyGateway};
