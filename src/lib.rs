//! Payment intent and reconciliation service for the pharmacy storefront

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;
