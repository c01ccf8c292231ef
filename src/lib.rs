//! Async client for the Veolia water-utility customer portal.
//!
//! This crate covers:
//! - Login against the Auth0-fronted portal (redirect walk + PKCE token exchange)
//! - Daily/monthly consumption and alert-settings fetches for one account
//! - A plain data holder ([`AccountData`]) with the last fetched results
//!
//! The upstream API is undocumented; payloads are parsed opportunistically
//! and unknown fields are passed through untouched. There is no retry,
//! backoff or caching layer: every error surfaces to the caller on the
//! first failure.
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use veolia_api::VeoliaClient;
//!
//! # async fn run() -> Result<(), veolia_api::VeoliaError> {
//! let mut client = VeoliaClient::new("name@example.com", "password")?;
//! client.login().await?;
//! client
//!     .fetch_all_data(
//!         NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
//!     )
//!     .await?;
//! println!("{} daily entries", client.account_data.daily_consumption.len());
//! # Ok(())
//! # }
//! ```

mod auth;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod model;

pub use client::VeoliaClient;
pub use config::Credentials;
pub use constants::ConsumptionType;
pub use error::VeoliaError;
pub use model::{AccountData, AlertSettings, DailyConsumption, MonthlyConsumption};
