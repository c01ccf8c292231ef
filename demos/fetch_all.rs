//! Fetch a date range of consumption data and print a short summary.
//!
//! Reads credentials from the platform config dir (see
//! `veolia_api::Credentials::config_file_path`), or from the
//! `VEOLIA_USERNAME` / `VEOLIA_PASSWORD` environment variables.

use anyhow::Context;
use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;
use veolia_api::{Credentials, VeoliaClient};

fn credentials() -> anyhow::Result<Credentials> {
    if let (Ok(username), Ok(password)) =
        (std::env::var("VEOLIA_USERNAME"), std::env::var("VEOLIA_PASSWORD"))
    {
        return Ok(Credentials { username, password });
    }
    Credentials::load().context("No credentials in environment or config file")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let creds = credentials()?;
    let mut client = VeoliaClient::new(creds.username, creds.password)?;

    client.login().await.context("Login failed")?;

    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
    client
        .fetch_all_data(start, end)
        .await
        .with_context(|| format!("Failed to fetch data for {start}..{end}"))?;

    let data = &client.account_data;
    println!("daily entries:   {}", data.daily_consumption.len());
    println!("monthly entries: {}", data.monthly_consumption.len());
    if let Some(alerts) = &data.alert_settings {
        println!("daily alert enabled:   {}", alerts.daily_enabled);
        println!("monthly alert enabled: {}", alerts.monthly_enabled);
    }

    Ok(())
}
