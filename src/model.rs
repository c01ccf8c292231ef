use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One day of water consumption.
///
/// The backend payload is undocumented; only the fields this library needs
/// are typed, everything else is kept verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyConsumption {
    #[serde(deserialize_with = "date_from_portal")]
    pub date_releve: NaiveDate,
    /// Volume in liters.
    pub consommation: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One month of water consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyConsumption {
    pub annee: i32,
    pub mois: u32,
    /// Volume in cubic meters.
    pub consommation: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Consumption alert configuration of the account.
///
/// Thresholds and contact-channel flags are `None` when the corresponding
/// alert is not subscribed. The portal never lets the email channel be
/// disabled for a subscribed alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertSettings {
    pub daily_enabled: bool,
    /// Daily threshold in liters (portal minimum: 100).
    pub daily_threshold: Option<u32>,
    pub daily_notif_email: Option<bool>,
    pub daily_notif_sms: Option<bool>,
    pub monthly_enabled: bool,
    /// Monthly threshold in cubic meters (portal minimum: 1).
    pub monthly_threshold: Option<u32>,
    pub monthly_notif_email: Option<bool>,
    pub monthly_notif_sms: Option<bool>,
}

/// Everything the client knows about the authenticated account.
///
/// Populated by [`crate::VeoliaClient::login`] (identifiers, token) and the
/// fetch methods (series, alerts). Each successful fetch overwrites the
/// previous value; nothing is persisted across process runs.
#[derive(Debug, Clone, Default)]
pub struct AccountData {
    pub access_token: Option<String>,
    pub token_expiration: Option<DateTime<Utc>>,

    // Identifiers discovered from /espace-client and /facturation.
    pub id_abonnement: Option<String>,
    pub numero_pds: Option<String>,
    pub contact_id: Option<String>,
    pub tiers_id: Option<String>,
    pub numero_compteur: Option<String>,
    pub date_debut_abonnement: Option<String>,

    pub daily_consumption: Vec<DailyConsumption>,
    pub monthly_consumption: Vec<MonthlyConsumption>,
    pub alert_settings: Option<AlertSettings>,
}

impl AccountData {
    /// Whether a login already produced a token that is still valid.
    pub fn token_is_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.token_expiration) {
            (Some(_), Some(expiry)) => now < expiry,
            _ => false,
        }
    }
}

/// The portal is inconsistent about dates: plain `2025-01-15` on some
/// endpoints, `2025-01-15T00:00:00` on others. Accept both.
fn date_from_portal<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let date_part = raw.split('T').next().unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn daily_consumption_accepts_plain_date() {
        let entry: DailyConsumption =
            serde_json::from_str(r#"{"date_releve":"2025-01-15","consommation":132.0}"#).unwrap();
        assert_eq!(entry.date_releve, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert!(entry.extra.is_empty());
    }

    #[test]
    fn daily_consumption_accepts_datetime_and_keeps_unknown_fields() {
        let entry: DailyConsumption = serde_json::from_str(
            r#"{"date_releve":"2025-01-15T00:00:00","consommation":132.0,"fiabilite":"MESURE"}"#,
        )
        .unwrap();
        assert_eq!(entry.date_releve, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert_eq!(entry.extra["fiabilite"], Value::from("MESURE"));
    }

    #[test]
    fn daily_consumption_rejects_garbage_date() {
        let err = serde_json::from_str::<DailyConsumption>(
            r#"{"date_releve":"yesterday","consommation":1.0}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn token_validity() {
        let now = Utc::now();
        let mut data = AccountData::default();
        assert!(!data.token_is_valid(now));

        data.access_token = Some("tok".into());
        data.token_expiration = Some(now + Duration::hours(1));
        assert!(data.token_is_valid(now));

        data.token_expiration = Some(now - Duration::seconds(1));
        assert!(!data.token_is_valid(now));
    }
}
