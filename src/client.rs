//! The API client: login, account discovery, consumption and alert calls.

use chrono::{Datelike, NaiveDate, Utc};
use reqwest::{Client, StatusCode, redirect};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::{self, LoginFlow};
use crate::constants::{BACKEND_BASE_URL, ConsumptionType, REQUEST_TIMEOUT, TYPE_FRONT};
use crate::error::{Result, VeoliaError};
use crate::model::{AccountData, AlertSettings, DailyConsumption, MonthlyConsumption};

/// Async client for one Veolia customer account.
///
/// Holds the credentials, the HTTP client and the last fetched
/// [`AccountData`]. All fetch methods re-login transparently when the bearer
/// token is missing or expired; apart from that there is no retry, backoff
/// or caching. Results of each fetch overwrite the previous ones.
pub struct VeoliaClient {
    username: String,
    password: String,
    http: Client,
    pub account_data: AccountData,
}

// The password never appears in Debug output.
impl std::fmt::Debug for VeoliaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VeoliaClient")
            .field("username", &self.username)
            .field("password", &"******")
            .field("account_data", &self.account_data)
            .finish()
    }
}

impl VeoliaClient {
    /// Build a client with its own HTTP transport: redirects disabled (the
    /// login walk reads `Location` headers itself) and a 15 s timeout.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_http_client(username, password, http))
    }

    /// Use a caller-owned transport. The caller is responsible for its
    /// lifetime and must have disabled automatic redirects, otherwise the
    /// login walk cannot observe the callback.
    pub fn with_http_client(
        username: impl Into<String>,
        password: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            http,
            account_data: AccountData::default(),
        }
    }

    /// Authenticate and discover the account identifiers.
    ///
    /// Fails with [`VeoliaError::InvalidCredentials`] when the portal rejects
    /// the password, with a transport/parse error otherwise.
    pub async fn login(&mut self) -> Result<()> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(VeoliaError::MissingCredentials);
        }

        let code = LoginFlow::new(&self.http, &self.username, &self.password)
            .run()
            .await?;
        let token = auth::exchange_code(&self.http, &code).await?;
        self.account_data.access_token = Some(token.token);
        self.account_data.token_expiration = Some(token.expiration);

        self.fetch_account_context().await?;
        info!("login successful");
        Ok(())
    }

    /// Re-login when there is no token or it is past its expiry.
    async fn check_token(&mut self) -> Result<()> {
        if !self.account_data.token_is_valid(Utc::now()) {
            debug!("no access token or token expired, logging in again");
            self.login().await?;
        }
        Ok(())
    }

    fn bearer(&self) -> Result<&str> {
        self.account_data
            .access_token
            .as_deref()
            .ok_or_else(|| VeoliaError::payload("no access token after login"))
    }

    /// `/espace-client` and `/facturation`: contact, tiers and subscription
    /// identifiers every later call needs.
    async fn fetch_account_context(&mut self) -> Result<()> {
        let url = format!("{BACKEND_BASE_URL}/espace-client");
        let body = self
            .get_authenticated("espace-client call", &url, &[("type-front", TYPE_FRONT)])
            .await?;
        let ids = parse_espace_client(&body)?;

        let url = format!("{BACKEND_BASE_URL}/abonnements/{}/facturation", ids.id_abonnement);
        let body = self.get_authenticated("facturation call", &url, &[]).await?;
        let billing = parse_facturation(&body)?;

        self.account_data.id_abonnement = Some(ids.id_abonnement);
        self.account_data.contact_id = Some(ids.contact_id);
        self.account_data.tiers_id = Some(ids.tiers_id);
        self.account_data.numero_compteur = Some(ids.numero_compteur);
        self.account_data.numero_pds = Some(billing.numero_pds);
        self.account_data.date_debut_abonnement = Some(billing.date_debut_abonnement);
        Ok(())
    }

    /// Daily consumption for one month.
    pub async fn get_daily_consumption(
        &mut self,
        year: i32,
        month: u32,
    ) -> Result<Vec<DailyConsumption>> {
        let body = self
            .consumption_request(ConsumptionType::Daily, year, Some(month))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Monthly consumption for one year.
    pub async fn get_monthly_consumption(&mut self, year: i32) -> Result<Vec<MonthlyConsumption>> {
        let body = self
            .consumption_request(ConsumptionType::Monthly, year, None)
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn consumption_request(
        &mut self,
        kind: ConsumptionType,
        year: i32,
        month: Option<u32>,
    ) -> Result<String> {
        self.check_token().await?;

        let id_abonnement = self
            .account_data
            .id_abonnement
            .clone()
            .ok_or_else(|| VeoliaError::payload("no subscription id after login"))?;
        let numero_pds = self
            .account_data
            .numero_pds
            .clone()
            .ok_or_else(|| VeoliaError::payload("no delivery-point number after login"))?;
        let date_debut = self
            .account_data
            .date_debut_abonnement
            .clone()
            .ok_or_else(|| VeoliaError::payload("no subscription start date after login"))?;

        let url = format!(
            "{BACKEND_BASE_URL}/consommations/{id_abonnement}/{}",
            kind.endpoint()
        );

        let year = year.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("annee", &year),
            ("numero-pds", &numero_pds),
            ("date-debut-abonnement", &date_debut),
        ];
        let month = month.map(|m| m.to_string());
        if let Some(month) = &month {
            query.push(("mois", month));
        }

        debug!(%kind, "fetching consumption data");
        self.get_authenticated("consumption call", &url, &query).await
    }

    /// Current alert configuration of the account.
    pub async fn get_alerts(&mut self) -> Result<AlertSettings> {
        self.check_token().await?;
        let numero_pds = self
            .account_data
            .numero_pds
            .clone()
            .ok_or_else(|| VeoliaError::payload("no delivery-point number after login"))?;
        let abo_id = self
            .account_data
            .id_abonnement
            .clone()
            .ok_or_else(|| VeoliaError::payload("no subscription id after login"))?;

        let url = format!("{BACKEND_BASE_URL}/alertes/{numero_pds}");
        let body = self
            .get_authenticated("get alerts call", &url, &[("abo_id", &abo_id)])
            .await?;
        parse_alerts(&body)
    }

    /// Update the alert configuration. Returns `true` when the portal
    /// acknowledged the change (HTTP 204).
    pub async fn set_alerts(&mut self, settings: &AlertSettings) -> Result<bool> {
        self.check_token().await?;
        let numero_pds = self
            .account_data
            .numero_pds
            .clone()
            .ok_or_else(|| VeoliaError::payload("no delivery-point number after login"))?;

        let payload = build_alert_payload(settings, &self.account_data)?;
        let url = format!("{BACKEND_BASE_URL}/alertes/{numero_pds}");

        debug!(%url, "updating alert settings");
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.bearer()?)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        debug!(%status, "alert update response");
        Ok(status == StatusCode::NO_CONTENT)
    }

    /// Fetch everything for a date range and store it in [`Self::account_data`]:
    /// monthly series for each covered year, daily series for each covered
    /// month (clipped to the requested bounds) and the alert settings.
    /// Previously stored data is overwritten, not appended to.
    pub async fn fetch_all_data(&mut self, start: NaiveDate, end: NaiveDate) -> Result<()> {
        if start > end {
            return Err(VeoliaError::InvalidDateRange { start, end });
        }

        let months = months_between(start, end);

        let mut monthly = Vec::new();
        let mut last_year = None;
        for &(year, _) in &months {
            if last_year == Some(year) {
                continue;
            }
            last_year = Some(year);
            monthly.extend(self.get_monthly_consumption(year).await?);
        }
        monthly.retain(|entry| {
            months.contains(&(entry.annee, entry.mois))
        });

        let mut daily = Vec::new();
        for &(year, month) in &months {
            daily.extend(self.get_daily_consumption(year, month).await?);
        }
        daily.retain(|entry| entry.date_releve >= start && entry.date_releve <= end);

        let alerts = self.get_alerts().await?;

        self.account_data.monthly_consumption = monthly;
        self.account_data.daily_consumption = daily;
        self.account_data.alert_settings = Some(alerts);
        Ok(())
    }

    /// Authenticated GET returning the body on 200, an error otherwise.
    async fn get_authenticated(
        &self,
        context: &'static str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<String> {
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(self.bearer()?)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        debug!(%status, "received response");
        let body = response.text().await?;

        if status != StatusCode::OK {
            debug!(body = %truncate_body(&body), "error response body");
            return Err(VeoliaError::UnexpectedStatus { context, status });
        }
        Ok(body)
    }
}

/// Identifiers extracted from `/espace-client`.
#[derive(Debug)]
struct ClientIdentifiers {
    id_abonnement: String,
    contact_id: String,
    tiers_id: String,
    numero_compteur: String,
}

#[derive(Debug, Deserialize)]
struct EspaceClientResponse {
    #[serde(default)]
    contacts: Vec<EspaceContact>,
}

#[derive(Debug, Deserialize)]
struct EspaceContact {
    id_contact: Option<Value>,
    #[serde(default)]
    tiers: Vec<EspaceTiers>,
}

#[derive(Debug, Deserialize)]
struct EspaceTiers {
    id: Option<Value>,
    #[serde(default)]
    abonnements: Vec<EspaceAbonnement>,
}

#[derive(Debug, Deserialize)]
struct EspaceAbonnement {
    id_abonnement: Option<Value>,
    numero_compteur: Option<Value>,
}

/// Portal ids show up as numbers or strings depending on the endpoint.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_espace_client(body: &str) -> Result<ClientIdentifiers> {
    let parsed: EspaceClientResponse = serde_json::from_str(body)?;

    let contact = parsed
        .contacts
        .first()
        .ok_or_else(|| VeoliaError::payload("no contact in espace-client response"))?;
    let tiers = contact
        .tiers
        .first()
        .ok_or_else(|| VeoliaError::payload("no tiers in espace-client response"))?;
    let abonnement = tiers
        .abonnements
        .first()
        .ok_or_else(|| VeoliaError::payload("no subscription in espace-client response"))?;

    Ok(ClientIdentifiers {
        id_abonnement: id_string(abonnement.id_abonnement.as_ref())
            .ok_or_else(|| VeoliaError::payload("subscription id not found in the response"))?,
        contact_id: id_string(contact.id_contact.as_ref())
            .ok_or_else(|| VeoliaError::payload("contact id not found in the response"))?,
        tiers_id: id_string(tiers.id.as_ref())
            .ok_or_else(|| VeoliaError::payload("tiers id not found in the response"))?,
        numero_compteur: id_string(abonnement.numero_compteur.as_ref())
            .ok_or_else(|| VeoliaError::payload("meter number not found in the response"))?,
    })
}

#[derive(Debug)]
struct BillingInfo {
    numero_pds: String,
    date_debut_abonnement: String,
}

#[derive(Debug, Deserialize)]
struct FacturationResponse {
    numero_pds: Option<Value>,
    date_debut_abonnement: Option<String>,
}

fn parse_facturation(body: &str) -> Result<BillingInfo> {
    let parsed: FacturationResponse = serde_json::from_str(body)?;
    Ok(BillingInfo {
        numero_pds: id_string(parsed.numero_pds.as_ref())
            .ok_or_else(|| VeoliaError::payload("numero_pds not found in the response"))?,
        date_debut_abonnement: parsed
            .date_debut_abonnement
            .ok_or_else(|| VeoliaError::payload("date_debut_abonnement not found in the response"))?,
    })
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    seuils: Seuils,
}

#[derive(Debug, Deserialize)]
struct Seuils {
    journalier: Option<Seuil>,
    mensuel: Option<Seuil>,
}

#[derive(Debug, Deserialize)]
struct Seuil {
    valeur: u32,
    moyen_contact: MoyenContact,
}

#[derive(Debug, Deserialize)]
struct MoyenContact {
    souscrit_par_email: bool,
    souscrit_par_mobile: bool,
}

fn parse_alerts(body: &str) -> Result<AlertSettings> {
    let parsed: AlertsResponse = serde_json::from_str(body)?;
    let daily = parsed.seuils.journalier;
    let monthly = parsed.seuils.mensuel;

    Ok(AlertSettings {
        daily_enabled: daily.is_some(),
        daily_threshold: daily.as_ref().map(|s| s.valeur),
        daily_notif_email: daily.as_ref().map(|s| s.moyen_contact.souscrit_par_email),
        daily_notif_sms: daily.as_ref().map(|s| s.moyen_contact.souscrit_par_mobile),
        monthly_enabled: monthly.is_some(),
        monthly_threshold: monthly.as_ref().map(|s| s.valeur),
        monthly_notif_email: monthly.as_ref().map(|s| s.moyen_contact.souscrit_par_email),
        monthly_notif_sms: monthly.as_ref().map(|s| s.moyen_contact.souscrit_par_mobile),
    })
}

fn build_alert_payload(settings: &AlertSettings, account: &AccountData) -> Result<Value> {
    let contact_id = account
        .contact_id
        .clone()
        .ok_or_else(|| VeoliaError::payload("no contact id after login"))?;
    let tiers_id = account
        .tiers_id
        .clone()
        .ok_or_else(|| VeoliaError::payload("no tiers id after login"))?;
    let numero_compteur = account
        .numero_compteur
        .clone()
        .ok_or_else(|| VeoliaError::payload("no meter number after login"))?;
    let abo_id = account
        .id_abonnement
        .clone()
        .ok_or_else(|| VeoliaError::payload("no subscription id after login"))?;

    let mut payload = serde_json::Map::new();

    if settings.daily_enabled {
        let threshold = settings
            .daily_threshold
            .ok_or_else(|| VeoliaError::InvalidAlertSettings("daily alert enabled without a threshold"))?;
        payload.insert(
            "alerte_journaliere".into(),
            serde_json::json!({
                "seuil": threshold,
                "unite": "L",
                "souscrite": true,
                "contact_channel": {
                    "subscribed_by_email": settings.daily_notif_email.unwrap_or(true),
                    "subscribed_by_mobile": settings.daily_notif_sms.unwrap_or(false),
                },
            }),
        );
    }

    if settings.monthly_enabled {
        let threshold = settings
            .monthly_threshold
            .ok_or_else(|| VeoliaError::InvalidAlertSettings("monthly alert enabled without a threshold"))?;
        payload.insert(
            "alerte_mensuelle".into(),
            serde_json::json!({
                "seuil": threshold,
                "unite": "M3",
                "souscrite": true,
                "contact_channel": {
                    "subscribed_by_email": settings.monthly_notif_email.unwrap_or(true),
                    "subscribed_by_mobile": settings.monthly_notif_sms.unwrap_or(false),
                },
            }),
        );
    }

    payload.insert("contact_id".into(), Value::from(contact_id));
    payload.insert("numero_compteur".into(), Value::from(numero_compteur));
    payload.insert("tiers_id".into(), Value::from(tiers_id));
    payload.insert("abo_id".into(), Value::from(abo_id));
    payload.insert("type_front".into(), Value::from(TYPE_FRONT));

    Ok(Value::Object(payload))
}

/// All `(year, month)` pairs touched by the inclusive date range.
fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());
    while (year, month) <= (end.year(), end.month()) {
        months.push((year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    months
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    // The cut must land on a char boundary, portal error pages are
    // French text with plenty of multibyte characters.
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALERTS_BODY: &str = r#"{
        "seuils": {
            "journalier": {
                "valeur": 100,
                "unite": "L",
                "moyen_contact": {
                    "souscrit_par_email": true,
                    "souscrit_par_mobile": true
                }
            },
            "mensuel": {
                "valeur": 5,
                "unite": "M3",
                "moyen_contact": {
                    "souscrit_par_email": true,
                    "souscrit_par_mobile": false
                }
            }
        }
    }"#;

    const ESPACE_CLIENT_BODY: &str = r#"{
        "contacts": [{
            "id_contact": "C-123",
            "tiers": [{
                "id": 456,
                "abonnements": [{
                    "id_abonnement": 789,
                    "numero_compteur": "A19XX000000"
                }]
            }]
        }]
    }"#;

    #[test]
    fn parses_full_alert_settings() {
        let alerts = parse_alerts(ALERTS_BODY).unwrap();
        assert!(alerts.daily_enabled);
        assert_eq!(alerts.daily_threshold, Some(100));
        assert_eq!(alerts.daily_notif_sms, Some(true));
        assert!(alerts.monthly_enabled);
        assert_eq!(alerts.monthly_threshold, Some(5));
        assert_eq!(alerts.monthly_notif_sms, Some(false));
    }

    #[test]
    fn absent_thresholds_disable_alerts() {
        let alerts = parse_alerts(r#"{"seuils": {}}"#).unwrap();
        assert!(!alerts.daily_enabled);
        assert_eq!(alerts.daily_threshold, None);
        assert!(!alerts.monthly_enabled);
        assert_eq!(alerts.monthly_notif_email, None);
    }

    #[test]
    fn malformed_alerts_body_is_a_parse_error() {
        let err = parse_alerts(r#"{"unexpected": true}"#).unwrap_err();
        assert!(matches!(err, VeoliaError::Parse(_)));
    }

    #[test]
    fn espace_client_ids_are_extracted_whatever_their_json_type() {
        let ids = parse_espace_client(ESPACE_CLIENT_BODY).unwrap();
        assert_eq!(ids.contact_id, "C-123");
        assert_eq!(ids.tiers_id, "456");
        assert_eq!(ids.id_abonnement, "789");
        assert_eq!(ids.numero_compteur, "A19XX000000");
    }

    #[test]
    fn espace_client_without_contacts_is_a_payload_error() {
        let err = parse_espace_client(r#"{"contacts": []}"#).unwrap_err();
        assert!(matches!(err, VeoliaError::UnexpectedPayload(_)));
    }

    #[test]
    fn facturation_requires_numero_pds() {
        let billing =
            parse_facturation(r#"{"numero_pds": 31415, "date_debut_abonnement": "2019-03-01"}"#)
                .unwrap();
        assert_eq!(billing.numero_pds, "31415");
        assert_eq!(billing.date_debut_abonnement, "2019-03-01");

        let err = parse_facturation(r#"{"date_debut_abonnement": "2019-03-01"}"#).unwrap_err();
        assert!(matches!(err, VeoliaError::UnexpectedPayload(_)));
    }

    #[test]
    fn alert_payload_contains_only_enabled_alerts() {
        let account = AccountData {
            contact_id: Some("C-123".into()),
            tiers_id: Some("456".into()),
            numero_compteur: Some("A19XX000000".into()),
            id_abonnement: Some("789".into()),
            ..AccountData::default()
        };

        let settings = AlertSettings {
            daily_enabled: true,
            daily_threshold: Some(150),
            daily_notif_email: Some(true),
            daily_notif_sms: Some(false),
            monthly_enabled: false,
            ..AlertSettings::default()
        };

        let payload = build_alert_payload(&settings, &account).unwrap();
        assert_eq!(payload["alerte_journaliere"]["seuil"], 150);
        assert_eq!(payload["alerte_journaliere"]["unite"], "L");
        assert!(payload.get("alerte_mensuelle").is_none());
        assert_eq!(payload["abo_id"], "789");
        assert_eq!(payload["type_front"], TYPE_FRONT);
    }

    #[test]
    fn enabled_alert_without_threshold_is_rejected() {
        let account = AccountData {
            contact_id: Some("c".into()),
            tiers_id: Some("t".into()),
            numero_compteur: Some("m".into()),
            id_abonnement: Some("a".into()),
            ..AccountData::default()
        };

        let settings = AlertSettings { daily_enabled: true, ..AlertSettings::default() };
        let err = build_alert_payload(&settings, &account).unwrap_err();
        assert!(matches!(err, VeoliaError::InvalidAlertSettings(_)));
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        // 'é' is two bytes and straddles the 200-byte cut.
        let body = format!("{}é{}", "a".repeat(199), "suite du message d'erreur");
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.trim_end_matches('.'), "a".repeat(199));
    }

    #[test]
    fn truncate_body_keeps_short_bodies_untouched() {
        assert_eq!(truncate_body("pas trouvé"), "pas trouvé");
    }

    #[test]
    fn months_between_spans_year_boundaries() {
        let start = NaiveDate::from_ymd_opt(2024, 11, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        assert_eq!(
            months_between(start, end),
            vec![(2024, 11), (2024, 12), (2025, 1), (2025, 2)]
        );
    }

    #[test]
    fn months_between_single_month() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        assert_eq!(months_between(day, day), vec![(2025, 6)]);
    }

    #[tokio::test]
    async fn login_without_credentials_fails_fast() {
        let mut client = VeoliaClient::new("", "").unwrap();
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, VeoliaError::MissingCredentials));
    }

    #[tokio::test]
    async fn fetch_all_rejects_inverted_range() {
        let mut client = VeoliaClient::new("user@example.com", "hunter2").unwrap();
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let err = client.fetch_all_data(start, end).await.unwrap_err();
        assert!(matches!(err, VeoliaError::InvalidDateRange { .. }));
    }

    #[test]
    fn refetch_overwrites_stored_series() {
        let mut account = AccountData::default();
        account.daily_consumption =
            serde_json::from_str(r#"[{"date_releve":"2025-01-01","consommation":10.0}]"#).unwrap();
        assert_eq!(account.daily_consumption.len(), 1);

        // A later fetch stores a fresh series, it never appends.
        account.daily_consumption = serde_json::from_str(
            r#"[{"date_releve":"2025-02-01","consommation":20.0},
                {"date_releve":"2025-02-02","consommation":30.0}]"#,
        )
        .unwrap();
        assert_eq!(account.daily_consumption.len(), 2);
        assert_eq!(
            account.daily_consumption[0].date_releve,
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()
        );
    }
}
