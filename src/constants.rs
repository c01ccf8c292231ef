//! Endpoints and fixed parameters of the Veolia customer portal.

use std::time::Duration;

/// Auth0-fronted login portal.
pub const LOGIN_BASE_URL: &str = "https://login.eau.veolia.fr";

/// Customer-facing website, target of the OAuth callback redirect.
pub const WEBSITE_BASE_URL: &str = "https://www.eau.veolia.fr";

/// Backend serving account, consumption and alert data.
pub const BACKEND_BASE_URL: &str = "https://prd-ael-sirius-backend.istefr.fr";

/// Public OAuth client id of the web frontend.
pub const CLIENT_ID: &str = "3kghade1fg54739kj8pkbova8j";

// Login-walk endpoints, relative to `LOGIN_BASE_URL`.
pub const AUTHORIZE_ENDPOINT: &str = "/authorize";
pub const LOGIN_IDENTIFIER_ENDPOINT: &str = "/u/login/identifier";
pub const LOGIN_PASSWORD_ENDPOINT: &str = "/u/login/password";
pub const OAUTH_TOKEN_ENDPOINT: &str = "/oauth/token";

/// OAuth redirect target, relative to `WEBSITE_BASE_URL`.
pub const CALLBACK_ENDPOINT: &str = "/callback";

pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// `type-front` value the portal expects from a browser client.
pub const TYPE_FRONT: &str = "WEB_ORDINATEUR";

/// Per-request timeout applied by [`crate::VeoliaClient::new`].
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Granularity of a consumption query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumptionType {
    /// One entry per day, for a single month.
    Daily,
    /// One entry per month, for a single year.
    Monthly,
}

impl ConsumptionType {
    /// Path segment under `/consommations/{id_abonnement}/`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ConsumptionType::Daily => "journalieres",
            ConsumptionType::Monthly => "mensuelles",
        }
    }
}

impl std::fmt::Display for ConsumptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumptionType::Daily => f.write_str("daily"),
            ConsumptionType::Monthly => f.write_str("monthly"),
        }
    }
}
