use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

const MIN_FIELD_CHARS: usize = 6;
const MAX_FIELD_CHARS: usize = 256;

/// Login form payload for the auth endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Field name → first failed constraint message, mirroring the form-level
/// error map the UI renders.
pub type FieldErrors = BTreeMap<String, String>;

impl Credentials {
    /// Validate both fields: 6..=256 characters each, password non-empty.
    /// Only the first failed constraint per field is reported.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if let Some(message) = length_error(&self.login) {
            errors.insert("login".to_string(), message);
        }
        if self.password.is_empty() {
            errors.insert("password".to_string(), "must not be empty".to_string());
        } else if let Some(message) = length_error(&self.password) {
            errors.insert("password".to_string(), message);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn length_error(value: &str) -> Option<String> {
    let chars = value.chars().count();
    if chars < MIN_FIELD_CHARS {
        Some(format!("must be at least {MIN_FIELD_CHARS} characters"))
    } else if chars > MAX_FIELD_CHARS {
        Some(format!("must be at most {MAX_FIELD_CHARS} characters"))
    } else {
        None
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential validation failed")]
    Validation(FieldErrors),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Client for the `login` / `register` / `logout` endpoints. Relative routes
/// are prefixed with the configured base URL; absolute ones pass through.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        // Session auth rides on cookies, so the client keeps a jar.
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.post_credentials("login", credentials).await
    }

    pub async fn register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.post_credentials("register", credentials).await
    }

    /// Route selection follows the registration toggle exactly.
    pub async fn submit(
        &self,
        credentials: &Credentials,
        is_registration: bool,
    ) -> Result<(), AuthError> {
        if is_registration {
            self.register(credentials).await
        } else {
            self.login(credentials).await
        }
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.http
            .get(self.endpoint("logout"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn post_credentials(
        &self,
        route: &str,
        credentials: &Credentials,
    ) -> Result<(), AuthError> {
        // Validation failures never reach the network.
        credentials.validate().map_err(AuthError::Validation)?;
        self.http
            .post(self.endpoint(route))
            .json(credentials)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn endpoint(&self, route: &str) -> String {
        if route.starts_with("http") {
            route.to_string()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), route)
        }
    }
}
