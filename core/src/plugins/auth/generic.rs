use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

use crate::core::session::ScanSession;
use crate::error::ScanError;
use crate::http::HttpRequest;
use crate::plugins::{Authenticator, Plugin};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenericAuthOptions {
    pub username: String,
    pub password: String,
    pub username_field: String,
    pub password_field: String,
    pub auth_url: String,
    pub check_url: String,
    pub check_string: String,
}

impl GenericAuthOptions {
    /// Every option is required.
    pub fn validate(&self) -> Result<(), ScanError> {
        let fields = [
            ("username", &self.username),
            ("password", &self.password),
            ("usernameField", &self.username_field),
            ("passwordField", &self.password_field),
            ("authUrl", &self.auth_url),
            ("checkUrl", &self.check_url),
            ("checkString", &self.check_string),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ScanError::Config(format!("generic auth: {} is required and can't be empty", name)));
            }
        }
        for (name, value) in [("authUrl", &self.auth_url), ("checkUrl", &self.check_url)] {
            Url::parse(value).map_err(|e| ScanError::Config(format!("generic auth: {}: {}", name, e)))?;
        }
        Ok(())
    }
}

/// Form login: POST the credentials, then look for a marker string on a
/// page only logged-in users see.
pub struct GenericAuth {
    options: GenericAuthOptions,
    auth_url: Url,
    check_url: Url,
    first_error: AtomicBool,
}

impl GenericAuth {
    pub fn new(options: GenericAuthOptions) -> Result<Self, ScanError> {
        options.validate()?;
        let auth_url = Url::parse(&options.auth_url).map_err(|e| ScanError::Config(e.to_string()))?;
        let check_url = Url::parse(&options.check_url).map_err(|e| ScanError::Config(e.to_string()))?;
        Ok(Self {
            options,
            auth_url,
            check_url,
            first_error: AtomicBool::new(true),
        })
    }

    fn login_request(&self) -> HttpRequest {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair(&self.options.username_field, &self.options.username)
            .append_pair(&self.options.password_field, &self.options.password)
            .finish();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
        HttpRequest::new(Method::POST, self.auth_url.clone(), headers, body)
    }

    async fn try_login(&self, session: &ScanSession) -> Result<(), String> {
        session
            .dispatcher()
            .send(&self.login_request())
            .await
            .map_err(|e| e.to_string())?;
        if self.is_logged(session).await {
            Ok(())
        } else {
            Err(format!("Can't login into web application as {}", self.options.username))
        }
    }
}

impl Plugin for GenericAuth {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn description(&self) -> &'static str {
        "Logs into web applications that use a plain login form"
    }
}

#[async_trait]
impl Authenticator for GenericAuth {
    async fn login(&self, session: &ScanSession) -> bool {
        debug!("logging into the application as {}", self.options.username);
        match self.try_login(session).await {
            Ok(()) => {
                debug!("login success for {}", self.options.username);
                true
            }
            Err(e) => {
                if self.first_error.swap(false, Ordering::SeqCst) {
                    error!("{}", e);
                }
                false
            }
        }
    }

    async fn is_logged(&self, session: &ScanSession) -> bool {
        let request = HttpRequest::get(self.check_url.clone());
        let logged_in = match session.dispatcher().send(&request).await {
            Ok(response) => response.body.contains(&self.options.check_string),
            Err(_) => false,
        };
        if logged_in {
            debug!("user {} is currently logged into the application", self.options.username);
        } else {
            debug!("user {} is NOT logged into the application", self.options.username);
        }
        logged_in
    }

    async fn logout(&self, _session: &ScanSession) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionSettings;
    use crate::testing::MockTransport;
    use std::sync::Arc;

    fn options() -> GenericAuthOptions {
        GenericAuthOptions {
            username: "alice".to_string(),
            password: "s3cret&x".to_string(),
            username_field: "user".to_string(),
            password_field: "pass".to_string(),
            auth_url: "http://h/login".to_string(),
            check_url: "http://h/account".to_string(),
            check_string: "Welcome alice".to_string(),
        }
    }

    #[test]
    fn test_every_option_required() {
        assert!(options().validate().is_ok());
        let mut missing = options();
        missing.check_string.clear();
        assert!(matches!(missing.validate(), Err(ScanError::Config(_))));
        let mut bad_url = options();
        bad_url.auth_url = "not a url".to_string();
        assert!(GenericAuth::new(bad_url).is_err());
    }

    #[test]
    fn test_login_request_is_form_encoded() {
        let auth = GenericAuth::new(options()).unwrap();
        let request = auth.login_request();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body, "user=alice&pass=s3cret%26x");
        assert_eq!(request.body_type, crate::http::BodyType::FormUrlEncoded);
    }

    #[tokio::test]
    async fn test_login_checks_marker() {
        let transport = MockTransport::new()
            .page("/login", 302, "")
            .page("/account", 200, "<p>Welcome alice</p>");
        let (session, _rx) = ScanSession::new(Arc::new(transport), SessionSettings::default());
        let auth = GenericAuth::new(options()).unwrap();
        assert!(auth.login(&session).await);
        assert!(auth.is_logged(&session).await);
        auth.logout(&session).await;
    }

    #[tokio::test]
    async fn test_failed_login_returns_false() {
        let transport = MockTransport::new()
            .page("/login", 200, "bad credentials")
            .page("/account", 200, "please log in");
        let (session, _rx) = ScanSession::new(Arc::new(transport), SessionSettings::default());
        let auth = GenericAuth::new(options()).unwrap();
        assert!(!auth.login(&session).await);
        assert!(!auth.login(&session).await);
    }
}
