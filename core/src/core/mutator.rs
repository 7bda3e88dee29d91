use std::collections::HashSet;
use std::sync::Arc;

use log::trace;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use serde_json::Value;

use crate::http::{BodyType, HttpRequest, Resource};

/// Everything except the unreserved set gets escaped in form values.
const FORM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where a candidate value goes in a derived request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InjectionPoint {
    /// URL query parameter, by name
    UrlParam(String),
    /// HTTP header, by name
    Header(String),
    /// JSON body field, by path (e.g. "user.profile.name", "items[0]")
    JsonField(String),
    /// form-urlencoded body parameter, by name
    FormParam(String),
    /// a path component resolved against the base URL's directory
    PathSegment,
}

impl std::fmt::Display for InjectionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectionPoint::UrlParam(p) => write!(f, "param: {}", p),
            InjectionPoint::Header(h) => write!(f, "header: {}", h),
            InjectionPoint::JsonField(j) => write!(f, "json: {}", j),
            InjectionPoint::FormParam(p) => write!(f, "form: {}", p),
            InjectionPoint::PathSegment => write!(f, "path"),
        }
    }
}

/// A request derived from a shared base by placing one candidate value at one
/// injection point. The mutated request is built once, at creation.
#[derive(Debug, Clone)]
pub struct Probe {
    base: Arc<HttpRequest>,
    point: InjectionPoint,
    value: String,
    request: HttpRequest,
}

impl Probe {
    /// Returns `None` when the value cannot be placed at that point
    /// (e.g. a path component that does not resolve to a URL).
    pub fn new(base: Arc<HttpRequest>, point: InjectionPoint, value: String) -> Option<Self> {
        let request = mutate_request(&base, &point, &value)?;
        Some(Self {
            base,
            point,
            value,
            request,
        })
    }

    pub fn base(&self) -> &HttpRequest {
        &self.base
    }

    pub fn point(&self) -> &InjectionPoint {
        &self.point
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn resource(&self) -> Resource {
        self.request.resource()
    }
}

/// Turns a base request plus candidate values into probes. No I/O, no state:
/// every call walks the candidates afresh.
pub struct MutationFactory;

impl MutationFactory {
    /// One probe per (injection point of `base`, candidate).
    pub fn generate<I>(base: Arc<HttpRequest>, candidates: I) -> impl Iterator<Item = Probe>
    where
        I: IntoIterator<Item = String>,
    {
        let points = extract_injection_points(&base);
        candidates.into_iter().flat_map(move |value| {
            let base = Arc::clone(&base);
            points
                .clone()
                .into_iter()
                .filter_map(move |point| Probe::new(Arc::clone(&base), point, value.clone()))
        })
    }

    /// One probe per candidate at a single fixed injection point.
    pub fn generate_at<I>(
        base: Arc<HttpRequest>,
        point: InjectionPoint,
        candidates: I,
    ) -> impl Iterator<Item = Probe>
    where
        I: IntoIterator<Item = String>,
    {
        candidates.into_iter().filter_map(move |value| {
            let probe = Probe::new(Arc::clone(&base), point.clone(), value);
            if probe.is_none() {
                trace!("candidate could not be placed at {}; skipped", point);
            }
            probe
        })
    }
}

/// Headers that are never fuzzed.
fn blacklisted_headers() -> HashSet<&'static str> {
    [
        "host",
        "content-length",
        "content-type",
        "connection",
        "accept-encoding",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "via",
        "proxy-authorization",
        "proxy-connection",
    ]
    .into_iter()
    .collect()
}

fn collect_json_paths(value: &Value, current_path: &str, points: &mut Vec<InjectionPoint>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let path = if current_path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", current_path, key)
                };
                collect_json_paths(val, &path, points);
            }
        }
        Value::Array(arr) => {
            for (index, val) in arr.iter().enumerate() {
                collect_json_paths(val, &format!("{}[{}]", current_path, index), points);
            }
        }
        _ => {
            if !current_path.is_empty() {
                points.push(InjectionPoint::JsonField(current_path.to_string()));
            }
        }
    }
}

/// Every parameter-like location of `req`: query params, non-blacklisted
/// headers, JSON leaves and form fields.
pub fn extract_injection_points(req: &HttpRequest) -> Vec<InjectionPoint> {
    let mut points: Vec<InjectionPoint> = req
        .url
        .query_pairs()
        .map(|(key, _)| InjectionPoint::UrlParam(key.to_string()))
        .collect();

    let blacklist = blacklisted_headers();
    for name in req.headers.keys() {
        if !blacklist.contains(name.as_str()) {
            points.push(InjectionPoint::Header(name.to_string()));
        }
    }

    match req.body_type {
        BodyType::Json => {
            if let Ok(json) = serde_json::from_str::<Value>(&req.body) {
                collect_json_paths(&json, "", &mut points);
            }
        }
        BodyType::FormUrlEncoded => {
            points.extend(
                req.body
                    .split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .filter(|(key, _)| !key.is_empty())
                    .map(|(key, _)| InjectionPoint::FormParam(key.to_string())),
            );
        }
        _ => {}
    }

    points
}

/// Splits "items[0][1]" into ("items", [0, 1]).
fn split_indices(part: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = part.find('[') else {
        return Some((part, Vec::new()));
    };
    let field = &part[..open];
    let mut indices = Vec::new();
    let mut rest = &part[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        indices.push(stripped[..close].parse().ok()?);
        rest = &stripped[close + 1..];
    }
    if rest.is_empty() {
        Some((field, indices))
    } else {
        None
    }
}

fn json_target<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for part in path.split('.') {
        let (field, indices) = split_indices(part)?;
        if !field.is_empty() {
            current = current.get_mut(field)?;
        }
        for index in indices {
            current = current.get_mut(index)?;
        }
    }
    Some(current)
}

/// Keeps the JSON type of the original leaf when the payload fits it.
fn typed_payload(original: &Value, payload: &str) -> Value {
    match original {
        Value::Number(_) => {
            if let Ok(n) = payload.parse::<i64>() {
                return Value::Number(n.into());
            }
            payload
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(payload.to_string()))
        }
        Value::Bool(_) if payload.eq_ignore_ascii_case("true") => Value::Bool(true),
        Value::Bool(_) if payload.eq_ignore_ascii_case("false") => Value::Bool(false),
        _ => Value::String(payload.to_string()),
    }
}

/// Builds a copy of `req` with `payload` placed at `point`. The input is
/// never modified.
pub fn mutate_request(req: &HttpRequest, point: &InjectionPoint, payload: &str) -> Option<HttpRequest> {
    let mut out = req.clone();

    match point {
        InjectionPoint::UrlParam(name) => {
            let pairs: Vec<(String, String)> = out
                .url
                .query_pairs()
                .map(|(k, v)| {
                    let v = if k == name.as_str() { payload.to_string() } else { v.into_owned() };
                    (k.into_owned(), v)
                })
                .collect();
            out.url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        InjectionPoint::Header(name) => {
            let name = HeaderName::try_from(name.as_str()).ok()?;
            let value = HeaderValue::from_str(payload).ok()?;
            out.headers.insert(name, value);
        }
        InjectionPoint::JsonField(path) => {
            let mut json = serde_json::from_str::<Value>(&out.body).ok()?;
            let target = json_target(&mut json, path)?;
            *target = typed_payload(target, payload);
            out.body = serde_json::to_string(&json).ok()?;
        }
        InjectionPoint::FormParam(key) => {
            out.body = out
                .body
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some((k, _)) if k == key.as_str() => {
                        format!("{}={}", k, utf8_percent_encode(payload, FORM_VALUE))
                    }
                    _ => pair.to_string(),
                })
                .collect::<Vec<_>>()
                .join("&");
        }
        InjectionPoint::PathSegment => {
            if payload.trim().is_empty() {
                return None;
            }
            out.url = out.url.join(payload).ok()?;
            out.url.set_fragment(None);
        }
    }

    if !out.body.is_empty() || req.headers.contains_key(CONTENT_LENGTH) {
        if let Ok(value) = HeaderValue::from_str(&out.body.len().to_string()) {
            out.headers.insert(CONTENT_LENGTH, value);
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
    use reqwest::Method;
    use url::Url;

    fn json_request() -> HttpRequest {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("TestAgent/1.0"));
        let url = Url::parse("https://example.com/api?id=123&name=test").unwrap();
        let body = r#"{"user":{"name":"john","age":25},"items":["a","b"],"active":true}"#.to_string();
        HttpRequest::new(Method::POST, url, headers, body)
    }

    fn form_request() -> HttpRequest {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let url = Url::parse("https://example.com/login").unwrap();
        HttpRequest::new(Method::POST, url, headers, "username=admin&password=secret".to_string())
    }

    #[test]
    fn test_extract_points() {
        let points = extract_injection_points(&json_request());
        assert!(points.contains(&InjectionPoint::UrlParam("id".to_string())));
        assert!(points.contains(&InjectionPoint::Header("user-agent".to_string())));
        assert!(!points.contains(&InjectionPoint::Header("content-type".to_string())));
        assert!(points.contains(&InjectionPoint::JsonField("user.age".to_string())));
        assert!(points.contains(&InjectionPoint::JsonField("items[1]".to_string())));

        let points = extract_injection_points(&form_request());
        assert_eq!(
            points,
            vec![
                InjectionPoint::FormParam("username".to_string()),
                InjectionPoint::FormParam("password".to_string()),
            ]
        );
    }

    #[test]
    fn test_mutation_leaves_base_untouched() {
        let base = json_request();
        let before = (base.url.to_string(), base.body.clone());
        let mutated =
            mutate_request(&base, &InjectionPoint::JsonField("user.name".to_string()), "x'").unwrap();
        let json: Value = serde_json::from_str(&mutated.body).unwrap();
        assert_eq!(json["user"]["name"], "x'");
        assert_eq!((base.url.to_string(), base.body), before);
    }

    #[test]
    fn test_json_number_keeps_type_when_possible() {
        let base = json_request();
        let point = InjectionPoint::JsonField("user.age".to_string());
        let numeric = mutate_request(&base, &point, "42").unwrap();
        let json: Value = serde_json::from_str(&numeric.body).unwrap();
        assert_eq!(json["user"]["age"], 42);

        let text = mutate_request(&base, &point, "abc").unwrap();
        let json: Value = serde_json::from_str(&text.body).unwrap();
        assert_eq!(json["user"]["age"], "abc");
    }

    #[test]
    fn test_form_param_is_encoded_and_content_length_updated() {
        let mutated = mutate_request(
            &form_request(),
            &InjectionPoint::FormParam("username".to_string()),
            "a b&c",
        )
        .unwrap();
        assert_eq!(mutated.body, "username=a%20b%26c&password=secret");
        let len: usize = mutated.headers[CONTENT_LENGTH].to_str().unwrap().parse().unwrap();
        assert_eq!(len, mutated.body.len());
    }

    #[test]
    fn test_url_param_mutation() {
        let mutated =
            mutate_request(&json_request(), &InjectionPoint::UrlParam("id".to_string()), "1 OR 1").unwrap();
        let pairs: Vec<(String, String)> = mutated.url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("id".to_string(), "1 OR 1".to_string()));
        assert_eq!(pairs[1], ("name".to_string(), "test".to_string()));
    }

    #[test]
    fn test_path_segment_resolves_against_directory() {
        let base = HttpRequest::get(Url::parse("http://example.com/app/index.php").unwrap());
        let mutated = mutate_request(&base, &InjectionPoint::PathSegment, "admin/").unwrap();
        assert_eq!(mutated.url.as_str(), "http://example.com/app/admin/");
        assert!(mutate_request(&base, &InjectionPoint::PathSegment, "  ").is_none());
    }

    #[test]
    fn test_generate_is_restartable_and_complete() {
        let base = Arc::new(form_request());
        let candidates = vec!["x".to_string(), "y".to_string()];
        let first: Vec<Probe> = MutationFactory::generate(Arc::clone(&base), candidates.clone()).collect();
        let second: Vec<Probe> = MutationFactory::generate(Arc::clone(&base), candidates).collect();
        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        assert_eq!(first[0].value(), "x");
        assert_eq!(first[0].point(), &InjectionPoint::FormParam("username".to_string()));
        assert_eq!(base.body, "username=admin&password=secret");
    }

    #[test]
    fn test_generate_at_skips_unplaceable_values() {
        let base = Arc::new(HttpRequest::get(Url::parse("http://example.com/").unwrap()));
        let probes: Vec<Probe> = MutationFactory::generate_at(
            base,
            InjectionPoint::PathSegment,
            vec!["admin/".to_string(), " ".to_string(), "images/".to_string()],
        )
        .collect();
        let urls: Vec<&str> = probes.iter().map(|p| p.request().url.as_str()).collect();
        assert_eq!(urls, vec!["http://example.com/admin/", "http://example.com/images/"]);
    }
}
