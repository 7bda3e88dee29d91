use crate::http::HttpRequest;
use crate::plugins::{Plugin, RequestMangler};

const SHIFTED_DOTS: &str = ".%0E%0F.";

/// Puts shift-out/shift-in control characters between the dots of `../`
/// segments. They cancel each other on the server but slip past naive `..`
/// filters: `/../` becomes `/.%0E%0F./`.
///
/// Only query values are rewritten: `Url` resolves dot segments of the path
/// on parse, so a `..` never reaches the path here. Values encoded by the
/// mutator carry `%2F` instead of `/`, which counts as a separator too.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShiftOutInBetweenDots;

impl Plugin for ShiftOutInBetweenDots {
    fn name(&self) -> &'static str {
        "shift_out_in_between_dots"
    }

    fn description(&self) -> &'static str {
        "Inserts shift-out and shift-in characters between the dots of ../ segments"
    }
}

impl RequestMangler for ShiftOutInBetweenDots {
    fn mangle(&self, request: &HttpRequest) -> HttpRequest {
        let mut out = request.clone();
        if let Some(query) = out.url.query().map(str::to_string) {
            let shifted = query
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some((key, value)) => format!("{}={}", key, shift_segments(value)),
                    None => pair.to_string(),
                })
                .collect::<Vec<_>>()
                .join("&");
            if shifted != query {
                out.url.set_query(Some(&shifted));
            }
        }
        out
    }

    fn priority(&self) -> u8 {
        20
    }
}

/// Every `..` segment that is followed by a `/` or `%2F`.
fn shift_segments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some((at, len)) = next_separator(rest) {
        let segment = &rest[..at];
        out.push_str(if segment == ".." { SHIFTED_DOTS } else { segment });
        out.push_str(&rest[at..at + len]);
        rest = &rest[at + len..];
    }
    out.push_str(rest);
    out
}

/// Offset and length of the first `/` or percent-encoded slash.
fn next_separator(text: &str) -> Option<(usize, usize)> {
    let slash = text.find('/').map(|at| (at, 1));
    let encoded = text.to_ascii_uppercase().find("%2F").map(|at| (at, 3));
    match (slash, encoded) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mutator::{mutate_request, InjectionPoint};
    use url::Url;

    fn mangle(url: &str) -> String {
        ShiftOutInBetweenDots
            .mangle(&HttpRequest::get(Url::parse(url).unwrap()))
            .url
            .to_string()
    }

    #[test]
    fn test_segments() {
        assert_eq!(shift_segments("/../"), "/.%0E%0F./");
        assert_eq!(shift_segments("/abc/def/.././jkl.htm"), "/abc/def/.%0E%0F././jkl.htm");
        assert_eq!(shift_segments("../../etc/passwd"), ".%0E%0F./.%0E%0F./etc/passwd");
        assert_eq!(shift_segments("/a/.."), "/a/..");
        assert_eq!(shift_segments("/a..b/"), "/a..b/");
        assert_eq!(shift_segments("..%2F..%2fetc"), ".%0E%0F.%2F.%0E%0F.%2fetc");
        assert_eq!(shift_segments("..%2F../x"), ".%0E%0F.%2F.%0E%0F./x");
    }

    #[test]
    fn test_plain_url_untouched() {
        assert_eq!(mangle("http://www.example.com/"), "http://www.example.com/");
    }

    #[test]
    fn test_query_traversal_is_shifted() {
        assert_eq!(
            mangle("http://h/read?file=../../etc/passwd&x=1"),
            "http://h/read?file=.%0E%0F./.%0E%0F./etc/passwd&x=1"
        );
    }

    #[test]
    fn test_mutated_query_value_is_shifted() {
        let base = HttpRequest::get(Url::parse("http://h/read?file=index.html").unwrap());
        let probe = mutate_request(&base, &InjectionPoint::UrlParam("file".to_string()), "../../etc/passwd").unwrap();
        let mangled = ShiftOutInBetweenDots.mangle(&probe);
        let query = mangled.url.query().unwrap();
        assert!(query.starts_with("file=.%0E%0F.%2F.%0E%0F.%2Fetc"), "{}", query);
    }

    #[test]
    fn test_path_is_left_to_url_normalisation() {
        assert_eq!(mangle("http://h/a/../b/"), "http://h/b/");
    }

    #[test]
    fn test_original_request_untouched() {
        let request = HttpRequest::get(Url::parse("http://h/read?file=../x").unwrap());
        let _ = ShiftOutInBetweenDots.mangle(&request);
        assert_eq!(request.url.query(), Some("file=../x"));
    }
}
