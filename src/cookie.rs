use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderMap, SET_COOKIE};

/// A cookie parsed from a `Set-Cookie` response header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Absolute expiry from `Expires`, or from `Max-Age` when `Expires` is absent.
    pub expires: Option<SystemTime>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

/// Parses one `Set-Cookie` value. Returns `None` unless it starts with `name=value`.
pub fn parse_set_cookie(header: &str) -> Option<ResponseCookie> {
    let mut attributes = header.split(';').filter(|part| !part.trim().is_empty());
    let (name, value) = attributes.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = ResponseCookie {
        name: name.to_owned(),
        value: value.trim().to_owned(),
        ..ResponseCookie::default()
    };
    let mut max_age = None;

    for attribute in attributes {
        let (key, value) = match attribute.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => cookie.domain = Some(value.trim_start_matches('.').to_owned()),
            "path" => cookie.path = Some(value.to_owned()),
            "expires" => cookie.expires = httpdate::parse_http_date(value).ok(),
            "max-age" => max_age = value.parse::<i64>().ok(),
            "httponly" => cookie.http_only = true,
            "secure" => cookie.secure = true,
            "samesite" => cookie.same_site = Some(value.to_owned()),
            _ => {}
        }
    }

    if cookie.expires.is_none() {
        // A Max-Age past the representable range leaves the expiry unset.
        cookie.expires = max_age.and_then(|seconds| match u64::try_from(seconds) {
            Ok(seconds) => SystemTime::now().checked_add(Duration::from_secs(seconds)),
            Err(_) => Some(SystemTime::UNIX_EPOCH),
        });
    }

    Some(cookie)
}

/// Parses every `Set-Cookie` header, skipping malformed ones.
pub fn parse_set_cookies(headers: &HeaderMap) -> Vec<ResponseCookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}
