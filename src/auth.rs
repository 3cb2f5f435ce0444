use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::error::ExchangeError;
use crate::token_store::Credential;

/// Headers the web app sends on every request
const BASE_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json"),
    ("content-type", "application/json"),
    ("referer", "https://app.opinion.trade/"),
    ("origin", "https://app.opinion.trade"),
    ("x-device-kind", "web"),
];

pub fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in BASE_HEADERS {
        headers.insert(HeaderName::from_static(key), HeaderValue::from_static(value));
    }
    headers
}

/// Base headers plus `Authorization: Bearer <token>`
pub fn bearer_headers(credential: &Credential) -> Result<HeaderMap, ExchangeError> {
    let mut headers = base_headers();
    let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.token))
        .map_err(|_| ExchangeError::Unauthorized("token contains invalid header characters".to_string()))?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
