//! HTTP Basic authentication.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hyper::header::{HeaderValue, AUTHORIZATION};
use hyper::{Body, Request};

use llama_stream_config::AuthConfig;

#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `None` unless both are set, in which case no request can authorize.
    pub fn from_config(auth: &AuthConfig) -> Option<Self> {
        match (&auth.username, &auth.password) {
            (Some(username), Some(password)) => Some(Self::new(username.clone(), password.clone())),
            _ => None,
        }
    }

    pub fn matches(&self, header: Option<&HeaderValue>) -> bool {
        let Some((username, password)) = header.and_then(decode_basic) else {
            return false;
        };
        // Evaluate both so timing does not reveal which one failed.
        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        user_ok & pass_ok
    }

    pub fn authorize(&self, req: &Request<Body>) -> bool {
        self.matches(req.headers().get(AUTHORIZATION))
    }
}

/// Split a `Basic <base64(user:pass)>` header.
fn decode_basic(header: &HeaderValue) -> Option<(String, String)> {
    let value = header.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Header value for the given credentials, as a client would send it.
pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn test_accepts_matching_credentials() {
        let creds = Credentials::new("bot", "s3cret:with-colon");
        assert!(creds.matches(Some(&header(&basic_header("bot", "s3cret:with-colon")))));
    }

    #[test]
    fn test_rejects_wrong_or_missing() {
        let creds = Credentials::new("bot", "secret");
        assert!(!creds.matches(None));
        assert!(!creds.matches(Some(&header(&basic_header("bot", "Secret")))));
        assert!(!creds.matches(Some(&header(&basic_header("admin", "secret")))));
        assert!(!creds.matches(Some(&header("Bearer abc"))));
        assert!(!creds.matches(Some(&header("Basic not-base64!"))));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let creds = Credentials::new("a", "b");
        let value = basic_header("a", "b").replacen("Basic", "basic", 1);
        assert!(creds.matches(Some(&header(&value))));
    }

    #[test]
    fn test_from_config_needs_both() {
        let mut auth = AuthConfig::default();
        assert!(Credentials::from_config(&auth).is_none());
        auth.username = Some("bot".to_string());
        assert!(Credentials::from_config(&auth).is_none());
        auth.password = Some("pw".to_string());
        assert!(Credentials::from_config(&auth).is_some());
    }
}
