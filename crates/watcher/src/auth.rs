//! Static Basic-Auth credentials for the session server.
//!
//! Both the event stream and session lookups send the same
//! `Authorization: Basic <base64(username:password)>` header when configured.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, InvalidHeaderValue};

/// Build the `Authorization` header value for a username/password pair.
pub fn basic_auth_header(username: &str, password: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_username_and_password() {
        let value = basic_auth_header("opencode", "hunter2").unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic b3BlbmNvZGU6aHVudGVyMg==");
        assert!(value.is_sensitive());
    }

    #[test]
    fn empty_password_still_has_separator() {
        let value = basic_auth_header("user", "").unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic dXNlcjo=");
    }
}
