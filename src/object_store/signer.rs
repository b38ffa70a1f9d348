use std::time::Duration;

use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use ring::hmac;

/// Everything except the RFC 3986 unreserved set.
const URI_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Signs and verifies the expiring URLs the local backend hands out.
///
/// The URL points back at this service (`/objects/{bucket}/{key}`) and carries the
/// expiry as a unix timestamp plus an HMAC-SHA256 over bucket, key and expiry.
#[derive(Clone)]
pub struct UrlSigner {
    base_url: String,
    key: hmac::Key,
}

impl UrlSigner {
    pub fn new(secret: &str, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    pub fn sign(&self, bucket: &str, key: &str, ttl: Duration) -> String {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        self.sign_until(bucket, key, expires)
    }

    pub fn sign_until(&self, bucket: &str, key: &str, expires: i64) -> String {
        let tag = hmac::sign(&self.key, message(bucket, key, expires).as_bytes());
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref());
        format!(
            "{}/objects/{}/{}?expires={expires}&signature={signature}",
            self.base_url,
            bucket,
            encode_key_path(key)
        )
    }

    /// Check a signature in constant time and reject expired links.
    pub fn verify(&self, bucket: &str, key: &str, expires: i64, signature: &str) -> bool {
        if expires < chrono::Utc::now().timestamp() {
            return false;
        }
        let Ok(tag) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        hmac::verify(&self.key, message(bucket, key, expires).as_bytes(), &tag).is_ok()
    }
}

fn message(bucket: &str, key: &str, expires: i64) -> String {
    format!("{bucket}/{key}\n{expires}")
}

/// Encode an object key segment by segment, keeping `/` separators.
fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_UNRESERVED).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
            .unwrap_or("")
    }

    #[test]
    fn test_signed_url_verifies() {
        let signer = UrlSigner::new("secret", "http://localhost:8080/");
        let url = signer.sign("album-media", "covers/front.jpg", Duration::from_secs(60));

        assert!(url.starts_with("http://localhost:8080/objects/album-media/covers/front.jpg?"));
        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        let signature = query_param(&url, "signature");
        assert!(signer.verify("album-media", "covers/front.jpg", expires, signature));
    }

    #[test]
    fn test_tampered_key_or_expiry_rejected() {
        let signer = UrlSigner::new("secret", "http://localhost:8080");
        let expires = chrono::Utc::now().timestamp() + 60;
        let url = signer.sign_until("album-media", "a.jpg", expires);
        let signature = query_param(&url, "signature");

        assert!(!signer.verify("album-media", "b.jpg", expires, signature));
        assert!(!signer.verify("album-media", "a.jpg", expires + 1, signature));
        assert!(!signer.verify("album-media", "a.jpg", expires, "not-base64!"));
    }

    #[test]
    fn test_expired_url_rejected() {
        let signer = UrlSigner::new("secret", "http://localhost:8080");
        let expires = chrono::Utc::now().timestamp() - 1;
        let url = signer.sign_until("album-media", "a.jpg", expires);
        assert!(!signer.verify("album-media", "a.jpg", expires, query_param(&url, "signature")));
    }

    #[test]
    fn test_key_path_keeps_separators() {
        assert_eq!(encode_key_path("covers/front cover.jpg"), "covers/front%20cover.jpg");
        assert_eq!(encode_key_path("a+b~c.mp3"), "a%2Bb~c.mp3");
    }

    #[test]
    fn test_different_secret_rejected() {
        let signer = UrlSigner::new("secret", "http://localhost:8080");
        let other = UrlSigner::new("other", "http://localhost:8080");
        let expires = chrono::Utc::now().timestamp() + 60;
        let url = signer.sign_until("album-media", "a.jpg", expires);
        assert!(!other.verify("album-media", "a.jpg", expires, query_param(&url, "signature")));
    }
}
