use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use sha2::{Digest, Sha256};

/// Mints and verifies time-limited blob read URLs.
///
/// The signature is `hex(sha256(key || 0 || "{namespace}/{name}" || 0 || expires))`
/// where `expires` is a unix timestamp in seconds.
#[derive(Clone)]
pub struct UrlSigner {
    key: Arc<[u8]>,
    public_base: Arc<str>,
}

impl UrlSigner {
    pub fn new(key: impl AsRef<[u8]>, public_base: impl AsRef<str>) -> Self {
        Self {
            key: Arc::from(key.as_ref()),
            public_base: Arc::from(public_base.as_ref().trim_end_matches('/')),
        }
    }

    /// Signer with a random key, valid for the lifetime of the process only.
    pub fn ephemeral(public_base: impl AsRef<str>) -> Self {
        let key: [u8; 32] = rand::random();
        Self::new(key, public_base)
    }

    fn signature(&self, namespace: &str, name: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update([0u8]);
        hasher.update(format!("{namespace}/{name}").as_bytes());
        hasher.update([0u8]);
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Build `{public}/blobs/{namespace}/{name}?expires=..&signature=..`.
    pub fn sign_url(&self, namespace: &str, name: &str, ttl: Duration, now: SystemTime) -> String {
        let expires = unix_secs(now).saturating_add(ttl.as_secs());
        let signature = self.signature(namespace, name, expires);
        format!(
            "{}/blobs/{}/{}?expires={expires}&signature={signature}",
            self.public_base,
            encode_segment(namespace),
            encode_segment(name),
        )
    }

    /// Check a presented signature against the path and expiry.
    pub fn verify(
        &self,
        namespace: &str,
        name: &str,
        expires: u64,
        signature: &str,
        now: SystemTime,
    ) -> bool {
        if expires < unix_secs(now) {
            return false;
        }
        let expected = self.signature(namespace, name, expires);
        expected.len() == signature.len()
            && expected
                .bytes()
                .zip(signature.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Percent-encode everything outside the unreserved URL set.
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_url_verifies_until_expiry() {
        let signer = UrlSigner::new(b"secret", "http://localhost:8080/");
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let url = signer.sign_url("demo", "1_cat.jpg", Duration::from_secs(3600), now);

        assert!(url.starts_with("http://localhost:8080/blobs/demo/1_cat.jpg?expires=4600&signature="));
        let signature = url.rsplit_once("signature=").unwrap().1;

        assert!(signer.verify("demo", "1_cat.jpg", 4600, signature, now));
        assert!(!signer.verify("demo", "1_dog.jpg", 4600, signature, now));
        assert!(!signer.verify("demo", "1_cat.jpg", 4601, signature, now));
        let later = UNIX_EPOCH + Duration::from_secs(4601);
        assert!(!signer.verify("demo", "1_cat.jpg", 4600, signature, later));
    }

    #[test]
    fn signatures_depend_on_the_key() {
        let now = UNIX_EPOCH;
        let a = UrlSigner::new(b"a", "http://x").sign_url("n", "f", Duration::ZERO, now);
        let b = UrlSigner::new(b"b", "http://x").sign_url("n", "f", Duration::ZERO, now);
        assert_ne!(a, b);
    }

    #[test]
    fn names_are_percent_encoded() {
        let signer = UrlSigner::new(b"k", "http://x");
        let url = signer.sign_url("demo", "1_my cat.jpg", Duration::ZERO, UNIX_EPOCH);
        assert!(url.contains("/blobs/demo/1_my%20cat.jpg?"));
    }
}
