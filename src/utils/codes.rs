// src/utils/codes.rs

use chrono::Utc;
use rand::{Rng, distr::Alphanumeric};
use regex::Regex;
use std::sync::LazyLock;

/// Shape of an issued certificate code: CERT-<14-digit timestamp>-<6 alnum>.
static CERTIFICATE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CERT-\d{14}-[A-Za-z0-9]{6}$").expect("valid regex"));

/// Generates a certificate code.
///
/// Global uniqueness is ultimately guaranteed by the unique column
/// constraint; the timestamp + random suffix makes collisions practically
/// impossible in the first place.
pub fn generate_certificate_code() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("CERT-{}-{}", timestamp, suffix)
}

/// Cheap shape check so the public verify endpoint can reject garbage
/// without a database round trip.
pub fn is_certificate_code(code: &str) -> bool {
    CERTIFICATE_CODE_RE.is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_matches_documented_format() {
        let code = generate_certificate_code();
        assert!(is_certificate_code(&code), "bad code: {}", code);
    }

    #[test]
    fn generated_codes_differ() {
        assert_ne!(generate_certificate_code(), generate_certificate_code());
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(!is_certificate_code(""));
        assert!(!is_certificate_code("CERT-123-ABCDEF"));
        assert!(!is_certificate_code("CERT-20240101120000-AB!DEF"));
        assert!(!is_certificate_code("cert-20240101120000-ABCDEF"));
    }
}
