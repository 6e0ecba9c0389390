//! Webhook signature verification.
//!
//! HMAC-SHA256 over `"{timestamp}.{raw_body}"` with constant-time comparison.
//! The replay window is wider for urgent events so a delayed safety-critical
//! delivery is not lost to provider retry latency.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::Timestamp;

use super::WebhookError;

/// Replay and clock-skew limits, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayWindows {
    pub standard_secs: i64,
    pub urgent_secs: i64,
    pub max_clock_skew_secs: i64,
}

impl Default for ReplayWindows {
    fn default() -> Self {
        Self {
            standard_secs: 300,
            urgent_secs: 600,
            max_clock_skew_secs: 60,
        }
    }
}

/// Parsed components from the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when the signature was generated.
    pub timestamp: i64,
    /// Every v1 signature present. More than one appears during secret rotation.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses a signature header.
    ///
    /// Format: `t=<timestamp>,v1=<hex>[,v1=<hex>...]`. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::ParseError` if the header format is invalid.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| WebhookError::ParseError("invalid header format".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        WebhookError::ParseError("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    v1_signatures.push(hex::decode(value).map_err(|_| {
                        WebhookError::ParseError("invalid v1 signature hex".to_string())
                    })?);
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::ParseError("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::ParseError("missing v1 signature".to_string()));
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Which replay window a valid signature fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Within the standard window.
    Fresh,
    /// Only within the extended window; acceptable for urgent events only.
    ExtendedWindowOnly,
}

/// Verifier for provider webhook signatures.
pub struct SignatureValidator {
    secret: Secret<String>,
    windows: ReplayWindows,
}

impl SignatureValidator {
    pub fn new(secret: Secret<String>, windows: ReplayWindows) -> Self {
        Self { secret, windows }
    }

    pub fn windows(&self) -> ReplayWindows {
        self.windows
    }

    /// Returns true if the signature is valid for an event of the given
    /// urgency. Malformed input yields `false`.
    pub fn validate(&self, raw_body: &[u8], signature_header: &str, urgent: bool) -> bool {
        match self.verify(raw_body, signature_header, Timestamp::now()) {
            Ok(SignatureCheck::Fresh) => true,
            Ok(SignatureCheck::ExtendedWindowOnly) => urgent,
            Err(_) => false,
        }
    }

    /// Verifies the signature and reports which window it fits.
    ///
    /// # Errors
    ///
    /// - `ParseError` - header is malformed
    /// - `InvalidTimestamp` - timestamp is beyond allowed clock skew
    /// - `TimestampOutOfRange` - older than even the urgent window
    /// - `InvalidSignature` - no v1 signature matches
    pub fn verify(
        &self,
        raw_body: &[u8],
        signature_header: &str,
        now: Timestamp,
    ) -> Result<SignatureCheck, WebhookError> {
        let header = SignatureHeader::parse(signature_header)?;

        let age = now.as_unix_secs().saturating_sub(header.timestamp);
        if age < -self.windows.max_clock_skew_secs {
            return Err(WebhookError::InvalidTimestamp);
        }
        if age > self.windows.urgent_secs {
            return Err(WebhookError::TimestampOutOfRange);
        }

        let expected = compute_signature(
            self.secret.expose_secret().as_bytes(),
            header.timestamp,
            raw_body,
        );
        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate));
        if !matched {
            return Err(WebhookError::InvalidSignature);
        }

        if age > self.windows.standard_secs {
            Ok(SignatureCheck::ExtendedWindowOnly)
        } else {
            Ok(SignatureCheck::Fresh)
        }
    }
}

fn compute_signature(secret: &[u8], timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Builds a `t=...,v1=...` header for a payload.
///
/// Used by the provider simulator in tests and by operators replaying events.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let signature = compute_signature(secret.as_bytes(), timestamp, payload);
    format!("t={},v1={}", timestamp, hex::encode(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEST_SECRET: &str = "whsec_test_secret_12345";

    fn validator() -> SignatureValidator {
        SignatureValidator::new(
            Secret::new(TEST_SECRET.to_string()),
            ReplayWindows::default(),
        )
    }

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed"}"#;

    // ══════════════════════════════════════════════════════════════
    // Header Parsing Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parse_header_collects_every_v1() {
        let header = SignatureHeader::parse(&format!(
            "t=1234567890,v1={},v1={}",
            "a".repeat(64),
            "b".repeat(64)
        ))
        .unwrap();

        assert_eq!(header.timestamp, 1234567890);
        assert_eq!(header.v1_signatures.len(), 2);
    }

    #[test]
    fn parse_header_ignores_unknown_fields() {
        let header =
            SignatureHeader::parse(&format!("t=1,v1={},v0=legacy,scheme=hmac", "a".repeat(64)))
                .unwrap();
        assert_eq!(header.v1_signatures.len(), 1);
    }

    #[test]
    fn parse_header_rejects_missing_parts() {
        assert!(matches!(
            SignatureHeader::parse(&format!("v1={}", "a".repeat(64))),
            Err(WebhookError::ParseError(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("t=1"),
            Err(WebhookError::ParseError(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("garbage"),
            Err(WebhookError::ParseError(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("t=1,v1=not-hex"),
            Err(WebhookError::ParseError(_))
        ));
    }

    // ══════════════════════════════════════════════════════════════
    // Verification Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn fresh_signature_verifies() {
        let header = sign_payload(TEST_SECRET, NOW - 10, BODY);
        assert_eq!(
            validator().verify(BODY, &header, at(NOW)).unwrap(),
            SignatureCheck::Fresh
        );
    }

    #[test]
    fn signature_between_windows_needs_urgency() {
        let header = sign_payload(TEST_SECRET, NOW - 450, BODY);
        assert_eq!(
            validator().verify(BODY, &header, at(NOW)).unwrap(),
            SignatureCheck::ExtendedWindowOnly
        );
    }

    #[test]
    fn signature_beyond_urgent_window_is_out_of_range() {
        let header = sign_payload(TEST_SECRET, NOW - 601, BODY);
        assert!(matches!(
            validator().verify(BODY, &header, at(NOW)),
            Err(WebhookError::TimestampOutOfRange)
        ));
    }

    #[test]
    fn future_signature_beyond_skew_is_rejected() {
        let header = sign_payload(TEST_SECRET, NOW + 61, BODY);
        assert!(matches!(
            validator().verify(BODY, &header, at(NOW)),
            Err(WebhookError::InvalidTimestamp)
        ));

        let within_skew = sign_payload(TEST_SECRET, NOW + 30, BODY);
        assert!(validator().verify(BODY, &within_skew, at(NOW)).is_ok());
    }

    #[test]
    fn wrong_secret_is_invalid_signature() {
        let header = sign_payload("whsec_other", NOW, BODY);
        assert!(matches!(
            validator().verify(BODY, &header, at(NOW)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let good = sign_payload(TEST_SECRET, NOW, BODY);
        let (_, good_sig) = good.split_once(",v1=").unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "0".repeat(64), good_sig);

        assert!(validator().verify(BODY, &header, at(NOW)).is_ok());
    }

    #[test]
    fn validate_returns_false_for_malformed_input() {
        let v = validator();
        assert!(!v.validate(BODY, "", false));
        assert!(!v.validate(BODY, "t=abc,v1=zz", true));
        assert!(!v.validate(&[0xff, 0xfe], "t=,v1=", true));
    }

    #[test]
    fn validate_uses_current_time() {
        let now = Timestamp::now().as_unix_secs();
        let v = validator();

        assert!(v.validate(BODY, &sign_payload(TEST_SECRET, now - 5, BODY), false));
        let stale = sign_payload(TEST_SECRET, now - 400, BODY);
        assert!(!v.validate(BODY, &stale, false));
        assert!(v.validate(BODY, &stale, true));
    }

    // ══════════════════════════════════════════════════════════════
    // Properties
    // ══════════════════════════════════════════════════════════════

    proptest! {
        #[test]
        fn signed_bodies_verify_within_standard_window(
            body in proptest::collection::vec(any::<u8>(), 0..512),
            age in 0i64..=300,
        ) {
            let header = sign_payload(TEST_SECRET, NOW - age, &body);
            prop_assert_eq!(
                validator().verify(&body, &header, at(NOW)).ok(),
                Some(SignatureCheck::Fresh)
            );
        }

        #[test]
        fn extended_window_accepts_only_urgent(age in 301i64..=600) {
            let header = sign_payload(TEST_SECRET, NOW - age, BODY);
            prop_assert_eq!(
                validator().verify(BODY, &header, at(NOW)).ok(),
                Some(SignatureCheck::ExtendedWindowOnly)
            );
        }

        #[test]
        fn tampered_bodies_never_verify(
            body in proptest::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
        ) {
            let header = sign_payload(TEST_SECRET, NOW, &body);
            let mut tampered = body.clone();
            let i = flip.index(tampered.len());
            tampered[i] ^= 0x01;
            prop_assert!(validator().verify(&tampered, &header, at(NOW)).is_err());
        }

        #[test]
        fn arbitrary_headers_never_panic(header in ".{0,128}") {
            let _ = validator().validate(BODY, &header, true);
        }
    }
}
