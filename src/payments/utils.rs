//! Shared adapter plumbing: outbound HTTP with bounded retry, signature
//! primitives, and amount conversion between major and minor units.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use crate::payments::error::{PaymentError, PaymentResult};

/// Request payload for [`ProviderHttpClient::request_raw`].
#[derive(Clone, Copy)]
pub enum RequestBody<'a> {
    Json(&'a serde_json::Value),
    Form(&'a [(String, String)]),
    Empty,
}

/// Reqwest wrapper used by every adapter. Retries 429 and 5xx responses
/// with exponential backoff up to `max_retries`.
#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl ProviderHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Send a request and return `(status, body)` without interpreting the
    /// status. Transport errors and rate limits retry; HTTP error statuses
    /// are the caller's to judge.
    pub async fn request_raw(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &[(&str, String)],
        body: RequestBody<'_>,
    ) -> PaymentResult<(u16, String)> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);
            for (name, value) in headers {
                request = request.header(*name, value.as_str());
            }
            request = match body {
                RequestBody::Json(payload) => request.json(payload),
                RequestBody::Form(fields) => request.form(fields),
                RequestBody::Empty => request,
            };

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < self.max_retries {
                        warn!(
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            "provider returned retryable status, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Ok((status.as_u16(), text));
                }
                Err(e) => {
                    last_error = Some(PaymentError::Network {
                        message: format!("provider request failed: {}", e),
                    });
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::Network {
            message: "provider request failed".to_string(),
        }))
    }

    /// Send a request and decode a JSON body, treating non-2xx as an error.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &[(&str, String)],
        body: RequestBody<'_>,
    ) -> PaymentResult<T> {
        let (status, text) = self.request_raw(method, url, headers, body).await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::Network {
                message: format!("HTTP {}: {}", status, text),
            });
        }
        serde_json::from_str::<T>(&text).map_err(|e| PaymentError::Network {
            message: format!("invalid provider JSON response: {}", e),
        })
    }
}

/// Constant-time byte comparison.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// HMAC-SHA256 over `payload`, hex-encoded.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Parse an RSA private key given as PEM or bare base64 DER (PKCS#8 or
/// PKCS#1). Provider dashboards hand out both shapes.
pub fn parse_rsa_private_key(raw: &str) -> PaymentResult<rsa::RsaPrivateKey> {
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePrivateKey;

    let trimmed = raw.trim();
    if trimmed.contains("BEGIN") {
        rsa::RsaPrivateKey::from_pkcs8_pem(trimmed)
            .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_pem(trimmed))
            .map_err(|e| PaymentError::config(format!("invalid private key: {}", e)))
    } else {
        let compact: String = trimmed.split_whitespace().collect();
        let der = BASE64
            .decode(compact)
            .map_err(|e| PaymentError::config(format!("invalid private key base64: {}", e)))?;
        rsa::RsaPrivateKey::from_pkcs8_der(&der)
            .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_der(&der))
            .map_err(|e| PaymentError::config(format!("invalid private key: {}", e)))
    }
}

/// Parse an RSA public key given as PEM or bare base64 DER (SPKI or
/// PKCS#1).
pub fn parse_rsa_public_key(raw: &str) -> PaymentResult<rsa::RsaPublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;

    let trimmed = raw.trim();
    if trimmed.contains("BEGIN") {
        rsa::RsaPublicKey::from_public_key_pem(trimmed)
            .or_else(|_| rsa::RsaPublicKey::from_pkcs1_pem(trimmed))
            .map_err(|e| PaymentError::config(format!("invalid public key: {}", e)))
    } else {
        let compact: String = trimmed.split_whitespace().collect();
        let der = BASE64
            .decode(compact)
            .map_err(|e| PaymentError::config(format!("invalid public key base64: {}", e)))?;
        rsa::RsaPublicKey::from_public_key_der(&der)
            .or_else(|_| rsa::RsaPublicKey::from_pkcs1_der(&der))
            .map_err(|e| PaymentError::config(format!("invalid public key: {}", e)))
    }
}

/// SHA256-with-RSA signature over `payload`, base64-encoded.
pub fn rsa_sha256_sign_base64(key: &rsa::RsaPrivateKey, payload: &[u8]) -> String {
    use rsa::pkcs1v15::SigningKey;
    use rsa::sha2::Sha256;
    use rsa::signature::{SignatureEncoding, Signer};

    let signing_key = SigningKey::<Sha256>::new(key.clone());
    BASE64.encode(signing_key.sign(payload).to_vec())
}

/// Verify a base64 SHA256-with-RSA signature.
pub fn rsa_sha256_verify_base64(
    key: &rsa::RsaPublicKey,
    payload: &[u8],
    signature_b64: &str,
) -> bool {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::sha2::Sha256;
    use rsa::signature::Verifier;

    let raw = match BASE64.decode(signature_b64.trim()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let signature = match Signature::try_from(raw.as_slice()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(payload, &signature)
        .is_ok()
}

/// Major units (two fraction digits) to provider minor units.
pub fn to_minor_units(amount: Decimal) -> PaymentResult<i64> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| PaymentError::config(format!("amount out of range: {}", amount)))
}

/// Provider minor units back to major units.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_sha256_matches_known_vector() {
        // RFC 4231 test case 2.
        let mac = hmac_sha256_hex("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn minor_unit_conversion_rounds_half_up() {
        assert_eq!(to_minor_units(Decimal::from_str("9.90").unwrap()).unwrap(), 990);
        assert_eq!(to_minor_units(Decimal::from_str("0.01").unwrap()).unwrap(), 1);
        assert_eq!(to_minor_units(Decimal::from_str("1.005").unwrap()).unwrap(), 101);
        assert_eq!(from_minor_units(990), Decimal::from_str("9.90").unwrap());
    }

    #[test]
    fn malformed_keys_are_config_errors() {
        assert!(matches!(
            parse_rsa_private_key("not-a-key"),
            Err(PaymentError::ConfigInvalid { .. })
        ));
        assert!(matches!(
            parse_rsa_public_key("also not a key !!"),
            Err(PaymentError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn bad_signature_fails_verification_without_panicking() {
        // A syntactically valid but unrelated public key.
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let public = rsa::RsaPublicKey::from(&key);
        assert!(!rsa_sha256_verify_base64(&public, b"payload", "!!!not-base64!!!"));
        assert!(!rsa_sha256_verify_base64(&public, b"payload", "QUJDRA=="));
    }

    #[test]
    fn rsa_sign_verify_round_trip() {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let public = rsa::RsaPublicKey::from(&key);
        let sig = rsa_sha256_sign_base64(&key, b"app_id=2021&out_trade_no=M-100");
        assert!(rsa_sha256_verify_base64(
            &public,
            b"app_id=2021&out_trade_no=M-100",
            &sig
        ));
        assert!(!rsa_sha256_verify_base64(&public, b"tampered", &sig));
    }
}
