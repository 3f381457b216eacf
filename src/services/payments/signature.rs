//! HMAC-SHA256 request signing.
//!
//! The gateway verifies a signature over a fixed, alphabetically ordered
//! `key=value` concatenation of the request fields. Values are used
//! verbatim: no escaping, no trimming.

use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Fields covered by the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureFields<'a> {
    pub access_key: &'a str,
    pub amount: u64,
    pub extra_data: &'a str,
    pub ipn_url: &'a str,
    pub order_id: &'a str,
    pub order_info: &'a str,
    pub partner_code: &'a str,
    pub redirect_url: &'a str,
    pub request_id: &'a str,
    pub request_type: &'a str,
}

/// The exact string that gets signed.
pub fn raw_signature(fields: &SignatureFields<'_>) -> String {
    format!(
        "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
        fields.access_key,
        fields.amount,
        fields.extra_data,
        fields.ipn_url,
        fields.order_id,
        fields.order_info,
        fields.partner_code,
        fields.redirect_url,
        fields.request_id,
        fields.request_type,
    )
}

fn mac_for(fields: &SignatureFields<'_>, secret: &str) -> Result<HmacSha256, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("Invalid signing key: {}", e)))?;
    mac.update(raw_signature(fields).as_bytes());
    Ok(mac)
}

/// Lowercase hex HMAC-SHA256 of [`raw_signature`] under `secret`.
pub fn sign(fields: &SignatureFields<'_>, secret: &str) -> Result<String, ServiceError> {
    let mac = mac_for(fields, secret)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature. Malformed hex never verifies.
pub fn verify(fields: &SignatureFields<'_>, secret: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    match mac_for(fields, secret) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> SignatureFields<'static> {
        SignatureFields {
            access_key: "F8BBA842ECF85",
            amount: 50_000,
            extra_data: "",
            ipn_url: "https://shop.example.com/ipn",
            order_id: "ORDER-1001",
            order_info: "pay with wallet",
            partner_code: "MOMO",
            redirect_url: "https://shop.example.com/return",
            request_id: "1a2b3c",
            request_type: "captureWallet",
        }
    }

    const SECRET: &str = "K951B6PE1waDMi640xX08PD3vg6EkVlz";

    #[test]
    fn raw_signature_uses_fixed_field_order() {
        assert_eq!(
            raw_signature(&fields()),
            "accessKey=F8BBA842ECF85&amount=50000&extraData=&ipnUrl=https://shop.example.com/ipn\
             &orderId=ORDER-1001&orderInfo=pay with wallet&partnerCode=MOMO\
             &redirectUrl=https://shop.example.com/return&requestId=1a2b3c&requestType=captureWallet"
        );
    }

    #[test]
    fn signing_is_deterministic() {
        let first = sign(&fields(), SECRET).unwrap();
        let second = sign(&fields(), SECRET).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn matches_independent_hmac() {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(raw_signature(&fields()).as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(sign(&fields(), SECRET).unwrap(), expected);
    }

    #[test]
    fn any_field_change_changes_signature() {
        let base = sign(&fields(), SECRET).unwrap();

        let amount = SignatureFields {
            amount: 50_001,
            ..fields()
        };
        assert_ne!(sign(&amount, SECRET).unwrap(), base);

        let whitespace = SignatureFields {
            order_info: "pay with wallet ",
            ..fields()
        };
        assert_ne!(sign(&whitespace, SECRET).unwrap(), base);

        assert_ne!(sign(&fields(), "another-secret").unwrap(), base);
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let signature = sign(&fields(), SECRET).unwrap();
        assert!(verify(&fields(), SECRET, &signature));
        assert!(verify(&fields(), SECRET, &signature.to_uppercase()));

        let tampered = SignatureFields {
            amount: 1,
            ..fields()
        };
        assert!(!verify(&tampered, SECRET, &signature));
        assert!(!verify(&fields(), "wrong", &signature));
    }

    #[test]
    fn malformed_signature_does_not_verify() {
        assert!(!verify(&fields(), SECRET, "not-hex"));
        assert!(!verify(&fields(), SECRET, ""));
        assert!(!verify(&fields(), SECRET, "abcd"));
    }
}
