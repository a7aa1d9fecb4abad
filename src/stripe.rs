//! Payment provider client: checkout session creation over the provider's
//! REST API and HMAC verification of inbound webhook notifications.

use std::collections::HashMap;

use bigdecimal::rounding::RoundingMode;
use bigdecimal::{BigDecimal, ToPrimitive};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::errors::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Event type signifying a fully captured payment. Everything else is
/// acknowledged without side effects.
pub const CAPTURE_EVENT: &str = "checkout.session.completed";

/// Maximum accepted clock skew between the signed timestamp and now.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const CHECKOUT_SESSIONS_URL: &str = "https://api.stripe.com/v1/checkout/sessions";

/// One cart line as serialized into the checkout session's `metadata[cart]`
/// field and read back by the webhook handler for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: i32,
    pub quantity: i32,
    /// Decimal unit price as a string to avoid floating-point issues, e.g. "12.50"
    pub price: String,
}

/// Display data for one provider line item, with the amount already
/// converted to minor units.
#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub quantity: i32,
    pub unit_amount: i64,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionCreated {
    url: String,
}

// ── Inbound webhook payload ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: CheckoutSessionObject,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Captured total in minor units, as reported by the provider.
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Parse the cart lines embedded in session metadata by
/// [`StripeClient::create_checkout_session`].
pub fn parse_cart_metadata(metadata: &HashMap<String, String>) -> Result<Vec<CartLine>, AppError> {
    let raw = metadata
        .get("cart")
        .ok_or_else(|| AppError::Validation("session metadata has no cart".to_string()))?;
    serde_json::from_str(raw)
        .map_err(|e| AppError::Validation(format!("malformed cart metadata: {e}")))
}

// ── Money conversion ─────────────────────────────────────────────────────────

/// Convert a decimal currency amount to integer minor units (cents),
/// rounding half-up.
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, AppError> {
    (amount * BigDecimal::from(100))
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("amount out of range: {amount}")))
}

/// Convert provider-reported minor units back to a decimal currency amount.
pub fn from_minor_units(amount: i64) -> BigDecimal {
    (BigDecimal::from(amount) / BigDecimal::from(100)).with_scale(2)
}

// ── Client ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    client_url: String,
}

impl StripeClient {
    pub fn new(secret_key: &str, webhook_secret: &str, client_url: &str) -> Self {
        StripeClient {
            http: reqwest::Client::new(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
            client_url: client_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a provider-hosted checkout session and return its redirect URL.
    ///
    /// The minimal cart (product id, quantity, price) travels in
    /// `metadata[cart]` so the webhook can materialize the order without
    /// trusting the live catalog.
    pub async fn create_checkout_session(
        &self,
        customer_email: &str,
        items: &[SessionLineItem],
        cart: &[CartLine],
    ) -> Result<String, AppError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("customer_email".to_string(), customer_email.to_string()),
            (
                "success_url".to_string(),
                format!(
                    "{}/success.html?session_id={{CHECKOUT_SESSION_ID}}",
                    self.client_url
                ),
            ),
            (
                "cancel_url".to_string(),
                format!("{}/cart.html", self.client_url),
            ),
        ];

        for (i, item) in items.iter().enumerate() {
            params.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                "usd".to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            if let Some(description) = &item.description {
                params.push((
                    format!("line_items[{i}][price_data][product_data][description]"),
                    description.clone(),
                ));
            }
            if let Some(image) = &item.image {
                params.push((
                    format!("line_items[{i}][price_data][product_data][images][0]"),
                    image.clone(),
                ));
            }
        }

        let cart_json = serde_json::to_string(cart)
            .map_err(|e| AppError::Validation(format!("cart not serializable: {e}")))?;
        params.push(("metadata[cart]".to_string(), cart_json));

        let response = self
            .http
            .post(CHECKOUT_SESSIONS_URL)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("checkout session request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::warn!("checkout session rejected ({status}): {body}");
            return Err(AppError::ExternalService(format!(
                "checkout session rejected with status {status}"
            )));
        }

        let session: CheckoutSessionCreated = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("malformed session response: {e}")))?;

        Ok(session.url)
    }

    /// Verify the provider signature over the verbatim raw body.
    ///
    /// The header carries `t=<unix seconds>,v1=<hex hmac>`; the signed
    /// payload is `"{t}.{body}"`. The timestamp must be within
    /// [`SIGNATURE_TOLERANCE_SECS`] of the current clock.
    pub fn verify_signature(&self, payload: &[u8], header: &str) -> Result<(), AppError> {
        self.verify_signature_at(payload, header, chrono::Utc::now().timestamp())
    }

    fn verify_signature_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), AppError> {
        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signature = Some(value),
                _ => {}
            }
        }
        let (timestamp, signature) = match (timestamp, signature) {
            (Some(t), Some(s)) => (t, s),
            _ => return Err(AppError::SignatureInvalid),
        };

        let signed_at: i64 = timestamp.parse().map_err(|_| AppError::SignatureInvalid)?;
        if (now - signed_at).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(AppError::SignatureInvalid);
        }

        let expected = hex::decode(signature).map_err(|_| AppError::SignatureInvalid)?;

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::SignatureInvalid)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| AppError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_client(webhook_secret: &str) -> StripeClient {
        StripeClient::new("sk_test_xxx", webhook_secret, "http://127.0.0.1:5500")
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    // ── signature verification ──────────────────────────────────────────────

    #[test]
    fn valid_signature_is_accepted() {
        let client = test_client("whsec_test123");
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(payload, "whsec_test123", 1_700_000_000);
        assert!(client
            .verify_signature_at(payload, &header, 1_700_000_000)
            .is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let client = test_client("whsec_test123");
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(payload, "whsec_other", 1_700_000_000);
        assert!(matches!(
            client.verify_signature_at(payload, &header, 1_700_000_000),
            Err(AppError::SignatureInvalid)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let client = test_client("whsec_test123");
        let header = sign(
            br#"{"type":"checkout.session.completed"}"#,
            "whsec_test123",
            1_700_000_000,
        );
        let tampered = br#"{"type":"checkout.session.completed","amount":1}"#;
        assert!(client
            .verify_signature_at(tampered, &header, 1_700_000_000)
            .is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let client = test_client("whsec_test123");
        let payload = br#"{}"#;
        let header = sign(payload, "whsec_test123", 1_700_000_000);
        // 10 minutes after signing, past the 5-minute tolerance
        assert!(client
            .verify_signature_at(payload, &header, 1_700_000_000 + 600)
            .is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let client = test_client("whsec_test123");
        assert!(client.verify_signature_at(b"{}", "", 0).is_err());
        assert!(client.verify_signature_at(b"{}", "t=123", 123).is_err());
        assert!(client
            .verify_signature_at(b"{}", "v1=deadbeef", 0)
            .is_err());
        assert!(client
            .verify_signature_at(b"{}", "t=abc,v1=deadbeef", 0)
            .is_err());
        assert!(client
            .verify_signature_at(b"{}", "t=123,v1=not-hex", 123)
            .is_err());
    }

    // ── money conversion ────────────────────────────────────────────────────

    #[test]
    fn decimal_prices_convert_to_cents() {
        let price = BigDecimal::from_str("12.50").unwrap();
        assert_eq!(to_minor_units(&price).unwrap(), 1250);

        let price = BigDecimal::from_str("8.00").unwrap();
        assert_eq!(to_minor_units(&price).unwrap(), 800);

        let price = BigDecimal::from_str("8").unwrap();
        assert_eq!(to_minor_units(&price).unwrap(), 800);
    }

    #[test]
    fn fractional_cents_round_half_up() {
        let price = BigDecimal::from_str("1.005").unwrap();
        assert_eq!(to_minor_units(&price).unwrap(), 101);

        let price = BigDecimal::from_str("1.004").unwrap();
        assert_eq!(to_minor_units(&price).unwrap(), 100);
    }

    #[test]
    fn cart_totals_match_in_minor_units() {
        // 2 × 12.50 + 1 × 8.00 = 33.00 → 3300 cents
        let lines = [("12.50", 2), ("8.00", 1)];
        let total: i64 = lines
            .iter()
            .map(|(price, qty)| to_minor_units(&BigDecimal::from_str(price).unwrap()).unwrap() * qty)
            .sum();
        assert_eq!(total, 3300);
        assert_eq!(from_minor_units(total).to_string(), "33.00");
    }

    // ── payload parsing ─────────────────────────────────────────────────────

    #[test]
    fn capture_event_deserializes() {
        let body = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "customer_email": "bonnie@example.com",
                    "amount_total": 3300,
                    "payment_intent": "pi_123",
                    "metadata": {
                        "cart": "[{\"product_id\":7,\"quantity\":2,\"price\":\"12.50\"},{\"product_id\":9,\"quantity\":1,\"price\":\"8.00\"}]"
                    }
                }
            }
        }"#;
        let event: WebhookEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.event_type, CAPTURE_EVENT);

        let session = event.data.object;
        assert_eq!(session.amount_total, Some(3300));

        let cart = parse_cart_metadata(&session.metadata).unwrap();
        assert_eq!(cart.len(), 2);
        assert_eq!(cart[0].product_id, 7);
        assert_eq!(cart[0].quantity, 2);
        assert_eq!(cart[1].price, "8.00");
    }

    #[test]
    fn missing_cart_metadata_is_invalid() {
        let metadata = HashMap::new();
        assert!(matches!(
            parse_cart_metadata(&metadata),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn malformed_cart_metadata_is_invalid() {
        let mut metadata = HashMap::new();
        metadata.insert("cart".to_string(), "not json".to_string());
        assert!(parse_cart_metadata(&metadata).is_err());

        metadata.insert("cart".to_string(), r#"[{"quantity":1}]"#.to_string());
        assert!(parse_cart_metadata(&metadata).is_err());
    }
}
