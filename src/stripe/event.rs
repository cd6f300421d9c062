use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::ServiceError;

/// Event types the webhook dispatches on. Everything else is
/// acknowledged untouched so unknown types never cause a retry storm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    CheckoutCompleted,
    PaymentIntentSucceeded,
    PaymentIntentFailed,
    Other(String),
}

impl EventType {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "checkout.session.completed" => Self::CheckoutCompleted,
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentIntentFailed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::CheckoutCompleted => "checkout.session.completed",
            Self::PaymentIntentSucceeded => "payment_intent.succeeded",
            Self::PaymentIntentFailed => "payment_intent.payment_failed",
            Self::Other(raw) => raw,
        }
    }
}

/// A verified, decoded payment-provider event.
///
/// `object_id` is the id of `data.object`: the checkout-session id for
/// `checkout.session.completed`, the payment-intent id for the
/// `payment_intent.*` events.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub event_id: Option<String>,
    pub event_type: EventType,
    pub object_id: String,
    pub amount_minor_units: Option<i64>,
    pub metadata: HashMap<String, String>,
}

impl PaymentEvent {
    /// Decodes the raw Stripe envelope. Only called after the signature
    /// over the exact same bytes has been verified.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ServiceError> {
        let json: Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::MalformedPayload(format!("invalid json: {}", e)))?;

        let event_type = json
            .get("type")
            .and_then(Value::as_str)
            .map(EventType::from_wire)
            .ok_or_else(|| ServiceError::MalformedPayload("missing event type".into()))?;

        let object = json
            .get("data")
            .and_then(|d| d.get("object"))
            .ok_or_else(|| ServiceError::MalformedPayload("missing data.object".into()))?;

        let object_id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::MalformedPayload("missing data.object.id".into()))?
            .to_string();

        // Sessions carry `amount_total`, payment intents carry `amount`.
        let amount_minor_units = object
            .get("amount_total")
            .or_else(|| object.get("amount"))
            .and_then(Value::as_i64);

        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            event_id: json
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
            event_type,
            object_id,
            amount_minor_units,
            metadata,
        })
    }
}

/// The resolved purchase context a reconcilable event boils down to,
/// regardless of which event shape delivered it.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    /// Checkout-session id; the key every de-duplication layer uses.
    pub reference: String,
    pub amount_minor_units: i64,
    pub metadata: HashMap<String, String>,
}

impl CheckoutContext {
    /// Total as a decimal in the currency's major unit (cents -> 99.99).
    pub fn total_amount(&self) -> Decimal {
        Decimal::new(self.amount_minor_units, 2)
    }

    /// Buyer id from metadata. The storefront historically sent camelCase,
    /// so both spellings are accepted.
    pub fn user_id(&self) -> Result<&str, ServiceError> {
        self.metadata
            .get("user_id")
            .or_else(|| self.metadata.get("userId"))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ServiceError::MissingUser)
    }

    /// Parses the serialized cart captured at payment time. The string is
    /// untrusted external input; anything that is not a non-empty array of
    /// `{sku, quantity}` objects with positive quantities is rejected.
    pub fn cart(&self) -> Result<Vec<CartLine>, ServiceError> {
        let raw = self
            .metadata
            .get("cart")
            .ok_or_else(|| ServiceError::MalformedPayload("cart metadata missing".into()))?;

        let lines: Vec<CartLine> = serde_json::from_str(raw)
            .map_err(|e| ServiceError::MalformedPayload(format!("cart did not parse: {}", e)))?;

        if lines.is_empty() {
            return Err(ServiceError::MalformedPayload("cart is empty".into()));
        }

        for line in &lines {
            if line.sku.trim().is_empty() {
                return Err(ServiceError::MalformedPayload("cart line with empty sku".into()));
            }
            if line.quantity < 1 {
                return Err(ServiceError::MalformedPayload(format!(
                    "cart line for {} has non-positive quantity",
                    line.sku
                )));
            }
        }

        Ok(lines)
    }
}

/// One `{sku, quantity}` pair from the cart snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CartLine {
    pub sku: String,
    pub quantity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn context_with(metadata: &[(&str, &str)]) -> CheckoutContext {
        CheckoutContext {
            reference: "cs_test".into(),
            amount_minor_units: 9999,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn decodes_checkout_session_completed() {
        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_123",
                "amount_total": 9999,
                "metadata": {
                    "cart": "[{\"sku\":\"NIKE-40-NEUF\",\"quantity\":1}]",
                    "user_id": "u1"
                }
            }}
        });

        let event = PaymentEvent::from_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_type, EventType::CheckoutCompleted);
        assert_eq!(event.object_id, "cs_123");
        assert_eq!(event.amount_minor_units, Some(9999));
        assert_eq!(event.metadata.get("user_id").map(String::as_str), Some("u1"));
    }

    #[test]
    fn unknown_event_type_is_preserved() {
        let payload = serde_json::json!({
            "type": "invoice.paid",
            "data": { "object": { "id": "in_1" } }
        });

        let event = PaymentEvent::from_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_type, EventType::Other("invoice.paid".into()));
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let err = PaymentEvent::from_payload(b"not json").unwrap_err();
        assert!(matches!(err, ServiceError::MalformedPayload(_)));
    }

    #[test]
    fn total_amount_converts_minor_units() {
        let ctx = context_with(&[]);
        assert_eq!(ctx.total_amount(), dec!(99.99));
    }

    #[test]
    fn user_id_accepts_both_spellings() {
        assert_eq!(context_with(&[("user_id", "u1")]).user_id().unwrap(), "u1");
        assert_eq!(context_with(&[("userId", "u2")]).user_id().unwrap(), "u2");
        assert!(matches!(
            context_with(&[]).user_id(),
            Err(ServiceError::MissingUser)
        ));
    }

    #[test]
    fn cart_parses_expected_shape() {
        let ctx = context_with(&[(
            "cart",
            r#"[{"sku":"NIKE-40-NEUF","quantity":1},{"sku":"ADIDAS-42-OCC","quantity":2}]"#,
        )]);
        let cart = ctx.cart().unwrap();
        assert_eq!(cart.len(), 2);
        assert_eq!(cart[0].sku, "NIKE-40-NEUF");
        assert_eq!(cart[1].quantity, 2);
    }

    #[test]
    fn cart_rejects_wrong_shapes() {
        for raw in [
            "not json",
            "{\"sku\":\"X\"}",
            "[]",
            r#"[{"sku":"X","quantity":0}]"#,
            r#"[{"sku":"","quantity":1}]"#,
            r#"[{"sku":"X","quantity":1,"price":10}]"#,
        ] {
            let ctx = context_with(&[("cart", raw)]);
            assert!(
                matches!(ctx.cart(), Err(ServiceError::MalformedPayload(_))),
                "cart {:?} should have been rejected",
                raw
            );
        }
    }

    #[test]
    fn missing_cart_is_malformed() {
        let ctx = context_with(&[("user_id", "u1")]);
        assert!(matches!(ctx.cart(), Err(ServiceError::MalformedPayload(_))));
    }
}
