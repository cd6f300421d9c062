use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, instrument};

use crate::errors::ServiceError;

/// The slice of a Stripe checkout session the reconciler needs: its id
/// (the transaction reference), the paid total, and the metadata that
/// carries the cart snapshot and user id.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub amount_minor_units: i64,
    pub metadata: HashMap<String, String>,
}

/// Lookup of the checkout session behind a payment intent.
///
/// `payment_intent.succeeded` events reference the intent, but the cart
/// and user metadata live on the session that created it, so the
/// reconciler resolves the session before proceeding. Trait seam so
/// tests can stub the provider.
#[async_trait]
pub trait CheckoutSessionLookup: Send + Sync {
    async fn find_checkout_session(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<CheckoutSession>, ServiceError>;
}

/// Stripe REST client backed by `reqwest`.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self::with_base_url(secret_key, "https://api.stripe.com".to_string())
    }

    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            base_url,
        }
    }
}

#[async_trait]
impl CheckoutSessionLookup for StripeClient {
    #[instrument(skip(self))]
    async fn find_checkout_session(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<CheckoutSession>, ServiceError> {
        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(&[("payment_intent", payment_intent_id), ("limit", "1")])
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Stripe session lookup request failed");
                ServiceError::ExternalServiceError(format!("stripe request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            error!(status = %status, "Stripe session lookup returned an error status");
            return Err(ServiceError::ExternalServiceError(format!(
                "stripe returned {}",
                status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            error!(error = %e, "Stripe session lookup returned unparseable body");
            ServiceError::ExternalServiceError(format!("stripe response invalid: {}", e))
        })?;

        session_from_list(&body)
    }
}

/// Extracts the first checkout session from a Stripe list response.
///
/// A session without an `amount_total` is rejected rather than read as
/// a zero total: persisting a 0.00 order would be worse than failing
/// the lookup.
fn session_from_list(body: &Value) -> Result<Option<CheckoutSession>, ServiceError> {
    let Some(session) = body.get("data").and_then(Value::as_array).and_then(|d| d.first())
    else {
        return Ok(None);
    };

    let id = session
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::ExternalServiceError("stripe session without id".into()))?
        .to_string();

    let amount_minor_units = session
        .get("amount_total")
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "stripe session {} without amount_total",
                id
            ))
        })?;

    let metadata = session
        .get("metadata")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(CheckoutSession {
        id,
        amount_minor_units,
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_session_in_list_is_extracted() {
        let body = json!({ "data": [{
            "id": "cs_123",
            "amount_total": 9999,
            "metadata": { "user_id": "u1" }
        }]});

        let session = session_from_list(&body).unwrap().unwrap();
        assert_eq!(session.id, "cs_123");
        assert_eq!(session.amount_minor_units, 9999);
        assert_eq!(session.metadata.get("user_id").map(String::as_str), Some("u1"));
    }

    #[test]
    fn empty_list_resolves_to_none() {
        let body = json!({ "data": [] });
        assert!(session_from_list(&body).unwrap().is_none());
    }

    #[test]
    fn session_without_amount_total_is_an_error() {
        for object in [
            json!({ "id": "cs_123", "metadata": {} }),
            json!({ "id": "cs_123", "amount_total": null }),
        ] {
            let body = json!({ "data": [object] });
            assert!(matches!(
                session_from_list(&body),
                Err(ServiceError::ExternalServiceError(_))
            ));
        }
    }
}
