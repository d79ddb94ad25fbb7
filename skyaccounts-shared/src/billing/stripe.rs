/// Stripe REST client
///
/// A thin [`BillingProvider`] over the Stripe HTTP API: form-encoded
/// requests, bearer authentication with the secret key, and Stripe's
/// `{"error": {"message": ...}}` bodies turned into
/// [`AccountsError::ExternalServiceFailure`].

use crate::billing::events::{parse_subscription, SubscriptionState};
use crate::billing::ports::{BillingProvider, NewCustomer};
use crate::context::OpContext;
use crate::error::{AccountsError, AccountsResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

/// Production API base URL
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

/// Billing provider client
#[derive(Debug, Clone)]
pub struct StripeClient {
    http: Client,
    api_key: String,
    base_url: Url,
}

impl StripeClient {
    /// Creates a client; `timeout` bounds every request
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl AsRef<str>,
        timeout: Duration,
    ) -> AccountsResult<Self> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| AccountsError::InvalidInput(format!("billing API base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AccountsError::InvalidInput(format!(
                "billing API base URL cannot carry a path: {}",
                base_url
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccountsError::InternalFailure(format!("billing HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url,
        })
    }

    /// Appends `segments` to the base URL, percent-encoding each one
    fn url(&self, segments: &[&str]) -> AccountsResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AccountsError::InternalFailure("billing API base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request and returns the JSON body of a successful response
    async fn send(
        &self,
        context: &'static str,
        request: RequestBuilder,
    ) -> AccountsResult<JsonValue> {
        let failure = |message: String, status: Option<u16>| AccountsError::ExternalServiceFailure {
            context: context.to_string(),
            message,
            status,
        };

        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| failure(e.to_string(), e.status().map(|s| s.as_u16())))?;

        let status = response.status();
        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| failure(format!("unreadable response: {}", e), Some(status.as_u16())))?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("request rejected")
                .to_string();
            warn!(
                context,
                status = status.as_u16(),
                message = %message,
                "Billing provider rejected request"
            );
            return Err(failure(message, Some(status.as_u16())));
        }

        Ok(body)
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_customer(
        &self,
        ctx: &OpContext,
        customer: NewCustomer,
    ) -> AccountsResult<String> {
        let mut form = vec![
            ("description", customer.description),
            ("email", customer.email),
            ("name", customer.name),
        ];
        if let Some(plan) = customer.plan {
            form.push(("plan", plan));
        }

        let request = self.http.post(self.url(&["customers"])?).form(&form);
        let body = ctx
            .run("create billing customer", self.send("create customer", request))
            .await?;

        let id = body["id"]
            .as_str()
            .ok_or_else(|| AccountsError::ExternalServiceFailure {
                context: "create customer".to_string(),
                message: "response carries no customer id".to_string(),
                status: None,
            })?
            .to_string();

        debug!(customer_id = %id, "Created billing customer");
        Ok(id)
    }

    async fn update_customer_plan(
        &self,
        ctx: &OpContext,
        customer_id: &str,
        plan_id: &str,
    ) -> AccountsResult<()> {
        let request = self
            .http
            .post(self.url(&["customers", customer_id])?)
            .form(&[("plan", plan_id)]);
        ctx.run("update billing plan", self.send("update customer plan", request))
            .await?;

        debug!(customer_id, plan_id, "Updated billing plan");
        Ok(())
    }

    async fn fetch_subscription(
        &self,
        ctx: &OpContext,
        subscription_id: &str,
    ) -> AccountsResult<SubscriptionState> {
        let request = self
            .http
            .get(self.url(&["subscriptions", subscription_id])?);
        let body = ctx
            .run("fetch subscription", self.send("fetch subscription", request))
            .await?;

        parse_subscription(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> StripeClient {
        StripeClient::new("sk_test", base_url, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_url_joins_paths() {
        let url = client("http://localhost:12111/v1/").url(&["customers", "cus_1"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:12111/v1/customers/cus_1");

        let url = client("http://localhost:12111").url(&["customers"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:12111/customers");
    }

    #[test]
    fn test_url_escapes_ids() {
        let url = client(DEFAULT_API_BASE)
            .url(&["subscriptions", "sub_1/../customers?limit=1#x"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.stripe.com/v1/subscriptions/sub_1%2F..%2Fcustomers%3Flimit=1%23x"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        for base_url in ["not a url", "mailto:billing@example.com"] {
            let err = StripeClient::new("sk_test", base_url, Duration::from_secs(1)).unwrap_err();
            assert!(matches!(err, AccountsError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_external_failure() {
        let client =
            StripeClient::new("sk_test", "http://127.0.0.1:9/v1", Duration::from_millis(500))
                .unwrap();
        let err = client
            .update_customer_plan(&OpContext::background(), "cus_1", "prod_1")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountsError::ExternalServiceFailure { .. }));
    }
}
