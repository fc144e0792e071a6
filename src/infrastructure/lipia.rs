use crate::domain::ports::{PaymentGateway, StkOutcome, StkRequest};
use crate::domain::transaction::CheckoutId;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// `message` value the gateway uses for a synchronously settled push.
const SUCCESS_MESSAGE: &str = "callback received successfully";

#[derive(Serialize)]
struct StkPayload<'a> {
    phone: &'a str,
    amount: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_id: Option<String>,
    // The gateway spells it with a double f.
    #[serde(rename = "refference", alias = "reference", default)]
    reference: Option<String>,
}

impl Envelope {
    fn into_outcome(self) -> Result<StkOutcome> {
        let success = self.message.as_deref() == Some(SUCCESS_MESSAGE);
        match (success, self.data) {
            (true, Some(data)) => Ok(StkOutcome::Completed {
                checkout_id: data.checkout_id.map(CheckoutId::new),
                reference: data.reference,
            }),
            (_, Some(EnvelopeData {
                checkout_id: Some(id),
                ..
            })) => Ok(StkOutcome::Deferred {
                checkout_id: CheckoutId::new(id),
            }),
            (_, _) => Err(PaymentError::Gateway(format!(
                "unexpected STK response: message={:?}",
                self.message
            ))),
        }
    }
}

/// HTTP client for the Lipia STK push API.
#[derive(Clone)]
pub struct LipiaGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LipiaGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("Failed to create HTTP client: {}", e)))?;
        info!(base_url, "Gateway client ready");
        Ok(Self {
            client,
            endpoint: format!("{}/request/stk", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for LipiaGateway {
    async fn request_stk(&self, request: &StkRequest) -> Result<StkOutcome> {
        let payload = StkPayload {
            phone: &request.phone,
            amount: &request.amount,
            callback_url: &request.callback_url,
        };
        debug!(phone = %request.phone, amount = %request.amount, "Sending STK push");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PaymentError::Gateway(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::Gateway(format!("gateway answered {}", status)));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| PaymentError::Gateway(format!("Failed to parse response: {}", e)))?;
        envelope.into_outcome()
    }
}
