//! NATS consumer for incoming score requests

use crate::error::{PipelineError, PipelineResult};
use crate::types::decision::ScoreRequest;
use crate::types::transaction::RawTransaction;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for receiving score requests from NATS
pub struct ScoreRequestConsumer {
    client: Client,
    subject: String,
}

impl ScoreRequestConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the request subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to score request subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode a message payload. A bare transaction object is accepted as a single-row request.
pub fn decode_request(payload: &[u8]) -> PipelineResult<ScoreRequest> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| PipelineError::InvalidInput(format!("payload is not JSON: {e}")))?;

    if value.get("transactions").is_some() {
        serde_json::from_value(value)
            .map_err(|e| PipelineError::InvalidInput(format!("malformed score request: {e}")))
    } else {
        let transaction: RawTransaction = serde_json::from_value(value)
            .map_err(|e| PipelineError::InvalidInput(format!("malformed transaction: {e}")))?;
        Ok(ScoreRequest::single(transaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_decode_batch_request() {
        let payload = br#"{
            "transactions": [
                {"transaction_seq": 1, "deposit_amount": 100.0},
                {"transaction_seq": 2, "receiving_country": "VN"}
            ],
            "include_allow_explanations": true,
            "top_k": 5
        }"#;
        let request = decode_request(payload).unwrap();
        assert_eq!(request.transactions.len(), 2);
        assert_eq!(request.include_allow_explanations, Some(true));
        assert_eq!(request.top_k, Some(5));
    }

    #[test]
    fn test_decode_single_transaction() {
        let request = decode_request(br#"{"transaction_seq": 9, "deposit_amount": 5.0}"#).unwrap();
        assert_eq!(request.transactions[0].transaction_seq, 9);
        assert_eq!(request.top_k, None);
    }

    #[test]
    fn test_decode_garbage_is_bad_input() {
        let err = decode_request(b"not json").unwrap_err();
        assert_eq!(err.class(), ErrorClass::BadInput);
        let err = decode_request(br#"{"deposit_amount": 5.0}"#).unwrap_err();
        assert_eq!(err.class(), ErrorClass::BadInput);
    }
}
