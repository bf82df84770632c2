//! NATS producer for score responses

use crate::error::{ErrorClass, PipelineError};
use crate::types::decision::ScoreResponse;
use anyhow::Result;
use async_nats::{Client, Subject};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Reply sent when a whole request could not be scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReply {
    pub error_class: ErrorClass,
    pub message: String,
}

impl From<&PipelineError> for FailureReply {
    fn from(e: &PipelineError) -> Self {
        Self {
            error_class: e.class(),
            message: e.to_string(),
        }
    }
}

/// Publishes responses to the request's reply inbox, or to the response subject
#[derive(Clone)]
pub struct ScoreResponsePublisher {
    client: Client,
    subject: String,
}

impl ScoreResponsePublisher {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    fn target(&self, reply: Option<&Subject>) -> Subject {
        reply
            .cloned()
            .unwrap_or_else(|| Subject::from(self.subject.as_str()))
    }

    pub async fn publish(&self, reply: Option<&Subject>, response: &ScoreResponse) -> Result<()> {
        let payload = serde_json::to_vec(response)?;
        self.client.publish(self.target(reply), payload.into()).await?;

        debug!(
            request_id = %response.request_id,
            model_version = %response.model_version,
            rows = response.results.len(),
            rejected = response.rejected.len(),
            "Published score response"
        );
        Ok(())
    }

    pub async fn publish_failure(&self, reply: Option<&Subject>, error: &PipelineError) -> Result<()> {
        let payload = serde_json::to_vec(&FailureReply::from(error))?;
        self.client.publish(self.target(reply), payload.into()).await?;
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reply_shape() {
        let reply = FailureReply::from(&PipelineError::NoActiveModel);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["error_class"], "unavailable");
        assert_eq!(json["message"], "no active model has been hydrated");
    }
}
