//! Dialogflow ES fulfillment envelope.
//!
//! Only the fields the resolver needs are modelled; everything else in the
//! platform's body is ignored. Every field is optional because the platform
//! omits what it did not detect.

use replyflow_core::{Parameters, ResolutionResult, Utterance};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub response_id: Option<String>,
    pub session: Option<String>,
    pub query_result: Option<QueryResult>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query_text: Option<String>,
    pub intent: Option<IntentInfo>,
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntentInfo {
    pub display_name: Option<String>,
}

impl WebhookRequest {
    pub fn to_utterance(&self) -> Utterance {
        let Some(query) = &self.query_result else {
            return Utterance::default();
        };

        let mut utterance = Utterance::new(query.query_text.clone().unwrap_or_default());

        if let Some(intent) = query
            .intent
            .as_ref()
            .and_then(|i| i.display_name.as_deref())
            .filter(|name| !name.trim().is_empty())
        {
            utterance = utterance.with_intent(intent);
        }

        if let Some(params) = &query.parameters {
            let parameters: Parameters = params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            utterance = utterance.with_parameters(parameters);
        }

        utterance
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub fulfillment_text: String,
    pub fulfillment_messages: Vec<FulfillmentMessage>,
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FulfillmentMessage {
    pub text: FulfillmentText,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FulfillmentText {
    pub text: Vec<String>,
}

impl WebhookResponse {
    pub fn from_result(result: &ResolutionResult) -> Self {
        Self {
            fulfillment_text: result.text.clone(),
            fulfillment_messages: vec![FulfillmentMessage {
                text: FulfillmentText {
                    text: vec![result.text.clone()],
                },
            }],
            source: format!("replyflow:{}", result.source.as_str()),
        }
    }
}
