use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::event_decoder::format_value;
use crate::types::{DecodedEvent, SubscriptionRecord};

/// Delivers decoded events to the subscription's webhook target.
/// Called concurrently by every stream worker.
#[async_trait]
pub trait EventSender: Send + Sync {
    async fn send(&self, event: &DecodedEvent, record: &SubscriptionRecord) -> anyhow::Result<()>;
}

/// Posts a Slack-compatible JSON message to `record.webhook_target`.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventSender for WebhookSender {
    async fn send(&self, event: &DecodedEvent, record: &SubscriptionRecord) -> anyhow::Result<()> {
        let message = notification_message(event, record);
        self.client
            .post(&record.webhook_target)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;

        debug!("Delivered {} notification for {}", event.event_name, record.key());
        Ok(())
    }
}

/// Builds the webhook payload: a chat attachment for humans plus the raw decoded event.
pub fn notification_message(event: &DecodedEvent, record: &SubscriptionRecord) -> Value {
    let mut fields = vec![
        json!({ "title": "Address", "value": event.contract_address.to_checksum(None), "short": false }),
        json!({ "title": "Network", "value": record.network.as_str(), "short": true }),
        json!({
            "title": "Block",
            "value": event.block_number.map(|n| n.to_string()).unwrap_or_else(|| "pending".to_string()),
            "short": true
        }),
    ];
    if let Some(tx_hash) = event.transaction_hash {
        fields.push(json!({ "title": "Transaction", "value": format!("{:#x}", tx_hash), "short": false }));
    }
    for (name, value) in &event.parameters {
        fields.push(json!({ "title": name, "value": format_value(value), "short": true }));
    }

    let mut message = json!({
        "response_type": "in_channel",
        "text": format!("{} emitted on {}", event.event_name, record.network),
        "attachments": [{
            "title": format!("{} event", event.event_name),
            "fields": fields,
        }],
        "event": event.to_json(),
    });

    if let Some(channel) = &record.channel_context {
        message["channel"] = Value::String(channel.clone());
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{event_signature, parse_abi};
    use crate::types::Network;
    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Address, B256, U256};
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn test_notification_message_layout() {
        let abi = parse_abi(br#"[{"type":"event","name":"Transfer","inputs":[{"name":"amount","type":"uint256","indexed":false}]}]"#)
            .unwrap();
        let record = SubscriptionRecord {
            contract_address: Address::repeat_byte(0xab),
            event_name: "Transfer".to_string(),
            event_signature: event_signature(&abi, "Transfer").unwrap(),
            network: Network::Goerli,
            contract_interface: abi,
            abi_url: "https://example.org/abi.json".to_string(),
            webhook_target: "https://hooks.example.org/x".to_string(),
            created_at: Utc::now(),
            channel_context: Some("C42".to_string()),
        };
        let event = DecodedEvent {
            block_number: Some(7),
            transaction_hash: Some(B256::repeat_byte(0x01)),
            log_index: Some(0),
            contract_address: record.contract_address,
            event_name: "Transfer".to_string(),
            parameters: BTreeMap::from([("amount".to_string(), DynSolValue::Uint(U256::from(100u64), 256))]),
        };

        let message = notification_message(&event, &record);
        assert_eq!(message["text"], "Transfer emitted on goerli");
        assert_eq!(message["channel"], "C42");
        assert_eq!(message["event"]["parameters"]["amount"], "100");
        assert_eq!(message["event"]["block_number"], 7);

        let fields = message["attachments"][0]["fields"].as_array().unwrap();
        assert!(fields.iter().any(|f| f["title"] == "amount" && f["value"] == "100"));
        assert!(fields.iter().any(|f| f["title"] == "Transaction"));
    }
}
