//! Slack slash-command intake: parsing, request signing and reply payloads.
//!
//! Usage: `/notisce subscribe <network> <address> <event> <abi url>`
//! or `/notisce unsubscribe <network> <address> <event>`.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::service::SubscriptionOutcome;
use crate::types::SubscriptionRequest;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
/// Requests older (or newer) than this are rejected as replays.
pub const MAX_REQUEST_AGE_SECS: i64 = 60 * 5;

const USAGE_EXAMPLE: &str = "usage example: `/notisce subscribe rinkeby 0x4beb7299221807Cd47C2fa118c597C51Cc2fEC99 Refund https://raw.githubusercontent.com/bridges-inc/kaleido-core/develop/deployments/rinkeby/AdManager.json`";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("invalid request timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("request timestamp is outside the accepted window")]
    Expired,
    #[error("request signature does not match")]
    Mismatch,
}

/// Fields of a slash command payload that the intake uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlashCommand {
    pub command: String,
    pub text: String,
    pub response_url: String,
    pub channel_id: String,
    pub user_id: String,
}

impl SlashCommand {
    /// Parses an `application/x-www-form-urlencoded` slash command body.
    pub fn parse(body: &str) -> Self {
        let mut cmd = SlashCommand::default();
        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "command" => cmd.command = value,
                "text" => cmd.text = value,
                "response_url" => cmd.response_url = value,
                "channel_id" => cmd.channel_id = value,
                "user_id" => cmd.user_id = value,
                _ => {}
            }
        }
        cmd
    }

    /// Maps positional arguments `type network address event abi_url` onto a request.
    /// Missing trailing arguments stay empty and are reported by validation.
    pub fn to_request(&self) -> SubscriptionRequest {
        let mut options = self.text.split_whitespace().map(str::to_string);
        SubscriptionRequest {
            request_type: options.next().unwrap_or_default(),
            network: options.next().unwrap_or_default(),
            contract_address: options.next().unwrap_or_default(),
            event_name: options.next().unwrap_or_default(),
            abi_url: options.next().unwrap_or_default(),
            webhook_target: self.response_url.clone(),
            channel_context: Some(self.channel_id.clone()).filter(|c| !c.is_empty()),
        }
    }
}

/// Verifies a request signed with Slack's v0 scheme:
/// `v0=hex(HMAC-SHA256(secret, "v0:{timestamp}:{body}"))`.
pub fn verify_signature(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &str,
    now_secs: i64,
) -> Result<(), SignatureError> {
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
    let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_string()))?;
    if now_secs.abs_diff(ts) > MAX_REQUEST_AGE_SECS.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let provided = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(SignatureError::Mismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(format!("v0:{}:", ts).as_bytes());
    mac.update(body.as_bytes());
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

/// Computes the v0 signature header value for `body`.
pub fn sign(secret: &str, timestamp: i64, body: &str) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body.as_bytes());
    Ok(format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    #[serde(default)]
    pub short: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub response_type: String,
    pub attachments: Vec<Attachment>,
}

impl CommandReply {
    pub fn success(outcome: &SubscriptionOutcome) -> Self {
        let attachment = match outcome {
            SubscriptionOutcome::Subscribed(record) => Attachment {
                title: Some("Subscription started.".to_string()),
                fields: vec![
                    field("Address", record.contract_address.to_checksum(None)),
                    field("Network", record.network.to_string()),
                    field("Event", record.event_name.clone()),
                    field("Abi", record.abi_url.clone()),
                ],
                ..Default::default()
            },
            SubscriptionOutcome::Unsubscribed { key, existed } => Attachment {
                title: Some(if *existed {
                    "Subscription stopped.".to_string()
                } else {
                    "No such subscription.".to_string()
                }),
                fields: vec![
                    field("Address", key.contract_address.to_checksum(None)),
                    field("Event", key.event_name.clone()),
                ],
                ..Default::default()
            },
        };

        CommandReply {
            response_type: "in_channel".to_string(),
            attachments: vec![attachment],
        }
    }

    pub fn error(err: &dyn std::fmt::Display) -> Self {
        CommandReply {
            response_type: "ephemeral".to_string(),
            attachments: vec![Attachment {
                title: Some("Invalid Command! :crying_cat_face: ".to_string()),
                pretext: Some(USAGE_EXAMPLE.to_string()),
                text: Some(err.to_string()),
                ..Default::default()
            }],
        }
    }
}

fn field(title: &str, value: String) -> AttachmentField {
    AttachmentField {
        title: title.to_string(),
        value,
        short: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::types::Network;

    const BODY: &str = "token=x&team_id=T1&channel_id=C2147483705&user_id=U2147483697&command=%2Fnotisce\
&text=subscribe+rinkeby+0x4beb7299221807Cd47C2fa118c597C51Cc2fEC99+Refund+https%3A%2F%2Fexample.org%2FAdManager.json\
&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2F1234%2F5678";

    #[test]
    fn test_parse_slash_command() {
        let cmd = SlashCommand::parse(BODY);
        assert_eq!(cmd.command, "/notisce");
        assert_eq!(cmd.channel_id, "C2147483705");
        assert_eq!(cmd.response_url, "https://hooks.slack.com/commands/1234/5678");

        let req = cmd.to_request();
        assert_eq!(req.request_type, "subscribe");
        assert_eq!(req.network, "rinkeby");
        assert_eq!(req.contract_address, "0x4beb7299221807Cd47C2fa118c597C51Cc2fEC99");
        assert_eq!(req.event_name, "Refund");
        assert_eq!(req.abi_url, "https://example.org/AdManager.json");
        assert_eq!(req.webhook_target, "https://hooks.slack.com/commands/1234/5678");
        assert_eq!(req.channel_context.as_deref(), Some("C2147483705"));
    }

    #[test]
    fn test_partial_text_leaves_fields_empty() {
        let cmd = SlashCommand {
            text: "subscribe  mainnet".to_string(),
            ..Default::default()
        };
        let req = cmd.to_request();
        assert_eq!(req.network, "mainnet");
        assert!(req.contract_address.is_empty());
        assert!(req.abi_url.is_empty());
        assert!(req.channel_context.is_none());
    }

    #[test]
    fn test_signature_round_trip() {
        let now = 1_700_000_000;
        let signature = sign("8f742231b10e8888abcd99yyyzzz85a5", now, BODY).unwrap();
        assert!(signature.starts_with("v0="));
        assert_eq!(
            verify_signature("8f742231b10e8888abcd99yyyzzz85a5", Some(&now.to_string()), Some(&signature), BODY, now + 10),
            Ok(())
        );
    }

    #[test]
    fn test_signature_rejections() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let signature = sign("secret", now, BODY).unwrap();

        assert_eq!(
            verify_signature("other", Some(&ts), Some(&signature), BODY, now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature("secret", Some(&ts), Some(&signature), "tampered", now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature("secret", Some(&ts), Some(&signature), BODY, now + MAX_REQUEST_AGE_SECS + 1),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_signature("secret", None, Some(&signature), BODY, now),
            Err(SignatureError::MissingHeader(TIMESTAMP_HEADER))
        );
        assert_eq!(
            verify_signature("secret", Some("soon"), Some(&signature), BODY, now),
            Err(SignatureError::InvalidTimestamp("soon".to_string()))
        );
        assert_eq!(
            verify_signature("secret", Some(&ts), Some("v1=abcd"), BODY, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_expired() {
        let now = 1_700_000_000;
        for ts in [i64::MIN, i64::MAX] {
            assert_eq!(
                verify_signature("s", Some(&ts.to_string()), Some("v0=00"), "body", now),
                Err(SignatureError::Expired)
            );
        }
        assert_eq!(
            verify_signature("s", Some("-9223372036854775808"), Some("v0=00"), "body", i64::MAX),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_error_reply_names_allowed_networks() {
        let err = ValidationError::invalid_value("network", "unsupported", &Network::allowed());
        let reply = CommandReply::error(&err);
        assert_eq!(reply.response_type, "ephemeral");

        let text = reply.attachments[0].text.clone().unwrap();
        assert!(text.contains("invalid network 'unsupported'"));
        assert!(text.contains("mainnet, ropsten, rinkeby"));
        assert!(reply.attachments[0].pretext.as_deref().unwrap().starts_with("usage example"));
    }
}
