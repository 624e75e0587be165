use std::str::FromStr;

use alloy_primitives::Address;

use crate::error::ValidationError;
use crate::types::{Network, RequestType, SubscriptionRequest};

/// A request whose fields passed every syntactic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub request_type: RequestType,
    pub network: Network,
    pub contract_address: Address,
    pub event_name: String,
    pub abi_url: String,
    pub webhook_target: String,
    pub channel_context: Option<String>,
}

pub fn validate(req: &SubscriptionRequest) -> Result<ValidatedRequest, ValidationError> {
    let request_type: RequestType = required("type", &req.request_type)?.parse()?;
    let network: Network = required("network", &req.network)?.parse()?;
    let contract_address = parse_address(required("address", &req.contract_address)?)?;
    let event_name = required("event", &req.event_name)?.to_string();

    let (abi_url, webhook_target) = match request_type {
        RequestType::Subscribe => (
            required("abi", &req.abi_url)?.to_string(),
            required("webhook", &req.webhook_target)?.to_string(),
        ),
        RequestType::Unsubscribe => (req.abi_url.trim().to_string(), req.webhook_target.trim().to_string()),
    };

    Ok(ValidatedRequest {
        request_type,
        network,
        contract_address,
        event_name,
        abi_url,
        webhook_target,
        channel_context: req.channel_context.clone().filter(|c| !c.is_empty()),
    })
}

/// Parses a `0x`-prefixed, 40 hex digit address. Checksum casing is not enforced.
pub fn parse_address(raw: &str) -> Result<Address, ValidationError> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ValidationError::InvalidAddress(raw.to_string()))?;

    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidAddress(raw.to_string()));
    }

    Address::from_str(digits).map_err(|_| ValidationError::InvalidAddress(raw.to_string()))
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SubscriptionRequest {
        SubscriptionRequest {
            request_type: "subscribe".to_string(),
            network: "rinkeby".to_string(),
            contract_address: "0x4beb7299221807Cd47C2fa118c597C51Cc2fEC99".to_string(),
            event_name: "Refund".to_string(),
            abi_url: "https://example.org/AdManager.json".to_string(),
            webhook_target: "https://hooks.example.org/T000/B000".to_string(),
            channel_context: Some("C123".to_string()),
        }
    }

    #[test]
    fn test_valid_subscribe_request() {
        let validated = validate(&request()).unwrap();
        assert_eq!(validated.request_type, RequestType::Subscribe);
        assert_eq!(validated.network, Network::Rinkeby);
        assert_eq!(validated.event_name, "Refund");
        assert_eq!(validated.channel_context.as_deref(), Some("C123"));
    }

    #[test]
    fn test_network_is_case_insensitive() {
        let mut req = request();
        req.network = "Mainnet".to_string();
        assert_eq!(validate(&req).unwrap().network, Network::Mainnet);
    }

    #[test]
    fn test_unsupported_network_names_allowed_list() {
        let mut req = request();
        req.network = "unsupported".to_string();
        let err = validate(&req).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { field: "network", .. }));

        let message = err.to_string();
        assert!(message.starts_with("invalid network 'unsupported'"));
        for network in Network::allowed() {
            assert!(message.contains(network), "{message} should list {network}");
        }
    }

    #[test]
    fn test_invalid_request_type() {
        let mut req = request();
        req.request_type = "watch".to_string();
        let err = validate(&req).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid type 'watch', allowed are: subscribe, unsubscribe"
        );
    }

    #[test]
    fn test_missing_fields() {
        let mut req = request();
        req.request_type.clear();
        assert_eq!(validate(&req).unwrap_err(), ValidationError::MissingField("type"));

        let mut req = request();
        req.contract_address = "   ".to_string();
        assert_eq!(validate(&req).unwrap_err(), ValidationError::MissingField("address"));

        let mut req = request();
        req.abi_url.clear();
        assert_eq!(validate(&req).unwrap_err(), ValidationError::MissingField("abi"));
    }

    #[test]
    fn test_unsubscribe_does_not_need_abi_or_webhook() {
        let mut req = request();
        req.request_type = "unsubscribe".to_string();
        req.abi_url.clear();
        req.webhook_target.clear();
        let validated = validate(&req).unwrap();
        assert_eq!(validated.request_type, RequestType::Unsubscribe);
    }

    #[test]
    fn test_invalid_addresses() {
        for raw in [
            "4beb7299221807Cd47C2fa118c597C51Cc2fEC99",
            "0x4beb7299221807Cd47C2fa118c597C51Cc2fEC9",
            "0x4beb7299221807Cd47C2fa118c597C51Cc2fEC999",
            "0xZZeb7299221807Cd47C2fa118c597C51Cc2fEC99",
            "0xABC",
        ] {
            let mut req = request();
            req.contract_address = raw.to_string();
            assert_eq!(
                validate(&req).unwrap_err(),
                ValidationError::InvalidAddress(raw.to_string()),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_address_ignores_checksum_case() {
        let lower = parse_address("0x4beb7299221807cd47c2fa118c597c51cc2fec99").unwrap();
        let mixed = parse_address("0x4beb7299221807Cd47C2fa118c597C51Cc2fEC99").unwrap();
        assert_eq!(lower, mixed);
    }
}
