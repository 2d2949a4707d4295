//! Partner API wire types.
//!
//! Field names follow the partner's camelCase JSON contract exactly; amounts
//! travel as `{kind, value}` with `value` a decimal string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{Amount, Currency, MoneyError};

/// `{kind, value}` amount as the partner sends and receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAmount {
    pub kind: String,
    pub value: String,
}

impl From<Amount> for WireAmount {
    fn from(amount: Amount) -> Self {
        Self {
            kind: amount.currency.as_str().to_string(),
            value: amount.to_decimal_string(),
        }
    }
}

impl WireAmount {
    /// Parse into exact minor units. Fails on unknown currency kinds or
    /// imprecise values; the reconciliation loop treats that as a fatal
    /// contract violation, not something to guess around.
    pub fn to_amount(&self) -> Result<Amount, MoneyError> {
        let currency: Currency = self.kind.parse()?;
        Amount::parse(currency, &self.value)
    }
}

/// Body of `POST /partners/userWithdrawal` / `userDirectWithdrawal`.
/// Exactly one of `user` / `address` is present, per the target variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub amount: WireAmount,
    pub idempotency_key: String,
    pub metadata: CallMetadata,
}

/// Metadata the partner echoes back in its event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetadata {
    pub user_id: String,
    pub game_type: String,
    pub platform: String,
    pub time: i64,
}

/// 202 body of an accepted withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedBody {
    pub process_id: String,
}

/// Body of `POST /partners/events`. `version` is the checkpoint cursor as a
/// decimal string; events strictly after it are returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub currency_kind: String,
    pub version: String,
}

/// One entry of the partner's ordered event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerEvent {
    /// "Received" | "Transferred" | future kinds (ignored).
    pub kind: String,
    pub amount: WireAmount,
    pub correlation_id: String,
    pub metadata: EventMetadata,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub user_id: String,
}

pub const EVENT_KIND_RECEIVED: &str = "Received";
pub const EVENT_KIND_TRANSFERRED: &str = "Transferred";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_amount_roundtrip() {
        let wire: WireAmount = Amount::tether(3000).into();
        assert_eq!(wire.kind, "Tether");
        assert_eq!(wire.value, "30.00");
        assert_eq!(wire.to_amount().unwrap(), Amount::tether(3000));
    }

    #[test]
    fn test_wire_amount_rejects_unknown_kind() {
        let wire = WireAmount {
            kind: "Doge".into(),
            value: "1".into(),
        };
        assert!(wire.to_amount().is_err());
    }

    #[test]
    fn test_withdrawal_call_json_shape() {
        let call = WithdrawalCall {
            user: Some("acct-1".into()),
            address: None,
            amount: Amount::tether(3000).into(),
            idempotency_key: "k-1".into(),
            metadata: CallMetadata {
                user_id: "u-1".into(),
                game_type: "janken".into(),
                platform: "ABC Corp. Ltd".into(),
                time: 1_700_000_000_000,
            },
        };

        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["user"], "acct-1");
        assert!(json.get("address").is_none());
        assert_eq!(json["idempotencyKey"], "k-1");
        assert_eq!(json["amount"]["kind"], "Tether");
        assert_eq!(json["metadata"]["userId"], "u-1");
    }

    #[test]
    fn test_event_deserializes_from_partner_json() {
        let raw = r#"{
            "kind": "Received",
            "amount": { "kind": "Tether", "value": "10.00" },
            "correlationId": "corr-7",
            "metadata": { "userId": "u-1" },
            "when": "2024-05-01T12:00:00Z"
        }"#;

        let event: PartnerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind, EVENT_KIND_RECEIVED);
        assert_eq!(event.correlation_id, "corr-7");
        assert_eq!(event.metadata.user_id, "u-1");
        assert_eq!(event.amount.to_amount().unwrap(), Amount::tether(1000));
    }
}
