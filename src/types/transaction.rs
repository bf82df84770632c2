//! Raw transaction records as they arrive from extraction or callers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A raw transaction row: an external identifier plus named, loosely typed fields
/// (amounts, country/category codes, dates, rolling counters, identity names).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// External transaction identifier
    #[serde(alias = "id")]
    pub transaction_seq: i64,

    /// All other fields, keyed by column name
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl RawTransaction {
    /// Create an empty transaction with only an identifier
    pub fn new(transaction_seq: i64) -> Self {
        Self {
            transaction_seq,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Look up a field, treating JSON null as absent
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Field as a string slice, if it is textual
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

/// A raw transaction paired with its fraud label, as stored in holdout sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledTransaction {
    pub is_fraud: bool,

    #[serde(flatten)]
    pub transaction: RawTransaction,
}

impl LabeledTransaction {
    pub fn new(transaction: RawTransaction, is_fraud: bool) -> Self {
        Self {
            is_fraud,
            transaction,
        }
    }

    /// Label as 0/1
    pub fn label(&self) -> u8 {
        u8::from(self.is_fraud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_deserialization() {
        let json = r#"{
            "transaction_seq": 42,
            "deposit_amount": 1500000.0,
            "receiving_country": "VN",
            "country_code": null
        }"#;

        let tx: RawTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.transaction_seq, 42);
        assert_eq!(tx.get_str("receiving_country"), Some("VN"));
        assert!(tx.get("country_code").is_none());
        assert!(tx.fields.contains_key("country_code"));
    }

    #[test]
    fn test_labeled_transaction_flattening() {
        let json = r#"{"transaction_seq": 7, "is_fraud": true, "create_dt": "2024-03-01 10:00:00"}"#;
        let row: LabeledTransaction = serde_json::from_str(json).unwrap();

        assert_eq!(row.label(), 1);
        assert_eq!(row.transaction.transaction_seq, 7);
        assert_eq!(
            row.transaction.get_str("create_dt"),
            Some("2024-03-01 10:00:00")
        );
        assert!(!row.transaction.fields.contains_key("is_fraud"));
    }
}
