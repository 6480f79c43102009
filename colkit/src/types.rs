use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Attribute map of a record, ordered by attribute name.
pub type Attributes = BTreeMap<String, ColumnValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Text(String),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Timestamp(i64),
    List(Vec<ColumnValue>),
    Map(BTreeMap<String, ColumnValue>),
    Null,
}

impl ColumnValue {
    /// `Null` is the only empty value; an empty string is still a value.
    pub fn is_empty(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Render the value as a partition key, if the type can be one.
    pub fn as_key(&self) -> Option<String> {
        match self {
            ColumnValue::Text(s) => Some(s.clone()),
            ColumnValue::Int(i) => Some(i.to_string()),
            ColumnValue::BigInt(i) | ColumnValue::Timestamp(i) => Some(i.to_string()),
            ColumnValue::Uuid(u) => Some(u.to_string()),
            _ => None,
        }
    }

    /// False when the value holds a NaN or infinite float, at any depth.
    /// Such values cannot be stored: they never compare equal and JSON has
    /// no encoding for them.
    pub fn is_finite(&self) -> bool {
        match self {
            ColumnValue::Float(f) => f.is_finite(),
            ColumnValue::Double(f) => f.is_finite(),
            ColumnValue::List(items) => items.iter().all(ColumnValue::is_finite),
            ColumnValue::Map(fields) => fields.values().all(ColumnValue::is_finite),
            _ => true,
        }
    }

    /// Wire encoding of a column value.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<&str> for ColumnValue {
    fn from(s: &str) -> Self {
        ColumnValue::Text(s.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(s: String) -> Self {
        ColumnValue::Text(s)
    }
}

impl From<i32> for ColumnValue {
    fn from(i: i32) -> Self {
        ColumnValue::Int(i)
    }
}

impl From<i64> for ColumnValue {
    fn from(i: i64) -> Self {
        ColumnValue::BigInt(i)
    }
}

impl From<f64> for ColumnValue {
    fn from(f: f64) -> Self {
        ColumnValue::Double(f)
    }
}

impl From<bool> for ColumnValue {
    fn from(b: bool) -> Self {
        ColumnValue::Boolean(b)
    }
}

impl From<Uuid> for ColumnValue {
    fn from(u: Uuid) -> Self {
        ColumnValue::Uuid(u)
    }
}

impl From<serde_json::Value> for ColumnValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ColumnValue::Null,
            serde_json::Value::Bool(b) => ColumnValue::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ColumnValue::BigInt(i)
                } else {
                    n.as_f64().map(ColumnValue::Double).unwrap_or(ColumnValue::Null)
                }
            }
            serde_json::Value::String(s) => ColumnValue::Text(s),
            serde_json::Value::Array(items) => {
                ColumnValue::List(items.into_iter().map(ColumnValue::from).collect())
            }
            serde_json::Value::Object(fields) => ColumnValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, ColumnValue::from(v)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Any,
    #[default]
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl From<ConsistencyLevel> for scylla::statement::Consistency {
    fn from(level: ConsistencyLevel) -> Self {
        use scylla::statement::Consistency;

        match level {
            ConsistencyLevel::Any => Consistency::Any,
            ConsistencyLevel::One => Consistency::One,
            ConsistencyLevel::Two => Consistency::Two,
            ConsistencyLevel::Three => Consistency::Three,
            ConsistencyLevel::Quorum => Consistency::Quorum,
            ConsistencyLevel::All => Consistency::All,
            ConsistencyLevel::LocalQuorum => Consistency::LocalQuorum,
            ConsistencyLevel::EachQuorum => Consistency::EachQuorum,
            ConsistencyLevel::LocalOne => Consistency::LocalOne,
        }
    }
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rendering() {
        assert_eq!(ColumnValue::from("user-1").as_key().as_deref(), Some("user-1"));
        assert_eq!(ColumnValue::BigInt(42).as_key().as_deref(), Some("42"));
        assert_eq!(ColumnValue::Null.as_key(), None);
        assert_eq!(ColumnValue::Blob(vec![1, 2]).as_key(), None);
    }

    #[test]
    fn test_json_conversion() {
        let value = ColumnValue::from(serde_json::json!({"tags": ["a", "b"], "age": 30}));
        let ColumnValue::Map(fields) = value else {
            panic!("expected map");
        };
        assert_eq!(fields["age"], ColumnValue::BigInt(30));
        assert_eq!(
            fields["tags"],
            ColumnValue::List(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_non_finite_floats() {
        assert!(ColumnValue::Double(1.5).is_finite());
        assert!(!ColumnValue::Double(f64::NAN).is_finite());
        assert!(!ColumnValue::Float(f32::INFINITY).is_finite());
        assert!(!ColumnValue::List(vec![ColumnValue::Double(f64::NEG_INFINITY)]).is_finite());
        assert!(ColumnValue::from("nan").is_finite());
    }

    #[test]
    fn test_consistency_from_config_name() {
        let level: ConsistencyLevel = serde_json::from_str("\"local_quorum\"").unwrap();
        assert_eq!(level, ConsistencyLevel::LocalQuorum);
        assert_eq!(level.to_string(), "LOCAL_QUORUM");
    }
}
