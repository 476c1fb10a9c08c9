use std::collections::BTreeMap;

use provenant_core::{AuditError, AuditResult};
use serde_json::Value;

/// Serializes a scalar property map into canonical JSON.
///
/// Keys come out in lexical order, so equal inputs always produce
/// byte-identical strings and stored audit rows can be compared as plain
/// text. A composite value reaching this point means scope filtering was
/// bypassed, which is a contract violation rather than a recoverable
/// condition.
pub fn serialize_scalar_map(values: &BTreeMap<String, Value>) -> AuditResult<String> {
    for (name, value) in values {
        if value.is_object() || value.is_array() {
            return Err(AuditError::Contract(format!(
                "property '{name}' holds a composite value and cannot be audited"
            )));
        }
    }

    serde_json::to_string(values).map_err(|error| {
        AuditError::Internal(format!("failed to serialize audit properties: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::{Value, json};

    use super::serialize_scalar_map;

    #[test]
    fn keys_come_out_in_lexical_order() {
        let mut values = BTreeMap::new();
        values.insert("update_time".to_owned(), json!(null));
        values.insert("name".to_owned(), json!("test"));
        let serialized = serialize_scalar_map(&values);
        assert_eq!(
            serialized.ok().as_deref(),
            Some(r#"{"name":"test","update_time":null}"#)
        );
    }

    #[test]
    fn composite_values_are_contract_violations() {
        let values = BTreeMap::from([("child".to_owned(), json!({ "id": 1 }))]);
        assert!(serialize_scalar_map(&values).is_err());

        let values = BTreeMap::from([("children".to_owned(), json!([1, 2]))]);
        assert!(serialize_scalar_map(&values).is_err());
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            (-1.0e9f64..1.0e9).prop_map(Value::from),
            "[a-z0-9 ]{0,24}".prop_map(Value::from),
        ]
    }

    fn arb_scalar_map() -> impl Strategy<Value = BTreeMap<String, Value>> {
        proptest::collection::btree_map("[a-z_]{1,12}", arb_scalar(), 0..8)
    }

    proptest! {
        #[test]
        fn serialization_is_deterministic(values in arb_scalar_map()) {
            let first = serialize_scalar_map(&values);
            let second = serialize_scalar_map(&values);
            prop_assert!(first.is_ok());
            prop_assert_eq!(first.ok(), second.ok());
        }

        #[test]
        fn serialization_round_trips(values in arb_scalar_map()) {
            let serialized = serialize_scalar_map(&values);
            prop_assert!(serialized.is_ok());
            let restored: Result<BTreeMap<String, Value>, _> =
                serde_json::from_str(serialized.unwrap_or_default().as_str());
            prop_assert_eq!(restored.ok(), Some(values));
        }
    }
}
