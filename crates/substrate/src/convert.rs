//! SCALE value to JSON conversion.
//!
//! Byte arrays become `0x` hex strings, integers become decimal strings,
//! `Option` variants collapse to their value or `null`, and single-element
//! tuples are unwrapped. The last rule also flattens one-element sequences,
//! so readers of this JSON must accept a bare item where a list is expected.

use serde_json::{Map, Value as Json};
use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};

/// Convert a Composite to a JSON value.
pub fn composite_to_json<T>(composite: &Composite<T>) -> Json {
    match composite {
        Composite::Unnamed(values) => {
            // Looks like a byte array (AccountId, Hash)
            if let Some(hex_str) = try_as_byte_array(values) {
                return Json::String(hex_str);
            }
            // Newtype wrappers
            if values.len() == 1 {
                return value_to_json(&values[0]);
            }
            Json::Array(values.iter().map(value_to_json).collect())
        }
        Composite::Named(fields) => {
            let obj: Map<String, Json> = fields
                .iter()
                .map(|(name, v)| (name.clone(), value_to_json(v)))
                .collect();
            Json::Object(obj)
        }
    }
}

/// Interpret an unnamed composite of 20, 32 or 64 bytes as a hex string.
fn try_as_byte_array<T>(values: &[Value<T>]) -> Option<String> {
    let len = values.len();
    if len != 32 && len != 20 && len != 64 {
        return None;
    }

    let bytes = values
        .iter()
        .map(|value| match &value.value {
            ValueDef::Primitive(Primitive::U128(n)) => u8::try_from(*n).ok(),
            _ => None,
        })
        .collect::<Option<Vec<u8>>>()?;

    Some(format!("0x{}", hex::encode(bytes)))
}

/// Convert a Value to a JSON value.
pub fn value_to_json<T>(value: &Value<T>) -> Json {
    value_def_to_json(&value.value)
}

fn value_def_to_json<T>(value: &ValueDef<T>) -> Json {
    match value {
        ValueDef::Composite(composite) => composite_to_json(composite),
        ValueDef::Variant(variant) => {
            let variant_name = &variant.name;
            let inner = composite_to_json(&variant.values);

            match variant_name.as_str() {
                "None" => Json::Null,
                // `Some(x)` and `MultiAddress::Id(x)` carry their value
                "Some" | "Id" => match inner {
                    Json::Array(mut arr) if arr.len() == 1 => arr.remove(0),
                    other => other,
                },
                _ => {
                    let mut map = Map::new();
                    map.insert(variant_name.clone(), inner);
                    Json::Object(map)
                }
            }
        }
        ValueDef::Primitive(primitive) => primitive_to_json(primitive),
        ValueDef::BitSequence(bits) => Json::String(format!("{:?}", bits)),
    }
}

fn primitive_to_json(primitive: &Primitive) -> Json {
    match primitive {
        Primitive::Bool(b) => Json::Bool(*b),
        Primitive::Char(c) => Json::String(c.to_string()),
        Primitive::String(s) => Json::String(s.clone()),
        Primitive::U128(n) => Json::String(n.to_string()),
        Primitive::I128(n) => Json::String(n.to_string()),
        Primitive::U256(n) => Json::String(format!("{:?}", n)),
        Primitive::I256(n) => Json::String(format!("{:?}", n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_account_bytes_become_hex() {
        let account = Value::unnamed_composite((0..32u8).map(|b| Value::u128(b.into())));
        let expected = format!("0x{}", hex::encode((0..32u8).collect::<Vec<_>>()));
        assert_eq!(value_to_json(&account), json!(expected));
    }

    #[test]
    fn test_named_call_arguments() {
        let args = Value::named_composite([
            ("validator_stash", Value::unnamed_composite([Value::u128(7)])),
            ("era", Value::u128(1_234)),
        ]);
        assert_eq!(
            value_to_json(&args),
            json!({"validator_stash": "7", "era": "1234"})
        );
    }

    #[test]
    fn test_option_and_enum_variants() {
        let some = Value::variant("Some", Composite::Unnamed(vec![Value::u128(5)]));
        let none = Value::variant("None", Composite::Unnamed(vec![]));
        let staked = Value::variant("Staked", Composite::Unnamed(vec![]));

        assert_eq!(value_to_json(&some), json!("5"));
        assert_eq!(value_to_json(&none), Json::Null);
        assert_eq!(value_to_json(&staked), json!({"Staked": []}));
    }

    #[test]
    fn test_one_element_sequence_is_flattened() {
        let calls = Value::unnamed_composite([Value::variant(
            "Staking",
            Composite::Unnamed(vec![Value::u128(1)]),
        )]);
        assert_eq!(value_to_json(&calls), json!({"Staking": "1"}));
    }
}
