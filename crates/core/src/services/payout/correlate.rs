//! Payout call and reward event correlation.
//!
//! Pure functions over persisted extrinsic and event rows. Pallet and call
//! names are compared loosely (`payout_stakers` and `payoutStakers` both
//! match) so rows written by different decoders correlate the same way.

use serde_json::Value;

use crate::error::{DomainError, DomainResult};
use crate::models::{EraAttribution, Event, Extrinsic};

/// Direct payout calls, as `(pallet, call)`.
pub const PAYOUT_CALLS: &[(&str, &str)] = &[
    ("Staking", "payout_stakers"),
    ("Staking", "payout_stakers_by_page"),
];

/// Batch wrappers that may carry payout calls.
pub const BATCH_CALLS: &[(&str, &str)] = &[
    ("Utility", "batch"),
    ("Utility", "batch_all"),
    ("Utility", "force_batch"),
];

/// Events recording one reward payment.
pub const REWARD_EVENTS: &[(&str, &str)] = &[("Staking", "Rewarded"), ("Staking", "Reward")];

/// Eras paid out for one validator inside one extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorEras {
    pub validator: String,
    /// Distinct eras, in order of first appearance.
    pub eras: Vec<u32>,
}

/// Lowercase and strip separators: `payout_stakers` == `payoutStakers`.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn matches_any(section: &str, method: &str, table: &[(&str, &str)]) -> bool {
    let (section, method) = (normalize(section), normalize(method));
    table
        .iter()
        .any(|(s, m)| normalize(s) == section && normalize(m) == method)
}

pub fn is_payout_call(section: &str, method: &str) -> bool {
    matches_any(section, method, PAYOUT_CALLS)
}

pub fn is_batch_call(section: &str, method: &str) -> bool {
    matches_any(section, method, BATCH_CALLS)
}

pub fn is_reward_event(event: &Event) -> bool {
    matches_any(&event.section, &event.method, REWARD_EVENTS)
}

/// `(section, method)` pairs selecting candidate extrinsics from the store,
/// in both naming styles.
pub fn candidate_calls() -> Vec<(String, String)> {
    PAYOUT_CALLS
        .iter()
        .chain(BATCH_CALLS)
        .flat_map(|(s, m)| {
            [
                (s.to_string(), m.to_string()),
                (s.to_lowercase(), snake_to_camel(m)),
            ]
        })
        .collect()
}

fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// Call grouping
// =============================================================================

/// Group the payout calls of one extrinsic by validator.
///
/// A direct payout call yields one entry. A batch yields one entry per
/// distinct validator, accumulating every distinct era that validator was
/// paid for. Non-payout calls inside a batch are ignored.
pub fn group_payout_calls(extrinsic: &Extrinsic) -> DomainResult<Vec<ValidatorEras>> {
    let mut groups: Vec<ValidatorEras> = Vec::new();

    if is_payout_call(&extrinsic.section, &extrinsic.method) {
        let (validator, era) = parse_payout_args(&extrinsic.args)
            .ok_or_else(|| undecodable(extrinsic, &extrinsic.args))?;
        push_payout(&mut groups, validator, era);
    } else if is_batch_call(&extrinsic.section, &extrinsic.method) {
        for call in batch_calls(&extrinsic.args) {
            let Some((section, method, args)) = parse_inner_call(call) else {
                continue;
            };
            if !is_payout_call(&section, &method) {
                continue;
            }
            let (validator, era) =
                parse_payout_args(args).ok_or_else(|| undecodable(extrinsic, args))?;
            push_payout(&mut groups, validator, era);
        }
    }

    Ok(groups)
}

fn push_payout(groups: &mut Vec<ValidatorEras>, validator: String, era: u32) {
    match groups.iter_mut().find(|g| g.validator == validator) {
        Some(group) => {
            if !group.eras.contains(&era) {
                group.eras.push(era);
            }
        }
        None => groups.push(ValidatorEras {
            validator,
            eras: vec![era],
        }),
    }
}

fn undecodable(extrinsic: &Extrinsic, args: &Value) -> DomainError {
    DomainError::DecodingError(format!(
        "payout call in extrinsic {} has unreadable arguments: {}",
        extrinsic.id, args
    ))
}

/// Era a set of grouped payouts is attributed to.
///
/// Exactly one distinct era across all validators attributes to that era;
/// anything else is left unattributed rather than guessed.
pub fn attribute_era(groups: &[ValidatorEras]) -> EraAttribution {
    let mut eras = groups.iter().flat_map(|g| g.eras.iter().copied());
    let Some(first) = eras.next() else {
        return EraAttribution::Unattributed;
    };
    if eras.all(|e| e == first) {
        EraAttribution::Era(first)
    } else {
        EraAttribution::Unattributed
    }
}

/// Validator credited with the payout, `None` for multi-validator batches.
pub fn paid_by(groups: &[ValidatorEras]) -> Option<String> {
    match groups {
        [single] => Some(single.validator.clone()),
        _ => None,
    }
}

// =============================================================================
// Argument decoding
// =============================================================================

/// Inner calls of a batch: `{"calls": [...]}`, `[[...]]` or `[...]`.
///
/// A one-call batch may arrive with its list flattened to the call itself.
fn batch_calls(args: &Value) -> &[Value] {
    let calls = args.get("calls").or_else(|| match args {
        Value::Array(items) if matches!(items.first(), Some(Value::Array(_))) => items.first(),
        Value::Array(_) => Some(args),
        _ => None,
    });
    match calls {
        Some(Value::Array(items)) => items,
        Some(call @ Value::Object(_)) => std::slice::from_ref(call),
        _ => &[],
    }
}

/// Split one inner call into `(section, method, args)`.
///
/// Accepts the variant form `{"Staking": {"payout_stakers": {...}}}` and the
/// flat form `{"section": "staking", "method": "payoutStakers", "args": ...}`.
fn parse_inner_call(call: &Value) -> Option<(String, String, &Value)> {
    let obj = call.as_object()?;

    if let (Some(section), Some(method)) = (
        obj.get("section").and_then(Value::as_str),
        obj.get("method").and_then(Value::as_str),
    ) {
        return Some((section.to_string(), method.to_string(), obj.get("args")?));
    }

    let (section, inner) = single_entry(obj)?;
    let (method, args) = single_entry(inner.as_object()?)?;
    Some((section.clone(), method.clone(), args))
}

fn single_entry(obj: &serde_json::Map<String, Value>) -> Option<(&String, &Value)> {
    match obj.len() {
        1 => obj.iter().next(),
        _ => None,
    }
}

/// Read `(validator, era)` from payout call arguments.
pub fn parse_payout_args(args: &Value) -> Option<(String, u32)> {
    let validator = extract_field(args, &["validator_stash", "validatorStash"], 0, parse_address)?;
    let era = extract_field(args, &["era"], 1, parse_u32)?;
    Some((validator, era))
}

/// Read `(recipient, raw amount)` from a reward event.
pub fn parse_reward(event: &Event) -> DomainResult<(String, u128)> {
    let account = extract_field(&event.data, &["stash", "who", "account"], 0, parse_address);
    let amount = extract_field(&event.data, &["amount", "value"], 1, parse_amount);
    match (account, amount) {
        (Some(account), Some(amount)) => Ok((account, amount)),
        _ => Err(DomainError::DecodingError(format!(
            "reward event {} has unreadable data: {}",
            event.id, event.data
        ))),
    }
}

// =============================================================================
// JSON field helpers
// =============================================================================

/// Extract a field, trying each key in order and falling back to `index`.
fn extract_field<T>(
    data: &Value,
    keys: &[&str],
    index: usize,
    parser: fn(&Value) -> Option<T>,
) -> Option<T> {
    keys.iter()
        .find_map(|key| data.get(*key))
        .or_else(|| data.get(index))
        .and_then(parser)
}

/// Parse an address from a string, an `{"Id": ..}` wrapper, a one-element
/// array or a 32-byte array.
fn parse_address(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("Id")
            .or_else(|| obj.get("id"))
            .and_then(parse_address),
        Value::Array(arr) if arr.len() == 1 => parse_address(&arr[0]),
        Value::Array(arr) if arr.len() == 32 => {
            let bytes = arr
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()?;
            Some(format!("0x{}", hex::encode(bytes)))
        }
        _ => None,
    }
}

/// Parse an amount, tolerating numbers, decimal strings and `1,000` grouping.
fn parse_amount(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.replace(',', "").parse().ok(),
        _ => None,
    }
}

fn parse_u32(value: &Value) -> Option<u32> {
    parse_amount(value).and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn extrinsic(section: &str, method: &str, args: Value) -> Extrinsic {
        Extrinsic {
            id: "100-2".into(),
            block_number: 100,
            index: 2,
            section: section.into(),
            method: method.into(),
            args,
            is_signed: true,
            signer: "0xsigner".into(),
            nonce: 1,
            tip: 0,
            block_date: Utc::now(),
        }
    }

    fn payout_call(validator: &str, era: u32) -> Value {
        json!({"Staking": {"payout_stakers": {"validator_stash": validator, "era": era.to_string()}}})
    }

    #[test]
    fn test_batch_for_two_validators_in_one_era() {
        let ex = extrinsic(
            "Utility",
            "batch",
            json!({"calls": [payout_call("0xA", 7), payout_call("0xB", 7)]}),
        );

        let groups = group_payout_calls(&ex).unwrap();
        assert_eq!(
            groups,
            vec![
                ValidatorEras {
                    validator: "0xA".into(),
                    eras: vec![7]
                },
                ValidatorEras {
                    validator: "0xB".into(),
                    eras: vec![7]
                },
            ]
        );
        assert_eq!(attribute_era(&groups), EraAttribution::Era(7));
        assert_eq!(paid_by(&groups), None);
    }

    #[test]
    fn test_batch_for_one_validator_over_two_eras_is_unattributed() {
        let ex = extrinsic(
            "Utility",
            "batch_all",
            json!({"calls": [payout_call("0xA", 7), payout_call("0xA", 8), payout_call("0xA", 7)]}),
        );

        let groups = group_payout_calls(&ex).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].eras, vec![7, 8]);
        assert_eq!(attribute_era(&groups), EraAttribution::Unattributed);
        assert_eq!(paid_by(&groups), Some("0xA".into()));
    }

    #[test]
    fn test_direct_call_in_both_argument_shapes() {
        let named = extrinsic(
            "Staking",
            "payout_stakers",
            json!({"validator_stash": "0xA", "era": 12}),
        );
        let positional = extrinsic("staking", "payoutStakers", json!(["0xA", "1,012"]));

        assert_eq!(
            group_payout_calls(&named).unwrap()[0],
            ValidatorEras {
                validator: "0xA".into(),
                eras: vec![12]
            }
        );
        assert_eq!(group_payout_calls(&positional).unwrap()[0].eras, vec![1012]);
    }

    #[test]
    fn test_flat_batch_shape_and_foreign_calls() {
        let ex = extrinsic(
            "utility",
            "batch",
            json!([[
                {"section": "staking", "method": "payoutStakers", "args": ["0xA", "9"]},
                {"section": "system", "method": "remark", "args": ["0x00"]},
                {"Balances": {"transfer_keep_alive": {"dest": "0xC", "value": "1"}}}
            ]]),
        );

        let groups = group_payout_calls(&ex).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(attribute_era(&groups), EraAttribution::Era(9));
    }

    #[test]
    fn test_one_call_batch_with_flattened_list() {
        let ex = extrinsic("Utility", "batch_all", json!({"calls": payout_call("0xA", 3)}));

        let groups = group_payout_calls(&ex).unwrap();
        assert_eq!(paid_by(&groups).as_deref(), Some("0xA"));
        assert_eq!(attribute_era(&groups), EraAttribution::Era(3));
    }

    #[test]
    fn test_unreadable_payout_args_are_decode_errors() {
        let ex = extrinsic("Staking", "payout_stakers", json!({"era": "7"}));
        assert!(matches!(
            group_payout_calls(&ex),
            Err(DomainError::DecodingError(_))
        ));
    }

    #[test]
    fn test_non_payout_extrinsic_has_no_groups() {
        let ex = extrinsic("Balances", "transfer", json!({"dest": "0xC", "value": "1"}));
        assert!(group_payout_calls(&ex).unwrap().is_empty());
    }

    #[test]
    fn test_reward_event_shapes() {
        let mut event = Event {
            id: "100-5".into(),
            block_number: 100,
            index: 5,
            section: "Staking".into(),
            method: "Rewarded".into(),
            data: json!({"stash": "0xN", "dest": {"Staked": []}, "amount": "5000000000000"}),
            apply_extrinsic: Some(2),
            phase: "ApplyExtrinsic(2)".into(),
            topics: vec![],
            block_date: Utc::now(),
        };
        assert!(is_reward_event(&event));
        assert_eq!(
            parse_reward(&event).unwrap(),
            ("0xN".to_string(), 5_000_000_000_000)
        );

        event.method = "Reward".into();
        event.data = json!(["0xN", 42]);
        assert!(is_reward_event(&event));
        assert_eq!(parse_reward(&event).unwrap().1, 42);

        event.data = json!({"stash": "0xN"});
        assert!(parse_reward(&event).is_err());
    }

    #[test]
    fn test_candidate_calls_cover_both_naming_styles() {
        let calls = candidate_calls();
        assert!(calls.contains(&("Staking".into(), "payout_stakers".into())));
        assert!(calls.contains(&("staking".into(), "payoutStakers".into())));
        assert!(calls.contains(&("utility".into(), "batchAll".into())));
    }
}
