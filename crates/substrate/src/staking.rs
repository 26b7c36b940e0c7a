//! Readers turning decoded staking storage into port types.

use serde_json::Value as Json;

use stakewatch_core::error::{ChainError, ChainResult};
use stakewatch_core::ports::{EraRewardPoints, Exposure, IndividualExposure, ValidatorPrefs};

/// `ErasStakersOverview` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureOverview {
    pub total: u128,
    pub own: u128,
    pub page_count: u32,
}

fn unexpected(entry: &str, value: &Json) -> ChainError {
    ChainError::UnexpectedValue {
        entry: entry.to_string(),
        message: value.to_string(),
    }
}

/// Items of a sequence, accepting a flattened one-element sequence.
pub fn as_list(value: &Json) -> Vec<&Json> {
    match value {
        Json::Array(items) => items.iter().collect(),
        Json::Null => Vec::new(),
        other => vec![other],
    }
}

pub fn json_u128(value: &Json) -> Option<u128> {
    match value {
        Json::String(s) => s.parse().ok(),
        Json::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}

pub fn json_u32(value: &Json) -> Option<u32> {
    json_u128(value).and_then(|v| u32::try_from(v).ok())
}

fn field_u128(value: &Json, field: &str, entry: &str) -> ChainResult<u128> {
    value
        .get(field)
        .and_then(json_u128)
        .ok_or_else(|| unexpected(entry, value))
}

/// `Staking.ErasRewardPoints`.
pub fn reward_points(value: &Json) -> ChainResult<EraRewardPoints> {
    const ENTRY: &str = "Staking.ErasRewardPoints";

    let total = value
        .get("total")
        .and_then(json_u32)
        .ok_or_else(|| unexpected(ENTRY, value))?;

    let individual = value.get("individual").unwrap_or(&Json::Null);
    let pairs: Vec<&Json> = match individual {
        Json::Array(items) if items.first().is_some_and(Json::is_array) => items.iter().collect(),
        // A single `(account, points)` pair with its list flattened
        Json::Array(items) if items.len() == 2 && items[0].is_string() => vec![individual],
        _ => Vec::new(),
    };

    let individual = pairs
        .into_iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Json::String(account), points]) => {
                json_u32(points).map(|p| (account.clone(), p))
            }
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| unexpected(ENTRY, value))?;

    Ok(EraRewardPoints { total, individual })
}

/// `Staking.ErasValidatorPrefs`.
pub fn validator_prefs(value: &Json) -> ChainResult<ValidatorPrefs> {
    let commission = value
        .get("commission")
        .and_then(json_u32)
        .ok_or_else(|| unexpected("Staking.ErasValidatorPrefs", value))?;
    let blocked = value.get("blocked").and_then(Json::as_bool).unwrap_or(false);

    Ok(ValidatorPrefs {
        commission,
        blocked,
    })
}

fn individual_exposures(value: &Json, entry: &str) -> ChainResult<Vec<IndividualExposure>> {
    let others = value.get("others").unwrap_or(&Json::Null);
    as_list(others)
        .into_iter()
        .map(|item| {
            let who = item.get("who").and_then(Json::as_str);
            let amount = item.get("value").and_then(json_u128);
            match (who, amount) {
                (Some(who), Some(value)) => Ok(IndividualExposure {
                    who: who.to_string(),
                    value,
                }),
                _ => Err(unexpected(entry, item)),
            }
        })
        .collect()
}

/// `Staking.ErasStakers` (non-paged exposure).
pub fn exposure(value: &Json) -> ChainResult<Exposure> {
    const ENTRY: &str = "Staking.ErasStakers";
    Ok(Exposure {
        total: field_u128(value, "total", ENTRY)?,
        own: field_u128(value, "own", ENTRY)?,
        others: individual_exposures(value, ENTRY)?,
    })
}

/// `Staking.ErasStakersOverview`.
pub fn exposure_overview(value: &Json) -> ChainResult<ExposureOverview> {
    const ENTRY: &str = "Staking.ErasStakersOverview";
    Ok(ExposureOverview {
        total: field_u128(value, "total", ENTRY)?,
        own: field_u128(value, "own", ENTRY)?,
        page_count: value
            .get("page_count")
            .and_then(json_u32)
            .ok_or_else(|| unexpected(ENTRY, value))?,
    })
}

/// Nominators of one `Staking.ErasStakersPaged` page.
pub fn exposure_page(value: &Json) -> ChainResult<Vec<IndividualExposure>> {
    individual_exposures(value, "Staking.ErasStakersPaged")
}

/// A list of account addresses, e.g. `Session.Validators`.
pub fn accounts(value: &Json, entry: &str) -> ChainResult<Vec<String>> {
    as_list(value)
        .into_iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| unexpected(entry, v))
        })
        .collect()
}

/// Account bytes for a storage key, from a `0x` hex address.
pub fn account_key(address: &str) -> ChainResult<Vec<u8>> {
    hex::decode(address.trim_start_matches("0x")).map_err(|e| ChainError::UnexpectedValue {
        entry: "account address".to_string(),
        message: format!("{address}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reward_points_with_several_validators() {
        let points = reward_points(&json!({
            "total": "100",
            "individual": [["0xv1", "60"], ["0xv2", "40"]]
        }))
        .unwrap();

        assert_eq!(points.total, 100);
        assert_eq!(
            points.individual,
            vec![("0xv1".to_string(), 60), ("0xv2".to_string(), 40)]
        );
    }

    #[test]
    fn test_reward_points_with_one_flattened_pair() {
        let points = reward_points(&json!({"total": "20", "individual": ["0xv1", "20"]})).unwrap();
        assert_eq!(points.individual, vec![("0xv1".to_string(), 20)]);
    }

    #[test]
    fn test_reward_points_of_running_era_are_empty() {
        let points = reward_points(&json!({"total": "0", "individual": []})).unwrap();
        assert!(points.individual.is_empty());
    }

    #[test]
    fn test_exposure_accepts_one_flattened_nominator() {
        let exposure = exposure(&json!({
            "total": "1500",
            "own": "500",
            "others": {"who": "0xn1", "value": "1000"}
        }))
        .unwrap();

        assert_eq!(exposure.total, 1_500);
        assert_eq!(exposure.others.len(), 1);
        assert_eq!(exposure.others[0].who, "0xn1");
    }

    #[test]
    fn test_paged_exposure() {
        let overview = exposure_overview(&json!({
            "total": "3000",
            "own": "1000",
            "nominator_count": "3",
            "page_count": "2"
        }))
        .unwrap();
        assert_eq!(overview.page_count, 2);

        let page = exposure_page(&json!({
            "page_total": "2000",
            "others": [{"who": "0xn1", "value": "1500"}, {"who": "0xn2", "value": "500"}]
        }))
        .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_prefs_default_to_unblocked() {
        let prefs = validator_prefs(&json!({"commission": "50000000"})).unwrap();
        assert_eq!(prefs.commission, 50_000_000);
        assert!(!prefs.blocked);
    }

    #[test]
    fn test_malformed_values_name_their_entry() {
        let err = exposure(&json!({"own": "1"})).unwrap_err();
        assert!(err.to_string().contains("Staking.ErasStakers"));
        assert!(account_key("0xzz").is_err());
        assert_eq!(accounts(&json!("0xv1"), "Session.Validators").unwrap(), vec!["0xv1"]);
    }
}
