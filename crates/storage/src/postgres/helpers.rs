//! Shared helper functions for PostgreSQL row conversion.

use stakewatch_core::error::{StorageError, StorageResult};

/// Convert a `Vec<u8>` to a fixed-size 32-byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_hash32(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field_name,
            v.len()
        ))
    })
}

/// Convert a `Vec<u8>` to a 32-byte array, rejecting all-zero values as corrupt.
pub fn bytes_to_hash32_strict(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    let arr = bytes_to_hash32(bytes, field_name)?;

    if arr == [0u8; 32] {
        return Err(StorageError::SerializationError(format!(
            "{} is all zeros, which indicates data corruption",
            field_name
        )));
    }

    Ok(arr)
}

/// Parse a `NUMERIC` column read back as text into a raw `u128`.
pub fn text_to_u128(text: &str, field_name: &str) -> StorageResult<u128> {
    text.parse().map_err(|_| {
        StorageError::SerializationError(format!("{} is not a u128: {}", field_name, text))
    })
}

/// In-block index encoded in a `{block}-{index}` row id.
pub fn row_index(id: &str) -> StorageResult<i32> {
    id.rsplit_once('-')
        .and_then(|(_, index)| index.parse().ok())
        .ok_or_else(|| StorageError::SerializationError(format!("malformed row id: {}", id)))
}

/// Narrow a block number or other `u64` to a `BIGINT` parameter.
pub fn to_bigint(value: u64, field_name: &str) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{} does not fit BIGINT: {}", field_name, value))
    })
}

/// Narrow an era, session or in-block index to an `INTEGER` parameter.
pub fn to_int(value: u32, field_name: &str) -> StorageResult<i32> {
    i32::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{} does not fit INTEGER: {}", field_name, value))
    })
}

/// Convert a non-negative integer column, rejecting negative values.
pub fn non_negative<T: TryFrom<i64>>(value: i64, field_name: &str) -> StorageResult<T> {
    T::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{} out of range: {}", field_name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_rejects_zero_hash() {
        let zeros = vec![0u8; 32];
        let result = bytes_to_hash32_strict(zeros, "block.hash");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("corruption"));
    }

    #[test]
    fn test_error_includes_field_name() {
        let result = bytes_to_hash32(vec![1u8; 16], "block.hash");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("block.hash"));
        assert!(err.contains("expected 32"));
    }

    #[test]
    fn test_numeric_text_parses_full_range() {
        assert_eq!(
            text_to_u128(&u128::MAX.to_string(), "extrinsic.tip").unwrap(),
            u128::MAX
        );
        assert!(text_to_u128("1.5", "extrinsic.tip").is_err());
    }

    #[test]
    fn test_row_index_reads_suffix() {
        assert_eq!(row_index("1200-4").unwrap(), 4);
        assert!(row_index("1200").is_err());
    }

    #[test]
    fn test_parameters_out_of_column_range_are_rejected() {
        assert_eq!(to_bigint(1_200, "block.number").unwrap(), 1_200);
        assert_eq!(to_int(84, "era.index").unwrap(), 84);
        let err = to_bigint(u64::MAX, "block.number").unwrap_err().to_string();
        assert!(err.contains("block.number") && err.contains("BIGINT"));
        assert!(to_int(u32::MAX, "session.index").is_err());
    }

    #[test]
    fn test_negative_columns_are_rejected() {
        assert_eq!(non_negative::<u32>(7, "era.index").unwrap(), 7);
        assert!(non_negative::<u64>(-1, "block.number").is_err());
    }
}
