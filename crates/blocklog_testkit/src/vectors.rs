//! Preamble format vectors.
//!
//! These vectors pin down the on-disk header layout so other readers of the
//! log format can check themselves against this implementation.

use blocklog_core::{CoreError, Preamble};
use serde::{Deserialize, Serialize};

/// A format vector that can be shared with other implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Encoded preamble (hex-encoded).
    pub input_hex: String,
    /// Expected first block number, for vectors that decode.
    pub expected_first_block_num: Option<u32>,
    /// Expected error kind (if this should fail).
    pub expected_error: Option<String>,
}

/// Hex of the default genesis state.
fn default_genesis_hex() -> String {
    format!(
        "00000000{}{}{}{}{}",
        "00".repeat(33),
        "0000100000000000",
        "400d0300",
        "100e0000",
        "0600"
    )
}

fn totem_hex() -> String {
    "ff".repeat(8)
}

/// Preambles that must decode.
pub fn preamble_vectors() -> Vec<FormatVector> {
    vec![
        FormatVector {
            id: "preamble_v1_genesis".into(),
            description: "Version 1: version word then genesis state, no totem".into(),
            input_hex: format!("01000000{}", default_genesis_hex()),
            expected_first_block_num: Some(1),
            expected_error: None,
        },
        FormatVector {
            id: "preamble_v3_genesis".into(),
            description: "Version 3 starting at block 1 carries a genesis state".into(),
            input_hex: format!("0300000001000000{}{}", default_genesis_hex(), totem_hex()),
            expected_first_block_num: Some(1),
            expected_error: None,
        },
        FormatVector {
            id: "preamble_v3_chain_id".into(),
            description: "Version 3 starting at block 100 carries a chain id".into(),
            input_hex: format!("0300000064000000{}{}", "11".repeat(32), totem_hex()),
            expected_first_block_num: Some(100),
            expected_error: None,
        },
        FormatVector {
            id: "preamble_v3_chain_id_pruned".into(),
            description: "Pruned flag is the top bit of the version word".into(),
            input_hex: format!("0300008064000000{}{}", "11".repeat(32), totem_hex()),
            expected_first_block_num: Some(100),
            expected_error: None,
        },
    ]
}

/// Preambles that must be rejected.
pub fn invalid_preamble_vectors() -> Vec<FormatVector> {
    vec![
        FormatVector {
            id: "preamble_zero_version".into(),
            description: "A zero version marks a log whose header write never completed".into(),
            input_hex: format!("0000000064000000{}{}", "11".repeat(32), totem_hex()),
            expected_first_block_num: None,
            expected_error: Some("InvalidFormat".into()),
        },
        FormatVector {
            id: "preamble_unknown_version".into(),
            description: "Version 4 is newer than any supported format".into(),
            input_hex: format!("0400000064000000{}{}", "11".repeat(32), totem_hex()),
            expected_first_block_num: None,
            expected_error: Some("UnsupportedVersion".into()),
        },
        FormatVector {
            id: "preamble_bad_totem".into(),
            description: "The totem must separate the header from the first entry".into(),
            input_hex: format!("0300000064000000{}fe{}", "11".repeat(32), "ff".repeat(7)),
            expected_first_block_num: None,
            expected_error: Some("InvalidFormat".into()),
        },
    ]
}

/// Name of the error kind `e`, as used in [`FormatVector::expected_error`].
pub fn error_kind(e: &CoreError) -> &'static str {
    match e {
        CoreError::InvalidFormat { .. } => "InvalidFormat",
        CoreError::UnsupportedVersion { .. } => "UnsupportedVersion",
        CoreError::Decode { .. } => "Decode",
        _ => "Other",
    }
}

/// Checks one vector against the decoder.
///
/// # Errors
///
/// Returns a description of the mismatch.
pub fn check_vector(vector: &FormatVector) -> Result<(), String> {
    let input = hex::decode(&vector.input_hex)
        .map_err(|e| format!("Vector {} has invalid hex: {e}", vector.id))?;
    match (Preamble::read_from(&mut input.as_slice()), &vector.expected_error) {
        (Ok(preamble), None) => {
            if Some(preamble.first_block_num) != vector.expected_first_block_num {
                return Err(format!(
                    "Vector {}: first block {} != {:?}",
                    vector.id, preamble.first_block_num, vector.expected_first_block_num
                ));
            }
            if preamble.encode() != input {
                return Err(format!("Vector {}: re-encoding differs", vector.id));
            }
            Ok(())
        }
        (Err(e), Some(expected)) if error_kind(&e) == expected => Ok(()),
        (Err(e), _) => Err(format!("Vector {} failed: {e}", vector.id)),
        (Ok(_), Some(expected)) => Err(format!(
            "Vector {} decoded but should fail with {expected}",
            vector.id
        )),
    }
}

/// Generate all format vectors as JSON.
pub fn all_vectors_json() -> String {
    let vectors = AllFormatVectors {
        preamble: preamble_vectors(),
        invalid_preamble: invalid_preamble_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllFormatVectors {
    preamble: Vec<FormatVector>,
    invalid_preamble: Vec<FormatVector>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklog_core::{MAX_HEADER_SIZE, NBYTES_WITH_CHAIN_ID};

    #[test]
    fn test_preamble_vectors() {
        for vector in preamble_vectors() {
            check_vector(&vector).unwrap();
        }
    }

    #[test]
    fn test_invalid_preamble_vectors() {
        for vector in invalid_preamble_vectors() {
            check_vector(&vector).unwrap();
        }
    }

    #[test]
    fn test_vector_sizes_match_constants() {
        let vectors = preamble_vectors();
        assert_eq!(vectors[1].input_hex.len() as u64, MAX_HEADER_SIZE * 2);
        assert_eq!(vectors[2].input_hex.len() as u64, NBYTES_WITH_CHAIN_ID * 2);
    }

    #[test]
    fn test_all_vectors_json() {
        let json = all_vectors_json();
        let parsed: AllFormatVectors = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.preamble.len(), preamble_vectors().len());
        assert!(json.contains("preamble_v3_chain_id"));
    }
}
