//! Versioned voxel token codec
//!
//! A token is the opaque string form of a [`VoxelState`], used both as the
//! wire representation inside snapshot files and as the host's live
//! representation. Layout: `v1;<kind>` or `v1;<kind>;key=value,key=value`,
//! with properties in canonical (sorted) order.

use std::collections::BTreeMap;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::voxel::state::VoxelState;

/// Current token version tag
pub const TOKEN_VERSION: &str = "v1";

/// Encode a voxel state into its canonical token
pub fn encode_token(state: &VoxelState) -> String {
    if state.props.is_empty() {
        return format!("{};{}", TOKEN_VERSION, state.kind);
    }
    let props: Vec<String> = state
        .props
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{};{};{}", TOKEN_VERSION, state.kind, props.join(","))
}

/// Decode a token into a voxel state
///
/// Fails with [`Error::InvalidToken`] on an unknown version tag, malformed
/// syntax, invalid identifiers, or duplicate property keys. Callers that
/// process batches should substitute [`VoxelState::air`] and keep going
/// rather than abort (see [`decode_token_or_air`]).
pub fn decode_token(token: &str) -> Result<VoxelState> {
    let mut parts = token.splitn(3, ';');

    let version = parts.next().unwrap_or("");
    if version != TOKEN_VERSION {
        return Err(Error::InvalidToken(format!(
            "unknown token version '{}' in '{}'",
            version, token
        )));
    }

    let kind = parts
        .next()
        .ok_or_else(|| Error::InvalidToken(format!("missing kind in '{}'", token)))?;
    if !is_identifier(kind) {
        return Err(Error::InvalidToken(format!(
            "invalid kind '{}' in '{}'",
            kind, token
        )));
    }

    let mut props = BTreeMap::new();
    if let Some(prop_str) = parts.next() {
        if prop_str.is_empty() {
            return Err(Error::InvalidToken(format!("empty property list in '{}'", token)));
        }
        for pair in prop_str.split(',') {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::InvalidToken(format!("malformed property '{}' in '{}'", pair, token))
            })?;
            if !is_identifier(key) || !is_identifier(value) {
                return Err(Error::InvalidToken(format!(
                    "invalid property '{}' in '{}'",
                    pair, token
                )));
            }
            if props.insert(key.to_string(), value.to_string()).is_some() {
                return Err(Error::InvalidToken(format!(
                    "duplicate property key '{}' in '{}'",
                    key, token
                )));
            }
        }
    }

    Ok(VoxelState {
        kind: kind.to_string(),
        props,
    })
}

/// Decode a token, falling back to the inert voxel on failure
///
/// Logs a warning with the offending token; never fails. This is the
/// batch-processing entry point used by snapshot reads and regeneration.
pub fn decode_token_or_air(token: &str) -> VoxelState {
    match decode_token(token) {
        Ok(state) => state,
        Err(e) => {
            log::warn!("substituting air voxel: {}", e);
            VoxelState::air()
        }
    }
}

/// Lowercase identifier: `[a-z0-9_]+`
fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_no_props() {
        assert_eq!(encode_token(&VoxelState::new("stone")), "v1;stone");
    }

    #[test]
    fn test_encode_props_canonical_order() {
        let state = VoxelState::new("oak_stairs")
            .with_prop("half", "top")
            .with_prop("facing", "north");
        assert_eq!(encode_token(&state), "v1;oak_stairs;facing=north,half=top");
    }

    #[test]
    fn test_roundtrip() {
        let state = VoxelState::new("sign").with_prop("rotation", "12");
        let decoded = decode_token(&encode_token(&state)).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        assert!(matches!(decode_token("v9;stone"), Err(Error::InvalidToken(_))));
        assert!(matches!(decode_token("stone"), Err(Error::InvalidToken(_))));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_token("v1;").is_err());
        assert!(decode_token("v1;Stone").is_err());
        assert!(decode_token("v1;stone;facing").is_err());
        assert!(decode_token("v1;stone;facing=north,facing=south").is_err());
        assert!(decode_token("v1;stone;").is_err());
    }

    #[test]
    fn test_decode_or_air_substitutes() {
        assert_eq!(decode_token_or_air("garbage"), VoxelState::air());
        assert_eq!(decode_token_or_air("v1;dirt"), VoxelState::new("dirt"));
    }

    #[test]
    fn test_noncanonical_token_decodes_equal() {
        // Legacy tokens may carry properties in any order; decoded states
        // must still compare equal.
        let a = decode_token("v1;stairs;half=top,facing=north").unwrap();
        let b = decode_token("v1;stairs;facing=north,half=top").unwrap();
        assert_eq!(a, b);
    }
}
