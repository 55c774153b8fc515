//! Domain separation registry for key derivation
//!
//! Every derivation context used anywhere in the stack is listed here.
//! Deriving with an ad-hoc string is a bug; add the context to this
//! registry instead.

/// Hybrid KEM secret combination
pub const HYBRID_V1: &str = "tallow-hybrid-v1";

/// Ratchet root key advancement
pub const ROOT_KEY: &str = "tallow-root-key";

/// Ratchet chain key advancement
pub const CHAIN_KEY: &str = "tallow-chain-key";

/// Per-message key derivation from a chain key
pub const MESSAGE_KEY: &str = "tallow-message-key";

/// Nonce seed derivation
pub const NONCE_SEED: &str = "tallow-nonce-seed";

/// At-rest storage key derivation
pub const STORAGE_KEY: &str = "tallow-storage-key";

/// Signaling envelope encryption key
pub const SIGNALING_V1: &str = "tallow-signaling-v1";

/// PAKE password stretching salt/context
pub const PAKE_V1: &str = "tallow-pake-v1";

/// Session key derived from the PAKE output
pub const PAKE_SESSION: &str = "tallow-pake-session";

/// PAKE confirmation tag, initiator direction
pub const PAKE_CONFIRM_INITIATOR: &str = "tallow-pake-confirm-initiator";

/// PAKE confirmation tag, responder direction
pub const PAKE_CONFIRM_RESPONDER: &str = "tallow-pake-confirm-responder";

/// Filename encryption key
pub const FILENAME_KEY: &str = "tallow-filename-key";

/// Session key export for application-layer derivations
pub const EXPORT: &str = "tallow-export-v1";

/// All registered contexts, for audit tests
pub const REGISTRY: &[&str] = &[
    HYBRID_V1,
    ROOT_KEY,
    CHAIN_KEY,
    MESSAGE_KEY,
    NONCE_SEED,
    STORAGE_KEY,
    SIGNALING_V1,
    PAKE_V1,
    PAKE_SESSION,
    PAKE_CONFIRM_INITIATOR,
    PAKE_CONFIRM_RESPONDER,
    FILENAME_KEY,
    EXPORT,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for ctx in REGISTRY {
            assert!(seen.insert(ctx), "duplicate domain context: {}", ctx);
        }
    }
}
