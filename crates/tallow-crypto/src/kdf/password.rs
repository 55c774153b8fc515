//! Memory-hard password derivation (Argon2id)

use crate::error::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

/// Minimum accepted salt length in bytes
pub const MIN_SALT_LEN: usize = 16;

/// Argon2id cost parameters
///
/// The defaults are the production costs: 256 MiB memory, 3 passes,
/// parallelism 4. Tests may lower them; callers must not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Lanes/threads
    pub parallelism: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        Self {
            memory_kib: 256 * 1024,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl PasswordParams {
    /// Cheap parameters for unit tests only
    #[cfg(test)]
    pub fn insecure_test() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Derive a 32-byte key from a password with Argon2id
///
/// # Arguments
///
/// * `password` - The low-entropy secret
/// * `salt` - At least [`MIN_SALT_LEN`] bytes
/// * `params` - Cost parameters ([`PasswordParams::default`] for production)
pub fn derive(password: &[u8], salt: &[u8], params: PasswordParams) -> Result<[u8; 32]> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::Kdf(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_LEN,
            salt.len()
        )));
    }

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| CryptoError::Kdf(format!("Argon2 params: {}", e)))?;

    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(password, salt, out.as_mut())
        .map_err(|e| CryptoError::Kdf(format!("Argon2: {}", e)))?;

    Ok(*out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let p = PasswordParams::insecure_test();
        let a = derive(b"room-code", b"0123456789abcdef", p).unwrap();
        let b = derive(b"room-code", b"0123456789abcdef", p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_password_different_key() {
        let p = PasswordParams::insecure_test();
        let a = derive(b"foo", b"0123456789abcdef", p).unwrap();
        let b = derive(b"bar", b"0123456789abcdef", p).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_salt_rejected() {
        let p = PasswordParams::insecure_test();
        assert!(derive(b"pw", b"short", p).is_err());
    }

    #[test]
    fn test_production_params() {
        let p = PasswordParams::default();
        assert!(p.memory_kib >= 256 * 1024);
        assert!(p.iterations >= 3);
        assert!(p.parallelism >= 4);
    }
}
