//! Secure buffer that automatically zeroizes on drop

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A buffer that wipes its contents when dropped
///
/// Wrap any `Zeroize` value so sensitive material is always overwritten
/// when it goes out of scope, on every exit path.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureBuf<T: Zeroize> {
    inner: T,
}

impl<T: Zeroize> SecureBuf<T> {
    /// Wrap a sensitive value
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Expose the secret value as a reference
    ///
    /// # Security
    ///
    /// The caller must not copy the value out. Prefer limited scopes.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }

    /// Expose the secret value as a mutable reference
    pub fn expose_secret_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Zeroize> From<T> for SecureBuf<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl SecureBuf<Vec<u8>> {
    /// Buffer length in bytes
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Zeroize> std::fmt::Debug for SecureBuf<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecureBuf<REDACTED>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_buf_vec() {
        let buf = SecureBuf::new(vec![1u8, 2, 3, 4]);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.expose_secret(), &vec![1u8, 2, 3, 4]);
    }

    #[test]
    fn test_debug_redacts() {
        let buf = SecureBuf::new([9u8; 32]);
        assert_eq!(format!("{:?}", buf), "SecureBuf<REDACTED>");
    }
}
