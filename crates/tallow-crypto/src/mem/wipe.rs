//! Memory wiping and process hardening

use crate::error::{CryptoError, Result};

/// Prevent core dumps from being generated
///
/// Reduces the risk of key material being written to disk on a crash.
///
/// # Platform Support
///
/// - **Unix**: `setrlimit(RLIMIT_CORE, 0)`
/// - **Windows**: no-op (core dumps not typical)
#[allow(unsafe_code)]
pub fn prevent_core_dumps() -> Result<()> {
    #[cfg(unix)]
    {
        use std::io;
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a non-destructive call
        // disabling core dump generation for this process.
        unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            if libc::setrlimit(libc::RLIMIT_CORE, &rlim) != 0 {
                return Err(CryptoError::Io(io::Error::last_os_error().to_string()));
            }
        }
    }

    Ok(())
}

/// Guard that executes a wipe function on drop
///
/// Guarantees the wipe runs on every exit path, including early returns
/// and panics.
pub struct WipeGuard<F: FnOnce()> {
    wipe_fn: Option<F>,
}

/// Run `f` when the returned guard is dropped
pub fn wipe_on_drop<F: FnOnce()>(f: F) -> WipeGuard<F> {
    WipeGuard { wipe_fn: Some(f) }
}

impl<F: FnOnce()> Drop for WipeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.wipe_fn.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prevent_core_dumps() {
        // Should not panic
        let _ = prevent_core_dumps();
    }

    #[test]
    fn test_wipe_on_drop() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let value = AtomicU32::new(42);
        {
            let _guard = wipe_on_drop(|| {
                value.store(0, Ordering::SeqCst);
            });
            assert_eq!(value.load(Ordering::SeqCst), 42);
        }
        assert_eq!(value.load(Ordering::SeqCst), 0);
    }
}
