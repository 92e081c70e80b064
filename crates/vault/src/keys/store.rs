//! [`KeyCache`]: thread-safe, resolve-once cache for the active field key.

use std::fmt;

use parking_lot::RwLock;

use crate::crypto::KEY_LEN;

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// Cloned out of [`KeyCache`] into codec call stacks when needed. When this
/// type is dropped, the memory is overwritten with zeroes.
#[derive(Clone)]
pub struct KeyBytes(pub Box<[u8; KEY_LEN]>);

impl KeyBytes {
    /// Copy `bytes` into a new key buffer. Returns `None` on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEY_LEN {
            return None;
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Some(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.write_str("KeyBytes([REDACTED])")
    }
}

/// Resolve-once slot for the active key.
///
/// The first successful initialisation wins; every later call returns a
/// clone of the same key. A failed initialisation leaves the slot empty so
/// the next caller retries.
#[derive(Debug, Default)]
pub struct KeyCache {
    inner: RwLock<Option<KeyBytes>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a key is currently cached.
    pub fn is_ready(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Borrow a clone of the cached key, if any.
    pub fn current(&self) -> Option<KeyBytes> {
        self.inner.read().clone()
    }

    /// Return the cached key, running `init` under the write lock if the slot
    /// is still empty.
    pub fn get_or_try_init<E>(
        &self,
        init: impl FnOnce() -> Result<KeyBytes, E>,
    ) -> Result<KeyBytes, E> {
        if let Some(key) = self.current() {
            return Ok(key);
        }
        let mut slot = self.inner.write();
        if let Some(key) = slot.as_ref() {
            return Ok(key.clone());
        }
        let key = init()?;
        *slot = Some(key.clone());
        Ok(key)
    }
}
