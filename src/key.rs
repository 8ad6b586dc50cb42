//! Fixed-width lookup keys and the field gather protocol
//!
//! A [`Key`] is an exact-width byte tuple copied out of a context's bound
//! fields. Equality and hashing cover only the declared width; a gathered key
//! is never zero-padded to the maximum.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::MAX_KEY;

/// A lookup key of exact byte width, at most [`MAX_KEY`] bytes
#[derive(Clone)]
pub struct Key {
    buf: [u8; MAX_KEY],
    width: u16,
}

impl Key {
    /// Build a key from raw bytes
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_KEY {
            return Err(Error::KeyTooWide(bytes.len()));
        }
        let mut buf = [0u8; MAX_KEY];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            buf,
            width: bytes.len() as u16,
        })
    }

    /// The key bytes, exactly `width` of them
    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.width as usize]
    }

    /// Key width in bytes
    #[inline(always)]
    pub fn width(&self) -> u16 {
        self.width
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes().hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:02x?})", self.bytes())
    }
}

/// Compose a key from the context's bound fields.
///
/// Each field's bytes are copied in argument order, byte-for-byte as they sit
/// in memory; no endianness conversion is performed. The summed field lengths
/// must equal `key_width` exactly and every id must be bound; both failures
/// are fatal for the current packet.
pub fn gather(ctx: &Context<'_>, key_width: u16, field_ids: &[u32]) -> Result<Key> {
    let mut buf = [0u8; MAX_KEY];
    let mut at = 0usize;
    for &id in field_ids {
        let binding = ctx.field_binding(id)?;
        let bytes = ctx.read_binding(&binding)?;
        let end = at + bytes.len();
        if end > MAX_KEY {
            return Err(Error::KeyTooWide(end));
        }
        buf[at..end].copy_from_slice(bytes);
        at = end;
    }
    if at != key_width as usize {
        return Err(Error::KeyWidthMismatch {
            expected: key_width,
            found: at as u16,
        });
    }
    Ok(Key {
        buf,
        width: key_width,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &Key) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn width_limits_equality() {
        let a = Key::new(&[1, 2, 3, 4]).unwrap();
        let b = Key::new(&[1, 2, 3, 4]).unwrap();
        let c = Key::new(&[1, 2, 3, 4, 0]).unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        // Trailing zero is part of c's width, so the keys differ.
        assert_ne!(a, c);
    }

    #[test]
    fn exact_width_no_padding() {
        let k = Key::new(&[0xAA, 0xBB]).unwrap();
        assert_eq!(k.width(), 2);
        assert_eq!(k.bytes(), &[0xAA, 0xBB]);
    }

    #[test]
    fn rejects_oversized() {
        let wide = [0u8; MAX_KEY + 1];
        assert!(matches!(
            Key::new(&wide),
            Err(Error::KeyTooWide(n)) if n == MAX_KEY + 1
        ));
    }
}
