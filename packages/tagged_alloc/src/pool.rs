use std::fmt;

/// Every block handed out by a pool is aligned to at least this many bytes.
///
/// Types with a stricter alignment requirement cannot be allocated from a pool.
pub const POOL_ALIGNMENT: usize = 16;

/// The class of memory a pool allocation is served from.
///
/// The choice matters to callers that run in contexts where page faults cannot be serviced:
/// such callers must only touch memory from [`PoolType::NonPaged`]. This crate neither enforces
/// nor checks that constraint.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum PoolType {
    /// Memory that is always resident and may be touched from any execution context.
    NonPaged,

    /// Memory that may be paged out and must only be touched from contexts that can
    /// tolerate page faults.
    Paged,
}

/// An opaque 4-byte diagnostic tag attached to pool allocations.
///
/// Tags exist for the benefit of external leak-tracking and diagnostic tooling. They have no
/// behavioral effect within this crate other than being passed to the pool allocator.
///
/// # Examples
///
/// ```
/// use tagged_alloc::PoolTag;
///
/// const TAG: PoolTag = PoolTag::new(*b"Wdgt");
///
/// assert_eq!(TAG.to_string(), "Wdgt");
/// assert_eq!(TAG.as_u32(), 0x5764_6774);
/// ```
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PoolTag(u32);

impl PoolTag {
    /// Creates a tag from its four characters, first character first.
    #[must_use]
    pub const fn new(chars: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(chars))
    }

    /// Creates a tag from its numeric form, where the first character is the most
    /// significant byte (the encoding of a multi-character literal such as `'CRHR'`).
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    /// The numeric form of the tag, as passed to the pool allocator.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The four characters of the tag, first character first.
    #[must_use]
    pub const fn as_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };

            write!(f, "{c}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolTag('{self}' = {:#010x})", self.0)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolTag: Copy, Send, Sync, fmt::Debug, fmt::Display);
    assert_impl_all!(PoolType: Copy, Send, Sync, fmt::Debug);

    #[test]
    fn new_uses_multi_char_literal_encoding() {
        let tag = PoolTag::new(*b"CRHR");

        assert_eq!(tag.as_u32(), 0x4352_4852);
        assert_eq!(tag, PoolTag::from_u32(0x4352_4852));
        assert_eq!(tag.as_bytes(), *b"CRHR");
    }

    #[test]
    fn display_renders_characters() {
        assert_eq!(PoolTag::new(*b"UDHc").to_string(), "UDHc");
        assert_eq!(PoolTag::new(*b"ab c").to_string(), "ab c");
    }

    #[test]
    fn display_masks_non_printable_bytes() {
        assert_eq!(PoolTag::new([b'A', 0, 0x7F, b'z']).to_string(), "A..z");
    }

    #[test]
    fn debug_includes_numeric_form() {
        let rendered = format!("{:?}", PoolTag::new(*b"CRHR"));

        assert_eq!(rendered, "PoolTag('CRHR' = 0x43524852)");
    }

    #[test]
    fn pool_alignment_is_power_of_two() {
        assert!(POOL_ALIGNMENT.is_power_of_two());
    }
}
