//! Transport capability flags.
//!
//! Handlers declare the capabilities they need; transports declare the
//! capabilities they provide. The router compares the two before listing
//! or invoking a handler, so a client never discovers a tool its
//! transport cannot carry.

use std::fmt;
use std::ops::BitOr;

/// Bitset of features a transport provides (or a handler requires).
///
/// The flags are independent bits, though in practice
/// [`BINARY_STREAMING`](Self::BINARY_STREAMING) is only useful together
/// with [`FULL_DUPLEX`](Self::FULL_DUPLEX): raw frames need a channel the
/// server can write to at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportCapabilities(u8);

impl TransportCapabilities {
    /// Plain request/response messaging. Every transport provides this.
    pub const STANDARD: Self = Self(0b0001);

    /// Ordered incremental JSON frames (text streaming).
    pub const TEXT_STREAMING: Self = Self(0b0010);

    /// Raw binary frames carrying the 24-byte chunk header.
    pub const BINARY_STREAMING: Self = Self(0b0100);

    /// Server-initiated messages, not just response-to-request.
    pub const FULL_DUPLEX: Self = Self(0b1000);

    /// No capabilities.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every capability bit set.
    #[must_use]
    pub const fn all() -> Self {
        Self(0b1111)
    }

    /// Returns the union of both sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true when every bit in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true when no bits are set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Handlers that do not declare anything need plain messaging only.
impl Default for TransportCapabilities {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl BitOr for TransportCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for TransportCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (bit, name) in [
            (Self::STANDARD, "standard"),
            (Self::TEXT_STREAMING, "text-streaming"),
            (Self::BINARY_STREAMING, "binary-streaming"),
            (Self::FULL_DUPLEX, "full-duplex"),
        ] {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
