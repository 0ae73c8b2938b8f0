use std::fmt;

/// Error taxonomy for the codec.
///
/// All four public operations fail fast at the first detected inconsistency
/// and perform no partial writes to caller buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Woff2Error {
    /// A read would advance past the end of a buffer
    OutOfBounds,
    /// Structurally invalid input (bad magic, inconsistent table bounds,
    /// transform streams that don't reconcile, ...)
    Malformed,
    /// The caller-provided output buffer is too small. Unlike `Malformed`
    /// this is recoverable: resize and retry.
    CapacityInsufficient,
    /// The entropy coder rejected the blob, or produced the wrong number of bytes
    CompressionFailure,
}

impl fmt::Display for Woff2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfBounds => "read out of bounds",
            Self::Malformed => "malformed font data",
            Self::CapacityInsufficient => "output buffer too small",
            Self::CompressionFailure => "entropy compression failure",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Woff2Error {}

impl From<bytes::TryGetError> for Woff2Error {
    fn from(_value: bytes::TryGetError) -> Self {
        Self::OutOfBounds
    }
}

pub(crate) fn usize_will_overflow(a: usize, b: usize) -> bool {
    a.checked_add(b).is_none()
}

pub(crate) fn u32_will_overflow(a: u32, b: u32) -> bool {
    a.checked_add(b).is_none()
}

#[cfg(not(feature = "debug"))]
mod regular {
    macro_rules! bail {
        () => {
            return Err(crate::error::Woff2Error::Malformed)
        };
        ($kind: ident) => {
            return Err(crate::error::Woff2Error::$kind)
        };
    }
    pub(crate) use bail;

    macro_rules! bail_if {
        ($cond: expr) => {
            if $cond {
                return Err(crate::error::Woff2Error::Malformed);
            }
        };
        ($cond: expr, $kind: ident) => {
            if $cond {
                return Err(crate::error::Woff2Error::$kind);
            }
        };
    }
    pub(crate) use bail_if;

    macro_rules! bail_with_msg_if {
        ($cond: expr, $($msg:tt),*) => {
            if $cond {
                #[cfg(feature = "font_compression_bin")]
                eprintln!($($msg),*);
                return Err(crate::error::Woff2Error::Malformed);
            }
        };
    }
    pub(crate) use bail_with_msg_if;
}
#[cfg(not(feature = "debug"))]
pub(crate) use regular::*;

#[cfg(feature = "debug")]
mod debug {
    macro_rules! bail {
        () => {
            panic!()
        };
        ($kind: ident) => {
            panic!("{}", stringify!($kind))
        };
    }
    pub(crate) use bail;

    macro_rules! bail_if {
        ($cond: expr) => {
            if $cond {
                panic!("{}", stringify!($cond))
            }
        };
        ($cond: expr, $kind: ident) => {
            if $cond {
                panic!("{}: {}", stringify!($kind), stringify!($cond))
            }
        };
    }
    pub(crate) use bail_if;

    macro_rules! bail_with_msg_if {
        ($cond: expr, $($msg:tt),*) => {
            if $cond {
                panic!($($msg),*);
            }
        };
    }
    pub(crate) use bail_with_msg_if;
}
#[cfg(feature = "debug")]
pub(crate) use debug::*;
