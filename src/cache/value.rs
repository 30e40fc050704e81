//! Dynamic cache values and the counting contract behind `incr`/`decr`.

use super::CacheError;

/// Types the cache can atomically increment and decrement.
///
/// Implemented for the integral primitives and for [`Value`]. Unsigned
/// types refuse to go below zero; non-integral [`Value`] variants refuse
/// to count at all.
pub trait Counted: Sized {
    /// Return the value adjusted by +1.
    fn incr(&self) -> Result<Self, CacheError>;
    /// Return the value adjusted by -1.
    fn decr(&self) -> Result<Self, CacheError>;
}

macro_rules! counted_signed {
    ($($t:ty),*) => {$(
        impl Counted for $t {
            fn incr(&self) -> Result<Self, CacheError> {
                Ok(self.wrapping_add(1))
            }
            fn decr(&self) -> Result<Self, CacheError> {
                Ok(self.wrapping_sub(1))
            }
        }
    )*};
}

macro_rules! counted_unsigned {
    ($($t:ty),*) => {$(
        impl Counted for $t {
            fn incr(&self) -> Result<Self, CacheError> {
                Ok(self.wrapping_add(1))
            }
            fn decr(&self) -> Result<Self, CacheError> {
                self.checked_sub(1).ok_or(CacheError::ValueLessThanZero)
            }
        }
    )*};
}

counted_signed!(i8, i16, i32, i64, isize);
counted_unsigned!(u8, u16, u32, u64, usize);

/// Dynamically typed value for heterogeneous cache instances.
///
/// A `Cache<Value>` behaves like the classic untyped cache: any entry may
/// hold any variant, and `incr`/`decr` fail with
/// [`CacheError::DataTypeNotSupported`] on non-integral variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Boolean.
    Bool(bool),
}

impl Counted for Value {
    fn incr(&self) -> Result<Self, CacheError> {
        match self {
            Self::Int(v) => Ok(Self::Int(v.wrapping_add(1))),
            Self::Uint(v) => Ok(Self::Uint(v.wrapping_add(1))),
            _ => Err(CacheError::DataTypeNotSupported),
        }
    }

    fn decr(&self) -> Result<Self, CacheError> {
        match self {
            Self::Int(v) => Ok(Self::Int(v.wrapping_sub(1))),
            Self::Uint(v) => v
                .checked_sub(1)
                .map(Self::Uint)
                .ok_or(CacheError::ValueLessThanZero),
            _ => Err(CacheError::DataTypeNotSupported),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
