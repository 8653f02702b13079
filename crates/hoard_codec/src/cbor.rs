//! CBOR marshaller for serde types.

use crate::error::{MarshalError, MarshalResult};
use crate::Marshaller;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Marshals any `serde` type as CBOR using `ciborium`.
///
/// Struct fields are written in declaration order, so the encoding of a
/// given value is stable across runs.
pub struct CborMarshaller<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborMarshaller<T> {
    /// Creates a new CBOR marshaller.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CborMarshaller<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CborMarshaller<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CborMarshaller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CborMarshaller")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Marshaller<T> for CborMarshaller<T>
where
    T: Serialize + DeserializeOwned,
{
    fn marshal(&self, value: &T) -> MarshalResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| MarshalError::encode(e.to_string()))?;
        Ok(buf)
    }

    fn unmarshal(&self, bytes: &[u8]) -> MarshalResult<T> {
        ciborium::from_reader(bytes).map_err(|e| MarshalError::decode(e.to_string()))
    }
}
