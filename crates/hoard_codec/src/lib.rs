//! # hoard codec
//!
//! The marshalling contract used by hoard tables to turn domain keys and
//! values into opaque byte sequences for storage.
//!
//! The cache layer never inspects bytes itself. A table is built with one
//! [`Marshaller`] for its keys and one for its values; any format works as
//! long as `unmarshal(marshal(v)) == v`.
//!
//! ## Provided marshallers
//!
//! - [`CborMarshaller`] - any `serde` type, encoded as CBOR
//! - [`BytesMarshaller`] - raw `Vec<u8>` passthrough
//! - [`U64Marshaller`] / [`U32Marshaller`] - big-endian integers, so byte
//!   order matches numeric order in ranged scans
//! - [`StringMarshaller`] - UTF-8 text
//!
//! ## Usage
//!
//! ```
//! use hoard_codec::{CborMarshaller, Marshaller};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Role { level: u32, name: String }
//!
//! let codec = CborMarshaller::<Role>::new();
//! let role = Role { level: 7, name: "mage".into() };
//! let bytes = codec.marshal(&role).unwrap();
//! assert_eq!(codec.unmarshal(&bytes).unwrap(), role);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod primitive;

pub use cbor::CborMarshaller;
pub use error::{MarshalError, MarshalResult};
pub use primitive::{BytesMarshaller, StringMarshaller, U32Marshaller, U64Marshaller};

/// Converts values of type `T` to and from byte sequences.
///
/// Implementations must be deterministic: equal values produce equal bytes,
/// which keeps key lookups in storage stable.
pub trait Marshaller<T>: Send + Sync {
    /// Encodes a value to bytes.
    fn marshal(&self, value: &T) -> MarshalResult<Vec<u8>>;

    /// Decodes a value from bytes.
    fn unmarshal(&self, bytes: &[u8]) -> MarshalResult<T>;
}
