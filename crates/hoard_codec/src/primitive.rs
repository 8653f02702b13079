//! Marshallers for primitive key and value types.

use crate::error::{MarshalError, MarshalResult};
use crate::Marshaller;

/// Passes byte vectors through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesMarshaller;

impl Marshaller<Vec<u8>> for BytesMarshaller {
    fn marshal(&self, value: &Vec<u8>) -> MarshalResult<Vec<u8>> {
        Ok(value.clone())
    }

    fn unmarshal(&self, bytes: &[u8]) -> MarshalResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Encodes `u64` as 8 big-endian bytes.
///
/// Big-endian keeps lexicographic byte order equal to numeric order, which
/// is what ranged storage scans iterate by.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Marshaller;

impl Marshaller<u64> for U64Marshaller {
    fn marshal(&self, value: &u64) -> MarshalResult<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn unmarshal(&self, bytes: &[u8]) -> MarshalResult<u64> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| MarshalError::UnexpectedLength {
            expected: 8,
            actual: bytes.len(),
        })?;
        Ok(u64::from_be_bytes(arr))
    }
}

/// Encodes `u32` as 4 big-endian bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Marshaller;

impl Marshaller<u32> for U32Marshaller {
    fn marshal(&self, value: &u32) -> MarshalResult<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn unmarshal(&self, bytes: &[u8]) -> MarshalResult<u32> {
        let arr: [u8; 4] = bytes.try_into().map_err(|_| MarshalError::UnexpectedLength {
            expected: 4,
            actual: bytes.len(),
        })?;
        Ok(u32::from_be_bytes(arr))
    }
}

/// Encodes strings as raw UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringMarshaller;

impl Marshaller<String> for StringMarshaller {
    fn marshal(&self, value: &String) -> MarshalResult<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn unmarshal(&self, bytes: &[u8]) -> MarshalResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|_| MarshalError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn u64_wrong_length() {
        let result = U64Marshaller.unmarshal(&[1, 2, 3]);
        assert_eq!(
            result,
            Err(MarshalError::UnexpectedLength {
                expected: 8,
                actual: 3
            })
        );
    }

    #[test]
    fn u32_wrong_length() {
        assert!(U32Marshaller.unmarshal(&[0; 5]).is_err());
    }

    #[test]
    fn invalid_utf8_rejected() {
        let result = StringMarshaller.unmarshal(&[0xC3, 0x28]);
        assert_eq!(result, Err(MarshalError::InvalidUtf8));
    }

    #[test]
    fn bytes_passthrough() {
        let data = vec![0, 1, 2, 254, 255];
        assert_eq!(BytesMarshaller.marshal(&data).unwrap(), data);
        assert_eq!(BytesMarshaller.unmarshal(&data).unwrap(), data);
    }

    proptest! {
        #[test]
        fn u64_byte_order_matches_numeric_order(a in any::<u64>(), b in any::<u64>()) {
            let ea = U64Marshaller.marshal(&a).unwrap();
            let eb = U64Marshaller.marshal(&b).unwrap();
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn string_roundtrip(s in ".*") {
            let bytes = StringMarshaller.marshal(&s).unwrap();
            prop_assert_eq!(StringMarshaller.unmarshal(&bytes).unwrap(), s);
        }
    }
}
