use ciborium::value::Value;

use crate::error::CodecError;

/// One transmitted unit: an XOR mix of one or more fragments plus the
/// sequence metadata a receiver needs to undo the mixing. Immutable once
/// constructed.
///
/// The wire body is the canonical CBOR encoding of the fixed-order array
/// `[seq_num, seq_count, message_len, checksum, data]` - byte-exact form
/// matters because the enclosing text layer checksums it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Part {
    seq_num: u64,
    seq_count: usize,
    message_len: usize,
    checksum: u32,
    data: Vec<u8>,
}

impl Part {
    pub fn new(
        seq_num: u64,
        seq_count: usize,
        message_len: usize,
        checksum: u32,
        data: Vec<u8>,
    ) -> Part {
        Part {
            seq_num,
            seq_count,
            message_len,
            checksum,
            data,
        }
    }

    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    pub fn seq_count(&self) -> usize {
        self.seq_count
    }

    pub fn message_len(&self) -> usize {
        self.message_len
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        let value = Value::Array(vec![
            Value::Integer(self.seq_num.into()),
            Value::Integer((self.seq_count as u64).into()),
            Value::Integer((self.message_len as u64).into()),
            Value::Integer(self.checksum.into()),
            Value::Bytes(self.data.clone()),
        ]);

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&value, &mut buf).expect("writing CBOR to a Vec cannot fail");
        buf
    }

    pub fn from_cbor(cbor: &[u8]) -> Result<Part, CodecError> {
        let value: Value = ciborium::de::from_reader(cbor)
            .map_err(|e| CodecError::MalformedFrame(format!("invalid CBOR: {e}")))?;

        let items = match value {
            Value::Array(items) if items.len() == 5 => items,
            _ => {
                return Err(CodecError::MalformedFrame(
                    "part body is not a five-element array".to_string(),
                ))
            }
        };

        let seq_num = uint(&items[0], "seq_num")?;
        let seq_count = uint(&items[1], "seq_count")? as usize;
        let message_len = uint(&items[2], "message_len")? as usize;
        let checksum = u32::try_from(uint(&items[3], "checksum")?)
            .map_err(|_| CodecError::MalformedFrame("checksum exceeds 32 bits".to_string()))?;
        let data = match &items[4] {
            Value::Bytes(data) if !data.is_empty() => data.clone(),
            Value::Bytes(_) => {
                return Err(CodecError::MalformedFrame("empty fragment data".to_string()))
            }
            _ => {
                return Err(CodecError::MalformedFrame(
                    "fragment data is not a byte string".to_string(),
                ))
            }
        };

        if seq_num == 0 || seq_count == 0 {
            return Err(CodecError::MalformedFrame(
                "sequence numbering is 1-based".to_string(),
            ));
        }

        Ok(Part {
            seq_num,
            seq_count,
            message_len,
            checksum,
            data,
        })
    }
}

fn uint(value: &Value, field: &str) -> Result<u64, CodecError> {
    match value {
        Value::Integer(i) => u64::try_from(*i)
            .map_err(|_| CodecError::MalformedFrame(format!("{field} is not an unsigned integer"))),
        _ => Err(CodecError::MalformedFrame(format!(
            "{field} is not an integer"
        ))),
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_cbor_golden() {
        // hand-computed canonical encoding:
        //   85              array(5)
        //   0c              12
        //   08              8
        //   18 64           100
        //   1a 12345678     0x12345678
        //   45 0105030305   bytes(5)
        let part = Part::new(12, 8, 100, 0x12345678, vec![1, 5, 3, 3, 5]);
        assert_eq!(
            part.to_cbor(),
            vec![
                0x85, 0x0c, 0x08, 0x18, 0x64, 0x1a, 0x12, 0x34, 0x56, 0x78, 0x45, 0x01, 0x05,
                0x03, 0x03, 0x05
            ]
        );
    }

    #[test]
    fn test_cbor_roundtrip() {
        let part = Part::new(17, 9, 259, 0xdeadbeef, vec![0u8; 29]);
        assert_eq!(Part::from_cbor(&part.to_cbor()).unwrap(), part);
    }

    #[rstest]
    #[case::not_cbor(&[0xff, 0xff, 0xff][..])]
    #[case::not_an_array(&[0x45, 1, 2, 3, 4, 5][..])]
    #[case::wrong_arity(&[0x82, 0x01, 0x02][..])]
    #[case::zero_seq_num(&[0x85, 0x00, 0x01, 0x01, 0x00, 0x41, 0xaa][..])]
    #[case::empty_data(&[0x85, 0x01, 0x01, 0x01, 0x00, 0x40][..])]
    #[case::negative_int(&[0x85, 0x20, 0x01, 0x01, 0x00, 0x41, 0xaa][..])]
    fn test_from_cbor_rejects(#[case] cbor: &[u8]) {
        assert!(matches!(
            Part::from_cbor(cbor),
            Err(CodecError::MalformedFrame(_))
        ));
    }
}
