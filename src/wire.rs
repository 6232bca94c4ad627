//! Binary encoding for the records exchanged over the transport.
//!
//! Each record is written as a four-byte magic tag followed by the record's
//! `bincode` encoding using the standard configuration. The tag lets a
//! consumer reject a message published on the wrong subject before decoding
//! its body, and decoding refuses bodies larger than [`MAX_RECORD_LEN`].

use bincode::{
    Decode,
    Encode,
    config,
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};

/// Length of the magic tag prefixed to every record.
pub const MAGIC_LEN: usize = 4;

/// Upper bound on an encoded record body accepted by [`WireRecord::from_wire`].
pub const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// A record with a stable, tagged binary representation.
///
/// Implementors only choose a [`WireRecord::MAGIC`] tag; the default methods
/// handle framing and `bincode` encoding.
pub trait WireRecord: Encode + Decode<()> + Sized {
    /// Tag written ahead of the encoded body.
    const MAGIC: [u8; MAGIC_LEN];

    /// Serialize the record into a tagged byte vector.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if `bincode` rejects the record.
    fn to_wire(&self) -> Result<Vec<u8>, EncodeError> {
        let body = encode_to_vec(self, config::standard())?;
        let mut buf = Vec::with_capacity(MAGIC_LEN + body.len());
        buf.extend_from_slice(&Self::MAGIC);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a tagged record, rejecting foreign tags and trailing bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the tag is missing or wrong, the body is
    /// truncated or oversized, or bytes remain after the record.
    fn from_wire(bytes: &[u8]) -> Result<Self, DecodeError> {
        let Some((tag, body)) = bytes.split_first_chunk::<MAGIC_LEN>() else {
            return Err(DecodeError::UnexpectedEnd {
                additional: MAGIC_LEN - bytes.len(),
            });
        };
        if *tag != Self::MAGIC {
            return Err(DecodeError::OtherString(format!(
                "unexpected record tag {tag:02x?}, expected {:02x?}",
                Self::MAGIC
            )));
        }

        let (record, consumed) =
            decode_from_slice::<Self, _>(body, config::standard().with_limit::<MAX_RECORD_LEN>())?;
        if consumed != body.len() {
            return Err(DecodeError::OtherString(format!(
                "{} trailing bytes after record",
                body.len() - consumed
            )));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq, Encode, Decode)]
    struct Sample {
        id: u32,
        body: Vec<u8>,
    }

    impl WireRecord for Sample {
        const MAGIC: [u8; MAGIC_LEN] = *b"SMPL";
    }

    #[derive(Debug, PartialEq, Eq, Encode, Decode)]
    struct Other(u32);

    impl WireRecord for Other {
        const MAGIC: [u8; MAGIC_LEN] = *b"OTHR";
    }

    #[test]
    fn encoded_records_start_with_their_tag() {
        let sample = Sample {
            id: 9,
            body: vec![1, 2, 3],
        };
        let encoded = sample.to_wire().expect("encode sample");
        assert_eq!(encoded.get(..MAGIC_LEN), Some(&b"SMPL"[..]));
        assert_eq!(Sample::from_wire(&encoded).expect("decode sample"), sample);
    }

    #[test]
    fn foreign_tag_is_rejected() {
        let encoded = Other(4).to_wire().expect("encode other");
        let err = Sample::from_wire(&encoded).expect_err("tag mismatch must fail");
        match err {
            DecodeError::OtherString(msg) => assert!(msg.contains("unexpected record tag")),
            other => panic!("expected tag mismatch, got {other:?}"),
        }
    }

    #[test]
    fn short_input_reports_unexpected_end() {
        let err = Sample::from_wire(b"PR").expect_err("short input must fail");
        match err {
            DecodeError::UnexpectedEnd { additional } => assert_eq!(additional, 2),
            other => panic!("expected UnexpectedEnd, got {other:?}"),
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut encoded = Other(1).to_wire().expect("encode other");
        encoded.push(0);
        let err = Other::from_wire(&encoded).expect_err("trailing bytes must fail");
        match err {
            DecodeError::OtherString(msg) => assert!(msg.contains("trailing")),
            other => panic!("expected trailing byte error, got {other:?}"),
        }
    }
}
