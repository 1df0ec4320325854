//! Snappy-framed protobuf codec for remote-write payloads.
//!
//! Remote-write bodies use the snappy *block* format (not the streaming
//! frame format) around a protobuf-encoded [`WriteRequest`].
//!
//! Decoding keeps only the fields modeled in [`crate::models`]. Fields from
//! newer protocol revisions are dropped, so a request re-encoded by
//! [`encode`] no longer carries them.

use bytes::Bytes;
use prost::Message;

use crate::{
    error::{CodecError, Result},
    models::WriteRequest,
};

/// Largest decompressed payload accepted by [`decode`].
pub const MAX_DECOMPRESSED_BYTES: usize = 64 * 1024 * 1024;

/// Decodes a compressed request body.
///
/// # Errors
///
/// Returns [`CodecError::Decompress`] for an invalid snappy block,
/// [`CodecError::TooLarge`] when the announced size exceeds
/// [`MAX_DECOMPRESSED_BYTES`], and [`CodecError::Malformed`] when the
/// decompressed bytes are not a valid write request.
pub fn decode(compressed: &[u8]) -> Result<WriteRequest> {
    let size_bytes = snap::raw::decompress_len(compressed).map_err(CodecError::Decompress)?;
    if size_bytes > MAX_DECOMPRESSED_BYTES {
        return Err(CodecError::TooLarge { size_bytes, limit_bytes: MAX_DECOMPRESSED_BYTES });
    }

    let raw = snap::raw::Decoder::new().decompress_vec(compressed).map_err(CodecError::Decompress)?;

    WriteRequest::decode(raw.as_slice()).map_err(CodecError::Malformed)
}

/// Encodes a request into a compressed body.
///
/// Output is deterministic for a given request.
///
/// # Errors
///
/// Returns [`CodecError::Compress`] if snappy rejects the serialized input.
pub fn encode(request: &WriteRequest) -> Result<Bytes> {
    let raw = request.encode_to_vec();
    let compressed = snap::raw::Encoder::new().compress_vec(&raw).map_err(CodecError::Compress)?;
    Ok(Bytes::from(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Label, Sample, TimeSeries};

    fn sample_request() -> WriteRequest {
        WriteRequest {
            timeseries: vec![TimeSeries {
                labels: vec![Label::new("test", "test")],
                samples: vec![Sample::new(1.0, 1)],
                ..Default::default()
            }],
            metadata: vec![],
        }
    }

    #[test]
    fn encoded_body_is_snappy_block_of_protobuf() {
        let request = sample_request();
        let body = encode(&request).unwrap();

        let raw = snap::raw::Decoder::new().decompress_vec(&body).unwrap();
        let decoded = WriteRequest::decode(raw.as_slice()).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn decode_restores_encoded_request() {
        let request = sample_request();
        let decoded = decode(&encode(&request).unwrap()).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn encode_is_deterministic() {
        let request = sample_request();
        assert_eq!(encode(&request).unwrap(), encode(&request).unwrap());
    }

    #[test]
    fn empty_body_is_rejected() {
        let err = decode(&[]).unwrap_err();
        assert!(matches!(err, CodecError::Decompress(_)));
    }

    #[test]
    fn uncompressed_protobuf_is_rejected() {
        let raw = sample_request().encode_to_vec();
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn doubled_body_is_rejected() {
        let body = encode(&sample_request()).unwrap();
        let doubled = [body.as_ref(), body.as_ref()].concat();

        assert!(decode(&doubled).is_err());
    }

    #[test]
    fn valid_snappy_with_garbage_protobuf_is_malformed() {
        let body = snap::raw::Encoder::new().compress_vec(&[0xff, 0xff, 0xff, 0xff]).unwrap();
        let err = decode(&body).unwrap_err();

        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn unknown_fields_do_not_survive_reencoding() {
        let request = sample_request();
        let mut raw = request.encode_to_vec();
        // Field 15, wire type varint, value 1.
        raw.extend_from_slice(&[0x78, 0x01]);
        let body = snap::raw::Encoder::new().compress_vec(&raw).unwrap();

        let decoded = decode(&body).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(encode(&decoded).unwrap(), encode(&request).unwrap());
    }

    #[test]
    fn oversized_announcement_is_rejected_before_decompressing() {
        // Varint header announcing 128 MiB followed by no data.
        let mut body = Vec::new();
        let mut len = 128 * 1024 * 1024_u64;
        while len >= 0x80 {
            body.push((len as u8) | 0x80);
            len >>= 7;
        }
        body.push(len as u8);

        let err = decode(&body).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { size_bytes, .. } if size_bytes == 128 * 1024 * 1024));
    }
}
