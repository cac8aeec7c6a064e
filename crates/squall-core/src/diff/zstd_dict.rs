//! Modern backend: zstd with the old blob as a prefix dictionary.

use std::io::Write;

use zstd::dict::{DecoderDictionary, EncoderDictionary};

use super::{DiffError, code};

/// Compress `new` using `old` as the dictionary.
pub(super) fn diff(old: &[u8], new: &[u8], level: i32) -> Result<Vec<u8>, DiffError> {
    let codec = |e: std::io::Error| DiffError::diff(code::CODEC, e);

    if old.is_empty() {
        return zstd::encode_all(new, level).map_err(codec);
    }

    let dict = EncoderDictionary::copy(old, level);
    let mut encoder =
        zstd::stream::Encoder::with_prepared_dictionary(Vec::new(), &dict).map_err(codec)?;
    encoder.write_all(new).map_err(codec)?;
    encoder.finish().map_err(codec)
}

/// Decompress `delta` using `old`, the same dictionary used to create it.
pub(super) fn patch(delta: &[u8], old: &[u8]) -> Result<Vec<u8>, DiffError> {
    let codec = |e: std::io::Error| DiffError::patch(code::CODEC, e);

    if old.is_empty() {
        return zstd::decode_all(delta).map_err(codec);
    }

    let dict = DecoderDictionary::copy(old);
    let mut decoder = zstd::stream::Decoder::with_prepared_dictionary(delta, &dict).map_err(codec)?;
    let mut out = Vec::new();
    std::io::copy(&mut decoder, &mut out).map_err(codec)?;
    Ok(out)
}
