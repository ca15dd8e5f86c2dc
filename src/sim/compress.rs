//! Payload compression for the data channel.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::streaming::Encoding;

/// Compress `data` with `encoding` at `level`. Levels outside the encoding's
/// range are clamped.
pub fn compress(encoding: Encoding, level: i32, data: &[u8]) -> Result<Vec<u8>> {
    let range = encoding.level_range();
    let level = level.clamp(*range.start(), *range.end());

    match encoding {
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(
                Vec::with_capacity(data.len() / 2 + 32),
                Compression::new(level as u32),
            );
            encoder.write_all(data).map_err(Error::Compression)?;
            encoder.finish().map_err(Error::Compression)
        }
        Encoding::Zstd => zstd::bulk::compress(data, level).map_err(Error::Compression),
    }
}

/// Inverse of [`compress`], as a browser would apply `Content-Encoding`.
pub fn decompress(encoding: Encoding, data: &[u8]) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(Error::Compression)?;
            Ok(out)
        }
        Encoding::Zstd => zstd::stream::decode_all(data).map_err(Error::Compression),
    }
}
