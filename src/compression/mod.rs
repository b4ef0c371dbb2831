//! Decompression of restore streams
//!
//! Backup metadata records which codec each stored file was written with.
//! `decompress` maps that tag to a reader yielding the original bytes:
//! - gzip / pgzip: header validated eagerly, concatenated members decoded as one stream
//! - lz4 (frame format), snappy (framing format), s2 (framing format): lazy, errors surface on read
//! - none or any unrecognized tag: bytes pass through unchanged

pub mod s2;

use crate::error::CompressionError;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::io::{self, Chain, Cursor, Read};
use std::str::FromStr;

pub use s2::S2Reader;

/// Fixed part of a gzip member header (RFC 1952)
const GZIP_HEADER_LEN: usize = 10;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_METHOD_DEFLATE: u8 = 8;
const GZIP_RESERVED_FLAGS: u8 = 0xe0;

/// Compression tag stored in backup metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Pgzip,
    Lz4,
    Snappy,
    S2,
}

impl CompressionType {
    pub const ALL: [CompressionType; 6] = [
        CompressionType::None,
        CompressionType::Gzip,
        CompressionType::Pgzip,
        CompressionType::Lz4,
        CompressionType::Snappy,
        CompressionType::S2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Pgzip => "pgzip",
            CompressionType::Lz4 => "lz4",
            CompressionType::Snappy => "snappy",
            CompressionType::S2 => "s2",
        }
    }

    /// File name suffix backup files written with this codec carry
    pub fn suffix(&self) -> &'static str {
        match self {
            CompressionType::None => "",
            CompressionType::Gzip | CompressionType::Pgzip => ".gz",
            CompressionType::Lz4 => ".lz4",
            CompressionType::Snappy => ".snappy",
            CompressionType::S2 => ".s2",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsing never fails: unrecognized tags mean no compression
impl FromStr for CompressionType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "gzip" => CompressionType::Gzip,
            "pgzip" => CompressionType::Pgzip,
            "lz4" => CompressionType::Lz4,
            "snappy" => CompressionType::Snappy,
            "s2" => CompressionType::S2,
            _ => CompressionType::None,
        })
    }
}

impl From<String> for CompressionType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(codec) => codec,
            Err(never) => match never {},
        }
    }
}

impl From<CompressionType> for String {
    fn from(codec: CompressionType) -> Self {
        codec.as_str().to_string()
    }
}

/// Reader yielding the decompressed bytes of a restore stream.
/// Dropping it releases the wrapped source.
pub struct Decompressor<R: Read> {
    codec: CompressionType,
    decoder: Decoder<R>,
}

enum Decoder<R: Read> {
    Gzip(MultiGzDecoder<Chain<Cursor<Vec<u8>>, R>>),
    Lz4(lz4::Decoder<R>),
    Snappy(snap::read::FrameDecoder<R>),
    S2(S2Reader<R>),
    Plain(R),
}

impl<R: Read> Decompressor<R> {
    /// Codec this reader decodes
    pub fn codec(&self) -> CompressionType {
        self.codec
    }

    /// Borrow the wrapped source
    pub fn get_ref(&self) -> &R {
        match &self.decoder {
            Decoder::Gzip(d) => d.get_ref().get_ref().1,
            Decoder::Lz4(d) => d.reader(),
            Decoder::Snappy(d) => d.get_ref(),
            Decoder::S2(d) => d.get_ref(),
            Decoder::Plain(r) => r,
        }
    }

    /// Release the reader and the source it wraps
    pub fn close(self) {
        tracing::trace!(codec = %self.codec, "closing decoder");
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.decoder {
            Decoder::Gzip(d) => d.read(buf),
            Decoder::Lz4(d) => d.read(buf),
            Decoder::Snappy(d) => d.read(buf),
            Decoder::S2(d) => d.read(buf),
            Decoder::Plain(r) => r.read(buf),
        }
    }
}

impl<R: Read> fmt::Debug for Decompressor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decompressor").field("codec", &self.codec).finish()
    }
}

/// Wrap `source` in a reader that decodes data written with `codec`
pub fn decompress<R: Read>(mut source: R, codec: CompressionType) -> Result<Decompressor<R>, CompressionError> {
    tracing::debug!(codec = %codec, "opening decoder");

    let decoder = match codec {
        CompressionType::Gzip | CompressionType::Pgzip => {
            let header = read_gzip_header(&mut source, codec)?;
            Decoder::Gzip(MultiGzDecoder::new(Cursor::new(header).chain(source)))
        }
        CompressionType::Lz4 => {
            let decoder = lz4::Decoder::new(source).map_err(|e| CompressionError::read(codec, e))?;
            Decoder::Lz4(decoder)
        }
        CompressionType::Snappy => Decoder::Snappy(snap::read::FrameDecoder::new(source)),
        CompressionType::S2 => Decoder::S2(S2Reader::new(source)),
        CompressionType::None => Decoder::Plain(source),
    };

    Ok(Decompressor { codec, decoder })
}

/// Read and check the fixed gzip header. The bytes are handed back so the
/// decoder can be fed the complete stream.
fn read_gzip_header<R: Read>(source: &mut R, codec: CompressionType) -> Result<Vec<u8>, CompressionError> {
    let mut header = vec![0u8; GZIP_HEADER_LEN];
    let mut filled = 0;
    while filled < GZIP_HEADER_LEN {
        match source.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CompressionError::read(codec, e)),
        }
    }

    if filled < GZIP_HEADER_LEN {
        return Err(CompressionError::invalid_header(
            codec,
            format!("stream ended after {} header bytes", filled),
        ));
    }
    if header[..2] != GZIP_MAGIC {
        return Err(CompressionError::invalid_header(
            codec,
            format!("bad magic 0x{:02x}{:02x}", header[0], header[1]),
        ));
    }
    if header[2] != GZIP_METHOD_DEFLATE {
        return Err(CompressionError::invalid_header(
            codec,
            format!("unsupported compression method {}", header[2]),
        ));
    }
    if header[3] & GZIP_RESERVED_FLAGS != 0 {
        return Err(CompressionError::invalid_header(
            codec,
            format!("reserved flag bits set: 0x{:02x}", header[3]),
        ));
    }

    Ok(header)
}
