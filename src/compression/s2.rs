//! S2 framing-format reader
//!
//! S2 extends Snappy's block format with repeat-offset copies and larger
//! blocks, and keeps Snappy's framing. The reader accepts streams that start
//! with either the S2 or the Snappy stream identifier.
//!
//! Chunk layout: 1 byte type, 3 bytes little-endian length, body.
//! Data chunks start with a masked CRC-32C of the uncompressed bytes.

use std::cmp;
use std::io::{self, Read};

const CHUNK_HEADER_LEN: usize = 4;
const CHECKSUM_LEN: usize = 4;

const CHUNK_COMPRESSED: u8 = 0x00;
const CHUNK_UNCOMPRESSED: u8 = 0x01;
const CHUNK_PADDING: u8 = 0xfe;
const CHUNK_STREAM_ID: u8 = 0xff;

const S2_MAGIC: &[u8] = b"S2sTwO";
const SNAPPY_MAGIC: &[u8] = b"sNaPpY";

/// Largest uncompressed block an S2 writer emits
pub const MAX_BLOCK_SIZE: usize = 4 << 20;

const TAG_LITERAL: u8 = 0x00;
const TAG_COPY1: u8 = 0x01;
const TAG_COPY2: u8 = 0x02;
const TAG_COPY4: u8 = 0x03;

/// Streaming S2 (and Snappy-framed) decoder
pub struct S2Reader<R> {
    inner: R,
    block: Vec<u8>,
    pos: usize,
    chunk: Vec<u8>,
    seen_stream_id: bool,
}

impl<R: Read> S2Reader<R> {
    /// Wrap `inner`; nothing is read until the first `read` call
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            block: Vec::new(),
            pos: 0,
            chunk: Vec::new(),
            seen_stream_id: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Decode the next data chunk into `self.block`. Returns false at a clean
    /// end of stream.
    fn next_block(&mut self) -> io::Result<bool> {
        loop {
            let mut header = [0u8; CHUNK_HEADER_LEN];
            match read_full(&mut self.inner, &mut header)? {
                0 => return Ok(false),
                CHUNK_HEADER_LEN => {}
                n => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("s2: truncated chunk header ({} of {} bytes)", n, CHUNK_HEADER_LEN),
                    ))
                }
            }

            let chunk_type = header[0];
            let len = usize::from(header[1]) | usize::from(header[2]) << 8 | usize::from(header[3]) << 16;

            if chunk_type != CHUNK_STREAM_ID && !self.seen_stream_id {
                return Err(corrupt(format!(
                    "stream does not start with an identifier (chunk type 0x{:02x})",
                    chunk_type
                )));
            }

            self.chunk.resize(len, 0);
            self.inner.read_exact(&mut self.chunk).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "s2: truncated chunk body")
                } else {
                    e
                }
            })?;

            match chunk_type {
                CHUNK_STREAM_ID => {
                    if self.chunk != S2_MAGIC && self.chunk != SNAPPY_MAGIC {
                        return Err(corrupt("unknown stream identifier"));
                    }
                    self.seen_stream_id = true;
                }
                CHUNK_COMPRESSED => {
                    let (checksum, body) = split_checksum(&self.chunk)?;
                    self.block.clear();
                    decode_block(body, &mut self.block)?;
                    verify_checksum(checksum, &self.block)?;
                    self.pos = 0;
                    return Ok(true);
                }
                CHUNK_UNCOMPRESSED => {
                    let (checksum, body) = split_checksum(&self.chunk)?;
                    if body.len() > MAX_BLOCK_SIZE {
                        return Err(corrupt(format!("uncompressed chunk of {} bytes", body.len())));
                    }
                    verify_checksum(checksum, body)?;
                    self.block.clear();
                    self.block.extend_from_slice(body);
                    self.pos = 0;
                    return Ok(true);
                }
                // Padding, index and other skippable chunks
                CHUNK_PADDING | 0x80..=0xfd => {}
                reserved => {
                    return Err(corrupt(format!("unsupported chunk type 0x{:02x}", reserved)));
                }
            }
        }
    }
}

impl<R: Read> Read for S2Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.block.len() {
            if !self.next_block()? {
                return Ok(0);
            }
        }
        let n = cmp::min(buf.len(), self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn corrupt<S: Into<String>>(message: S) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("s2: corrupt input: {}", message.into()))
}

/// Fill `buf` unless the stream ends first; returns the number of bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn split_checksum(chunk: &[u8]) -> io::Result<(u32, &[u8])> {
    if chunk.len() < CHECKSUM_LEN {
        return Err(corrupt("data chunk shorter than its checksum"));
    }
    let (checksum, body) = chunk.split_at(CHECKSUM_LEN);
    Ok((u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]), body))
}

fn verify_checksum(expected: u32, data: &[u8]) -> io::Result<()> {
    let actual = masked_crc(data);
    if actual != expected {
        return Err(corrupt(format!(
            "checksum mismatch: expected 0x{:08x}, got 0x{:08x}",
            expected, actual
        )));
    }
    Ok(())
}

/// CRC-32C rotated and offset as the framing format requires
pub(crate) fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    (crc.rotate_right(15)).wrapping_add(0xa282_ead8)
}

/// Uvarint-encoded decoded length at the start of a block
fn decoded_len(src: &[u8]) -> io::Result<(usize, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in src.iter().enumerate().take(5) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            if value > u64::from(u32::MAX) {
                return Err(corrupt("block length overflows"));
            }
            return Ok((value as usize, i + 1));
        }
    }
    Err(corrupt("bad block length varint"))
}

/// Little-endian integer of `src[..n]`
fn le(src: &[u8], n: usize) -> usize {
    src[..n]
        .iter()
        .rev()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
}

/// Decode one S2 block. Snappy blocks are a subset and decode unchanged.
fn decode_block(src: &[u8], dst: &mut Vec<u8>) -> io::Result<()> {
    let (dlen, mut s) = decoded_len(src)?;
    if dlen > MAX_BLOCK_SIZE {
        return Err(corrupt(format!("block of {} bytes exceeds the maximum", dlen)));
    }
    dst.reserve(dlen);

    let mut offset = 0usize;
    while s < src.len() {
        let tag = src[s];
        let (length, copy_offset) = match tag & 0x03 {
            TAG_LITERAL => {
                let x = usize::from(tag >> 2);
                let (len, header) = match x {
                    0..=59 => (x + 1, 1),
                    _ => {
                        let extra = x - 59;
                        if s + 1 + extra > src.len() {
                            return Err(corrupt("truncated literal length"));
                        }
                        (le(&src[s + 1..], extra) + 1, 1 + extra)
                    }
                };
                s += header;
                if len > src.len() - s || len > dlen - dst.len() {
                    return Err(corrupt("literal overruns block"));
                }
                dst.extend_from_slice(&src[s..s + len]);
                s += len;
                continue;
            }
            TAG_COPY1 => {
                if s + 2 > src.len() {
                    return Err(corrupt("truncated copy"));
                }
                let mut length = usize::from(tag >> 2) & 0x07;
                let toffset = (usize::from(tag) & 0xe0) << 3 | usize::from(src[s + 1]);
                s += 2;
                if toffset == 0 {
                    // Repeat the previous offset; lengths 5-7 carry extra bytes
                    let (extra, base) = match length {
                        5 => (1, 4),
                        6 => (2, 1 << 8),
                        7 => (3, 1 << 16),
                        _ => (0, length),
                    };
                    if s + extra > src.len() {
                        return Err(corrupt("truncated repeat length"));
                    }
                    if extra > 0 {
                        length = le(&src[s..], extra) + base;
                        s += extra;
                    } else {
                        length = base;
                    }
                    (length + 4, offset)
                } else {
                    (length + 4, toffset)
                }
            }
            TAG_COPY2 => {
                if s + 3 > src.len() {
                    return Err(corrupt("truncated copy"));
                }
                let copy = (usize::from(tag >> 2) + 1, le(&src[s + 1..], 2));
                s += 3;
                copy
            }
            _ => {
                debug_assert_eq!(tag & 0x03, TAG_COPY4);
                if s + 5 > src.len() {
                    return Err(corrupt("truncated copy"));
                }
                let copy = (usize::from(tag >> 2) + 1, le(&src[s + 1..], 4));
                s += 5;
                copy
            }
        };

        offset = copy_offset;
        let d = dst.len();
        if offset == 0 || offset > d || length > dlen - d {
            return Err(corrupt(format!("copy offset {} length {} at {}", offset, length, d)));
        }
        // Overlapping copies repeat the pattern, so copy byte by byte
        for i in 0..length {
            let b = dst[d - offset + i];
            dst.push(b);
        }
    }

    if dst.len() != dlen {
        return Err(corrupt(format!("decoded {} bytes, header says {}", dst.len(), dlen)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const EXPECTED: &[u8] = b"abcdabcdabcdXYcdXYcdXYcdXYcd";

    /// Block using a plain copy, a short repeat and a long repeat
    fn s2_block() -> Vec<u8> {
        vec![
            EXPECTED.len() as u8,
            0x0c, b'a', b'b', b'c', b'd', // literal "abcd"
            0x11, 0x04, // copy offset 4, length 8
            0x04, b'X', b'Y', // literal "XY"
            0x01, 0x00, // repeat offset 4, length 4
            0x15, 0x00, 0x02, // repeat offset 4, length 2 + 4 + 4
        ]
    }

    fn chunk(chunk_type: u8, body: &[u8]) -> Vec<u8> {
        let len = body.len();
        let mut out = vec![chunk_type, len as u8, (len >> 8) as u8, (len >> 16) as u8];
        out.extend_from_slice(body);
        out
    }

    fn data_chunk(chunk_type: u8, uncompressed: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut body = masked_crc(uncompressed).to_le_bytes().to_vec();
        body.extend_from_slice(payload);
        chunk(chunk_type, &body)
    }

    fn s2_stream() -> Vec<u8> {
        let mut stream = chunk(CHUNK_STREAM_ID, S2_MAGIC);
        stream.extend(data_chunk(CHUNK_COMPRESSED, EXPECTED, &s2_block()));
        stream
    }

    fn read_all(stream: Vec<u8>) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        S2Reader::new(Cursor::new(stream)).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_decode_block_with_repeats() {
        let mut out = Vec::new();
        decode_block(&s2_block(), &mut out).unwrap();
        assert_eq!(out, EXPECTED);
    }

    #[test]
    fn test_read_s2_stream() {
        assert_eq!(read_all(s2_stream()).unwrap(), EXPECTED);
    }

    #[test]
    fn test_uncompressed_padding_and_skippable_chunks() {
        let mut stream = chunk(CHUNK_STREAM_ID, S2_MAGIC);
        stream.extend(data_chunk(CHUNK_UNCOMPRESSED, b"hello ", b"hello "));
        stream.extend(chunk(CHUNK_PADDING, &[0; 8]));
        stream.extend(chunk(0x99, b"index"));
        stream.extend(data_chunk(CHUNK_COMPRESSED, EXPECTED, &s2_block()));

        let mut expected = b"hello ".to_vec();
        expected.extend_from_slice(EXPECTED);
        assert_eq!(read_all(stream).unwrap(), expected);
    }

    #[test]
    fn test_snappy_framed_input() {
        let data = b"snappy framed data is valid s2 input ".repeat(500);
        let mut encoder = snap::write::FrameEncoder::new(Vec::new());
        encoder.write_all(&data).unwrap();
        let stream = encoder.into_inner().unwrap();
        assert_eq!(read_all(stream).unwrap(), data);
    }

    #[test]
    fn test_empty_stream() {
        assert_eq!(read_all(Vec::new()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut stream = s2_stream();
        let crc_at = CHUNK_HEADER_LEN + S2_MAGIC.len() + CHUNK_HEADER_LEN;
        stream[crc_at] ^= 0xff;
        let err = read_all(stream).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_truncated_stream() {
        let mut stream = s2_stream();
        stream.truncate(stream.len() - 3);
        assert_eq!(read_all(stream).unwrap_err().kind(), io::ErrorKind::UnexpectedEof);

        let mut stream = s2_stream();
        stream.extend_from_slice(&[CHUNK_COMPRESSED, 0x10]);
        assert_eq!(read_all(stream).unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_missing_stream_identifier() {
        let stream = data_chunk(CHUNK_UNCOMPRESSED, b"abc", b"abc");
        assert_eq!(read_all(stream).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_reserved_chunk_type() {
        let mut stream = chunk(CHUNK_STREAM_ID, SNAPPY_MAGIC);
        stream.extend(chunk(0x02, b"??"));
        assert!(read_all(stream).is_err());
    }

    #[test]
    fn test_repeat_without_previous_offset() {
        let block = [0x04, 0x01, 0x00];
        let mut out = Vec::new();
        assert!(decode_block(&block, &mut out).is_err());
    }

    #[test]
    fn test_copy_before_start_of_block() {
        // literal "ab" then copy offset 3
        let block = [0x06, 0x04, b'a', b'b', 0x01, 0x03];
        let mut out = Vec::new();
        assert!(decode_block(&block, &mut out).is_err());
    }
}
