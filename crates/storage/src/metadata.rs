//! Best-effort artifact metadata.
//!
//! Image dimensions are read straight from the container header (PNG, GIF,
//! BMP, JPEG) without decoding pixel data. Anything unrecognised yields
//! `Ok(None)`; a recognised but malformed header is an error the caller is
//! expected to log and ignore.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Pixel dimensions of an image artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed {format} header")]
    Malformed { format: &'static str },
}

/// Extracts optional metadata from a finished artifact.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Option<Dimensions>, MetadataError>;
}

/// Header sniffer for common image formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageHeaderExtractor;

impl MetadataExtractor for ImageHeaderExtractor {
    fn extract(&self, path: &Path) -> Result<Option<Dimensions>, MetadataError> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut head = [0u8; 26];
        let n = read_up_to(&mut reader, &mut head)?;
        let head = &head[..n];

        if head.starts_with(b"\x89PNG\r\n\x1a\n") {
            return png(head).map(Some);
        }
        if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
            return gif(head).map(Some);
        }
        if head.starts_with(b"BM") {
            return bmp(head).map(Some);
        }
        if head.starts_with(&[0xFF, 0xD8]) {
            reader.seek(SeekFrom::Start(2))?;
            return jpeg(&mut reader).map(Some);
        }
        Ok(None)
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn png(head: &[u8]) -> Result<Dimensions, MetadataError> {
    // Signature (8) + IHDR length (4) + "IHDR" (4) + width (4) + height (4).
    if head.len() < 24 || &head[12..16] != b"IHDR" {
        return Err(MetadataError::Malformed { format: "PNG" });
    }
    Ok(Dimensions {
        width: be_u32(&head[16..20]),
        height: be_u32(&head[20..24]),
    })
}

fn gif(head: &[u8]) -> Result<Dimensions, MetadataError> {
    if head.len() < 10 {
        return Err(MetadataError::Malformed { format: "GIF" });
    }
    Ok(Dimensions {
        width: u32::from(u16::from_le_bytes([head[6], head[7]])),
        height: u32::from(u16::from_le_bytes([head[8], head[9]])),
    })
}

fn bmp(head: &[u8]) -> Result<Dimensions, MetadataError> {
    if head.len() < 26 {
        return Err(MetadataError::Malformed { format: "BMP" });
    }
    let width = i32::from_le_bytes([head[18], head[19], head[20], head[21]]);
    // Negative height marks a top-down bitmap.
    let height = i32::from_le_bytes([head[22], head[23], head[24], head[25]]);
    Ok(Dimensions {
        width: width.unsigned_abs(),
        height: height.unsigned_abs(),
    })
}

fn jpeg(reader: &mut (impl Read + Seek)) -> Result<Dimensions, MetadataError> {
    let malformed = || MetadataError::Malformed { format: "JPEG" };
    loop {
        let mut marker = [0u8; 2];
        reader.read_exact(&mut marker).map_err(|_| malformed())?;
        if marker[0] != 0xFF {
            return Err(malformed());
        }
        // Fill bytes between segments.
        let mut code = marker[1];
        while code == 0xFF {
            let mut b = [0u8; 1];
            reader.read_exact(&mut b).map_err(|_| malformed())?;
            code = b[0];
        }
        match code {
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => continue,
            0xD9 | 0xDA => return Err(malformed()),
            _ => {}
        }

        let mut len = [0u8; 2];
        reader.read_exact(&mut len).map_err(|_| malformed())?;
        let len = u16::from_be_bytes(len);
        if len < 2 {
            return Err(malformed());
        }

        let is_sof = matches!(code, 0xC0..=0xCF) && !matches!(code, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // precision (1), height (2), width (2)
            let mut sof = [0u8; 5];
            reader.read_exact(&mut sof).map_err(|_| malformed())?;
            return Ok(Dimensions {
                width: u32::from(u16::from_be_bytes([sof[3], sof[4]])),
                height: u32::from(u16::from_be_bytes([sof[1], sof[2]])),
            });
        }
        reader.seek(SeekFrom::Current(i64::from(len) - 2))?;
    }
}
