//! Parsing of the multipart chunk upload form.

use axum::body::Bytes;
use axum::extract::Multipart;
use tessera_protocol::ContentHash;
use tessera_protocol::constants::fields;
use tessera_registry::ChunkMeta;

use crate::ApiError;

/// A fully parsed chunk upload.
#[derive(Debug)]
pub struct ChunkForm {
    pub hash: ContentHash,
    pub index: u32,
    pub data: Bytes,
    pub meta: ChunkMeta,
    pub checksum: Option<String>,
}

#[derive(Default)]
struct RawForm {
    hash: Option<String>,
    index: Option<String>,
    data: Option<Bytes>,
    filename: Option<String>,
    size: Option<String>,
    total_chunks: Option<String>,
    mime_type: Option<String>,
    checksum: Option<String>,
}

/// Reads every field of the form. Unknown fields are ignored.
pub async fn read_chunk_form(mut multipart: Multipart) -> Result<ChunkForm, ApiError> {
    let mut raw = RawForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_params(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == fields::CHUNK {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::invalid_params(e.body_text()))?;
            raw.data = Some(bytes);
            continue;
        }

        let slot = match name.as_str() {
            fields::HASH => &mut raw.hash,
            fields::CHUNK_INDEX => &mut raw.index,
            fields::FILENAME => &mut raw.filename,
            fields::SIZE => &mut raw.size,
            fields::TOTAL_CHUNKS => &mut raw.total_chunks,
            fields::MIME_TYPE => &mut raw.mime_type,
            fields::CHECKSUM => &mut raw.checksum,
            _ => continue,
        };
        let text = field
            .text()
            .await
            .map_err(|e| ApiError::invalid_params(e.body_text()))?;
        *slot = Some(text);
    }

    raw.into_form()
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::invalid_params(format!("missing field {name}"))),
    }
}

fn number<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<T, ApiError> {
    required(value, name)?
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_params(format!("{name} must be a non-negative integer")))
}

impl RawForm {
    fn into_form(self) -> Result<ChunkForm, ApiError> {
        let hash = ContentHash::parse(&required(self.hash, fields::HASH)?)?;
        let index = number(self.index, fields::CHUNK_INDEX)?;
        let data = self
            .data
            .ok_or_else(|| ApiError::invalid_params("missing field chunk"))?;
        let meta = ChunkMeta {
            filename: required(self.filename, fields::FILENAME)?,
            size: number(self.size, fields::SIZE)?,
            total_chunks: number(self.total_chunks, fields::TOTAL_CHUNKS)?,
            mime_type: self.mime_type.filter(|m| !m.trim().is_empty()),
        };
        meta.validate()?;
        meta.check_index(index)?;
        if data.is_empty() {
            return Err(ApiError::invalid_params("chunk is empty"));
        }
        Ok(ChunkForm {
            hash,
            index,
            data,
            meta,
            checksum: self.checksum.filter(|c| !c.trim().is_empty()),
        })
    }
}
