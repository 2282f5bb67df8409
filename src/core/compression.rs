// Gzip helpers for export downloads

use crate::core::error::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
