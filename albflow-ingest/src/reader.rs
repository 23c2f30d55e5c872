//! Line sources: plain UTF-8 files, gzip files, in-memory buffers.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;

use albflow_core::errors::IngestError;
use flate2::read::MultiGzDecoder;

/// Gzip is detected by file name, not content sniffing.
pub fn is_gzip_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".gz") || lower.ends_with(".gzip")
}

/// Open a file as a buffered line reader, decompressing on the fly when
/// the name says gzip.
pub fn open_file(path: &Path) -> Result<Box<dyn BufRead + Send>, IngestError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| IngestError::io(display.clone(), e))?;
    if is_gzip_name(&display) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            file,
        )))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Wrap an in-memory object (e.g. fetched from S3) as a line reader.
pub fn open_buffer(bytes: Vec<u8>, logical_name: &str) -> Box<dyn BufRead + Send> {
    if is_gzip_name(logical_name) {
        Box::new(BufReader::new(MultiGzDecoder::new(Cursor::new(bytes))))
    } else {
        Box::new(BufReader::new(Cursor::new(bytes)))
    }
}

/// On-disk size, for progress estimation; 0 when unknown.
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
