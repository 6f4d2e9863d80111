//! Output sink selection (§4.7, §4.7b, C7): a shared `OutputSink` trait plus
//! the three concrete writers picked by output-path suffix.
//!
//! Each writer is a `Write`-wrapping struct with an explicit `finish()`
//! callers must invoke after the last write, with `Drop` as a best-effort
//! fallback. The `.zip` sink's `open_new_component` stands in for an
//! abstract "ostream with an extension" collaborator.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FilterError, FilterResult};

/// Shared behavior for the three concrete output writers. Non-archive sinks
/// get a default `open_new_component` that errors — only the zip sink
/// actually supports components (chunking).
pub trait OutputSink: Send {
    fn write_entry(&mut self, bytes: &[u8]) -> FilterResult<()>;

    fn open_new_component(&mut self, _name: &str) -> FilterResult<()> {
        Err(FilterError::configuration("this output sink does not support chunked components"))
    }

    fn finish(&mut self) -> FilterResult<()>;
}

/// Picks a sink implementation from the output path's suffix: `.gz` ->
/// streaming gzip, `.zip` -> chunked archive, anything else -> a plain file.
pub fn open_sink(path: &Path) -> FilterResult<Box<dyn OutputSink>> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "gz" => Ok(Box::new(GzipSink::create(path)?)),
        "zip" => Ok(Box::new(ArchiveSink::create(path)?)),
        _ => Ok(Box::new(PlainSink::create(path)?)),
    }
}

fn stream_err(path: &Path, e: io::Error) -> FilterError {
    FilterError::stream(format!("{}: {e}", path.display()))
}

/// Buffered plain-file sink — the unconditional default when the output
/// path carries no recognized suffix.
pub struct PlainSink {
    writer: BufWriter<File>,
    finished: bool,
}

impl PlainSink {
    pub fn create(path: &Path) -> FilterResult<Self> {
        let file = File::create(path).map_err(|e| stream_err(path, e))?;
        Ok(PlainSink { writer: BufWriter::new(file), finished: false })
    }
}

impl OutputSink for PlainSink {
    fn write_entry(&mut self, bytes: &[u8]) -> FilterResult<()> {
        self.writer.write_all(bytes).map_err(|e| FilterError::stream(e.to_string()))
    }

    fn finish(&mut self) -> FilterResult<()> {
        self.writer.flush().map_err(|e| FilterError::stream(e.to_string()))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for PlainSink {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.writer.flush();
        }
    }
}

/// Streaming gzip sink: stream-only, no component support, matching §4.7's
/// restriction for `.gz` outputs.
pub struct GzipSink {
    encoder: Option<GzEncoder<BufWriter<File>>>,
    finished: bool,
}

impl GzipSink {
    pub fn create(path: &Path) -> FilterResult<Self> {
        let file = File::create(path).map_err(|e| stream_err(path, e))?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Ok(GzipSink { encoder: Some(encoder), finished: false })
    }
}

impl OutputSink for GzipSink {
    fn write_entry(&mut self, bytes: &[u8]) -> FilterResult<()> {
        self.encoder
            .as_mut()
            .expect("write after finish")
            .write_all(bytes)
            .map_err(|e| FilterError::stream(e.to_string()))
    }

    fn finish(&mut self) -> FilterResult<()> {
        if let Some(mut enc) = self.encoder.take() {
            enc.try_finish().map_err(|e| FilterError::stream(e.to_string()))?;
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for GzipSink {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(mut enc) = self.encoder.take() {
                let _ = enc.try_finish();
            }
        }
    }
}

/// Chunked archive sink: each chunk is a separately named, uncompressed
/// (`Stored`) zip entry — the archive exists to hold independently
/// seekable chunks, not to compress them (§4.7b).
pub struct ArchiveSink {
    writer: ZipWriter<BufWriter<File>>,
    component_open: bool,
    finished: bool,
}

impl ArchiveSink {
    pub fn create(path: &Path) -> FilterResult<Self> {
        let file = File::create(path).map_err(|e| stream_err(path, e))?;
        Ok(ArchiveSink { writer: ZipWriter::new(BufWriter::new(file)), component_open: false, finished: false })
    }
}

impl OutputSink for ArchiveSink {
    fn write_entry(&mut self, bytes: &[u8]) -> FilterResult<()> {
        if !self.component_open {
            return Err(FilterError::configuration("write before the first archive component was opened"));
        }
        self.writer.write_all(bytes).map_err(|e| FilterError::stream(e.to_string()))
    }

    fn open_new_component(&mut self, name: &str) -> FilterResult<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        self.writer
            .start_file(name, options)
            .map_err(|e| FilterError::stream(e.to_string()))?;
        self.component_open = true;
        Ok(())
    }

    fn finish(&mut self) -> FilterResult<()> {
        self.writer.finish().map_err(|e| FilterError::stream(e.to_string()))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for ArchiveSink {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.writer.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tempfile::tempdir;

    #[test]
    fn plain_sink_writes_bytes_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.trace");
        {
            let mut sink = PlainSink::create(&path).unwrap();
            sink.write_entry(b"hello").unwrap();
            sink.finish().unwrap();
        }
        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hello");
    }

    #[test]
    fn gzip_sink_produces_gzip_magic_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.trace.gz");
        {
            let mut sink = GzipSink::create(&path).unwrap();
            sink.write_entry(b"hello").unwrap();
            sink.finish().unwrap();
        }
        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(&contents[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn archive_sink_requires_component_before_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.zip");
        let mut sink = ArchiveSink::create(&path).unwrap();
        assert!(sink.write_entry(b"x").is_err());
        sink.open_new_component("drmemtrace.chunk.0000").unwrap();
        sink.write_entry(b"x").unwrap();
        sink.finish().unwrap();
    }

    #[test]
    fn open_sink_picks_by_suffix() {
        let dir = tempdir().unwrap();
        assert!(open_sink(&dir.path().join("a.gz")).is_ok());
        assert!(open_sink(&dir.path().join("a.zip")).is_ok());
        assert!(open_sink(&dir.path().join("a.trace")).is_ok());
    }
}
