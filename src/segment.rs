//! Sorted segments stored on the file system.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::record::{write_record, DELIMITER};

/// Default gzip level used for segments. Segments are short-lived so speed is preferred over ratio.
pub const DEFAULT_COMPRESSION: u32 = 1;

/// Segment file read/write parameters.
#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    /// File read/write buffer size. If [`None`] the default [`io::BufWriter`]/[`io::BufReader`] capacity is used.
    pub buf_size: Option<usize>,
    /// Compression level, from 0 (store only) to 9 (best).
    pub compression: u32,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        SegmentOptions {
            buf_size: None,
            compression: DEFAULT_COMPRESSION,
        }
    }
}

impl SegmentOptions {
    fn writer(&self, file: fs::File) -> io::BufWriter<fs::File> {
        match self.buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        }
    }

    fn reader<R: Read>(&self, inner: R) -> io::BufReader<R> {
        match self.buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, inner),
            None => io::BufReader::new(inner),
        }
    }
}

/// External segment interface. Provides methods for persisting a sorted chunk to the file system and reading
/// its records back sequentially.
///
/// A segment is written once and read once. Reading is exposed through [`Iterator`]: each call yields the next
/// record (without the delimiter), and [`None`] signals the end of the segment.
pub trait ExternalSegment: Sized + Iterator<Item = io::Result<Vec<u8>>> {
    /// Segment file extension.
    const EXTENSION: &'static str;

    /// Writes sorted records to a new segment file at `path`.
    fn build(path: &Path, records: impl IntoIterator<Item = Vec<u8>>, options: &SegmentOptions) -> io::Result<()> {
        let file = fs::File::create(path)?;
        let mut segment_writer = options.writer(file);

        Self::dump(&mut segment_writer, records, options)?;

        segment_writer.flush()?;

        return Ok(());
    }

    /// Dumps records to a segment file.
    fn dump(
        segment_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = Vec<u8>>,
        options: &SegmentOptions,
    ) -> io::Result<()>;

    /// Opens a previously built segment for sequential reading.
    fn open(path: &Path, options: &SegmentOptions) -> io::Result<Self>;
}

/// Gzip compressed segment.
/// Records are stored delimiter-terminated inside a single gzip stream.
pub struct GzSegment {
    reader: Option<io::BufReader<GzDecoder<io::BufReader<fs::File>>>>,
}

impl ExternalSegment for GzSegment {
    const EXTENSION: &'static str = "gz";

    fn dump(
        segment_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = Vec<u8>>,
        options: &SegmentOptions,
    ) -> io::Result<()> {
        let mut encoder = GzEncoder::new(segment_writer, Compression::new(options.compression));
        for record in records.into_iter() {
            write_record(&mut encoder, &record)?;
        }
        encoder.finish()?;

        return Ok(());
    }

    fn open(path: &Path, options: &SegmentOptions) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let decoder = GzDecoder::new(options.reader(file));

        return Ok(GzSegment {
            reader: Some(options.reader(decoder)),
        });
    }
}

impl Iterator for GzSegment {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;

        let mut record = Vec::new();
        let result = match reader.read_until(DELIMITER, &mut record) {
            Ok(0) => None,
            Ok(_) if record.last() == Some(&DELIMITER) => {
                record.pop();
                return Some(Ok(record));
            }
            Ok(_) => Some(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment ends with an unterminated record",
            ))),
            Err(err) => Some(Err(err)),
        };

        // exhausted or broken, release the file handle
        self.reader = None;
        result
    }
}
