//! Record framing.
//!
//! A record is an opaque byte sequence terminated by a single [`DELIMITER`] byte. Records are handled without the
//! delimiter so that ordering is a plain byte-wise comparison of their content; the delimiter is appended back
//! when a record is emitted.

use std::io;
use std::io::prelude::*;

use crate::sort::SortError;

/// Record delimiter.
pub const DELIMITER: u8 = b'\n';

/// Splits a buffered byte stream into records.
///
/// Yields record contents with the delimiter stripped. A trailing fragment that is not terminated by the delimiter
/// is reported as [`SortError::MalformedRecord`]. The reader stops after the first error.
pub struct RecordReader<R> {
    reader: R,
    records_read: u64,
    done: bool,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader {
            reader,
            records_read: 0,
            done: false,
        }
    }

    /// Returns the number of complete records read so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut record = Vec::new();
        match self.reader.read_until(DELIMITER, &mut record) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(len) => {
                if record.last() != Some(&DELIMITER) {
                    self.done = true;
                    return Some(Err(SortError::MalformedRecord {
                        record: self.records_read + 1,
                        len,
                    }));
                }
                record.pop();
                self.records_read += 1;
                Some(Ok(record))
            }
            Err(err) => {
                self.done = true;
                Some(Err(SortError::Input(err)))
            }
        }
    }
}

/// Writes record content followed by the delimiter.
pub fn write_record<W: Write + ?Sized>(writer: &mut W, record: &[u8]) -> io::Result<()> {
    writer.write_all(record)?;
    writer.write_all(&[DELIMITER])
}
