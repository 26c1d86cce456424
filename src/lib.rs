//! `ext-line-sort` is an external sort of newline-delimited byte records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM, during the second pass it merges the sorted chunks
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Byte-wise ordering:**
//!   records are opaque byte sequences terminated by a newline. No encoding is assumed and records are compared
//!   byte by byte, the delimiter excluded. Duplicates are preserved.
//! * **Bounded memory:**
//!   at most a fixed number of records (1,000,000 by default) is buffered at a time. Memory limited buffering
//!   is available too (`memory-limit` feature required).
//! * **Compressed spills:**
//!   sorted chunks are written as gzip segments into a temporary directory owned by a single sort call.
//! * **Guaranteed cleanup:**
//!   segments and their directory are removed when the sort call returns, whether it succeeds or fails.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use log;
//!
//! use ext_line_sort::{ExternalSorter, ExternalSorterBuilder, LimitedBufferBuilder};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!     let output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_buffer(LimitedBufferBuilder::new(100_000, false))
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter.sort(input_reader, output_writer).unwrap();
//!     log::info!("{} records sorted", stats.records);
//! }
//! ```

pub mod buffer;
pub mod merger;
pub mod record;
pub mod scratch;
pub mod segment;
pub mod sort;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, LimitedBuffer, LimitedBufferBuilder, DEFAULT_CHUNK_THRESHOLD};
pub use merger::BinaryHeapMerger;
pub use record::{RecordReader, DELIMITER};
pub use scratch::ScratchDir;
pub use segment::{ExternalSegment, GzSegment, SegmentOptions};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats, SortedStream};
