//! External sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;

use crate::merger::BinaryHeapMerger;
use crate::record::{write_record, RecordReader, DELIMITER};
use crate::scratch::ScratchDir;
use crate::segment::{ExternalSegment, GzSegment, SegmentOptions};
use crate::{ChunkBuffer, ChunkBufferBuilder, LimitedBufferBuilder};

/// Highest accepted segment compression level.
pub const MAX_COMPRESSION: u32 = 9;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Input data stream error.
    Input(io::Error),
    /// Input ends with a fragment that is not terminated by the delimiter.
    MalformedRecord {
        /// 1-based number of the offending record.
        record: u64,
        /// Length of the unterminated fragment in bytes.
        len: usize,
    },
    /// Record content contains the delimiter.
    DelimiterInRecord {
        /// 1-based number of the offending record.
        record: u64,
    },
    /// Segment file writing error.
    SegmentWrite(io::Error),
    /// Segment file reading error.
    SegmentRead(io::Error),
    /// Output data stream error.
    Output(io::Error),
    /// Sorter configuration is not valid.
    InvalidConfig(String),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err)
            | SortError::Input(err)
            | SortError::SegmentWrite(err)
            | SortError::SegmentRead(err)
            | SortError::Output(err) => Some(err),
            SortError::MalformedRecord { .. } | SortError::DelimiterInRecord { .. } | SortError::InvalidConfig(_) => {
                None
            }
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::Input(err) => write!(f, "input data stream error: {}", err),
            SortError::MalformedRecord { record, len } => write!(
                f,
                "record {} is not terminated by a delimiter ({} trailing bytes)",
                record, len
            ),
            SortError::DelimiterInRecord { record } => write!(f, "record {} contains a delimiter", record),
            SortError::SegmentWrite(err) => write!(f, "segment writing failed: {}", err),
            SortError::SegmentRead(err) => write!(f, "segment reading failed: {}", err),
            SortError::Output(err) => write!(f, "output data stream error: {}", err),
            SortError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

/// Sorting summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortStats {
    /// Number of records written to the output.
    pub records: u64,
    /// Number of segments spilled to disk.
    pub segments: usize,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
pub struct ExternalSorterBuilder<B = LimitedBufferBuilder, S = GzSegment>
where
    B: ChunkBufferBuilder<Vec<u8>>,
    S: ExternalSegment,
{
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Segment file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Segment compression level.
    compression: u32,
    /// Chunk buffer builder.
    buffer_builder: B,

    /// External segment type.
    segment_type: PhantomData<S>,
}

impl<B, S> ExternalSorterBuilder<B, S>
where
    B: ChunkBufferBuilder<Vec<u8>>,
    S: ExternalSegment,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<B, S>, SortError> {
        if self.compression > MAX_COMPRESSION {
            return Err(SortError::InvalidConfig(format!(
                "compression level {} is out of range 0..={}",
                self.compression, MAX_COMPRESSION
            )));
        }

        if self.rw_buf_size == Some(0) {
            return Err(SortError::InvalidConfig("read/write buffer size must be positive".to_string()));
        }

        return Ok(ExternalSorter::new(
            self.tmp_dir.as_deref(),
            self.buffer_builder,
            SegmentOptions {
                buf_size: self.rw_buf_size,
                compression: self.compression,
            },
        ));
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<B, S> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets buffer builder.
    pub fn with_buffer(mut self, buffer_builder: B) -> ExternalSorterBuilder<B, S> {
        self.buffer_builder = buffer_builder;
        return self;
    }

    /// Sets segment read/write buffer size. Must be positive.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<B, S> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets segment compression level (0-9).
    pub fn with_compression(mut self, level: u32) -> ExternalSorterBuilder<B, S> {
        self.compression = level;
        return self;
    }
}

impl<B, S> Default for ExternalSorterBuilder<B, S>
where
    B: ChunkBufferBuilder<Vec<u8>>,
    S: ExternalSegment,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            tmp_dir: None,
            rw_buf_size: None,
            compression: SegmentOptions::default().compression,
            buffer_builder: B::default(),
            segment_type: PhantomData,
        }
    }
}

/// External sorter.
///
/// Every sort call owns a fresh temporary directory which is removed, together with all the segments spilled into
/// it, when the call returns or the returned [`SortedStream`] is dropped.
pub struct ExternalSorter<B = LimitedBufferBuilder, S = GzSegment>
where
    B: ChunkBufferBuilder<Vec<u8>>,
    S: ExternalSegment,
{
    /// Directory temporary directories are created in.
    tmp_root: Option<Box<Path>>,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Segment file parameters.
    segment_options: SegmentOptions,

    /// External segment type.
    segment_type: PhantomData<S>,
}

impl<B, S> ExternalSorter<B, S>
where
    B: ChunkBufferBuilder<Vec<u8>>,
    S: ExternalSegment,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `tmp_root` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `buffer_builder` - An instance of a buffer builder that will be used for chunk buffer creation.
    /// * `segment_options` - Segment files read/write parameters.
    pub fn new(tmp_root: Option<&Path>, buffer_builder: B, segment_options: SegmentOptions) -> Self {
        ExternalSorter {
            tmp_root: tmp_root.map(Into::into),
            buffer_builder,
            segment_options,
            segment_type: PhantomData,
        }
    }

    /// Sorts newline-delimited records read from `input` and writes them to `output`.
    ///
    /// All temporary data is removed before the call returns, whether it succeeds or not.
    ///
    /// # Arguments
    /// * `input` - Input stream records to be fetched from
    /// * `output` - Output stream sorted records to be written to
    pub fn sort<R, W>(&self, input: R, mut output: W) -> Result<SortStats, SortError>
    where
        R: BufRead,
        W: Write,
    {
        let sorted = self.sort_records(RecordReader::new(input))?;
        let segments = sorted.segments();

        let records = sorted.write_to(&mut output)?;
        output.flush().map_err(SortError::Output)?;

        log::info!("sorted {} records using {} segments", records, segments);

        return Ok(SortStats { records, segments });
    }

    /// Sorts records from the input.
    /// Returns an iterator that can be used to get sorted records stream.
    ///
    /// The whole input is consumed and spilled before this method returns. The temporary directory lives as long
    /// as the returned iterator.
    ///
    /// # Arguments
    /// * `input` - Input records (without delimiters) to be fetched from. A record containing the delimiter is
    ///   rejected with [`SortError::DelimiterInRecord`].
    pub fn sort_records<I>(&self, input: I) -> Result<SortedStream<S>, SortError>
    where
        I: IntoIterator<Item = Result<Vec<u8>, SortError>>,
    {
        let mut scratch = ScratchDir::new(self.tmp_root.as_deref()).map_err(SortError::TempDir)?;
        let mut chunk_buf = self.buffer_builder.build();

        for (idx, record) in input.into_iter().enumerate() {
            let record = record?;
            if record.contains(&DELIMITER) {
                return Err(SortError::DelimiterInRecord { record: idx as u64 + 1 });
            }
            chunk_buf.push(record);

            if chunk_buf.is_full() {
                self.create_segment(&mut scratch, chunk_buf)?;
                chunk_buf = self.buffer_builder.build();
            }
        }

        if !chunk_buf.is_empty() {
            self.create_segment(&mut scratch, chunk_buf)?;
        }

        log::debug!("external sort preparation done ({} segments)", scratch.len());

        let mut segments = Vec::with_capacity(scratch.len());
        for path in scratch.segments() {
            segments.push(S::open(path, &self.segment_options).map_err(SortError::SegmentRead)?);
        }

        return Ok(SortedStream {
            merger: BinaryHeapMerger::new(segments),
            scratch,
        });
    }

    fn create_segment(&self, scratch: &mut ScratchDir, mut buffer: B::Buffer) -> Result<(), SortError> {
        log::debug!("sorting chunk data ({} records) ...", buffer.len());
        buffer.as_mut_slice().sort_unstable();

        let path = scratch.register(S::EXTENSION);
        log::debug!("saving chunk data to {}", path.display());

        return S::build(&path, buffer, &self.segment_options).map_err(SortError::SegmentWrite);
    }
}

/// Sorted records stream.
///
/// Owns the segments being merged. Dropping the stream closes the segments and removes the temporary directory.
pub struct SortedStream<S: ExternalSegment> {
    // declared first so segment files are closed before the directory is cleaned up
    merger: BinaryHeapMerger<Vec<u8>, io::Error, S>,
    scratch: ScratchDir,
}

impl<S: ExternalSegment> SortedStream<S> {
    /// Returns the number of segments being merged.
    pub fn segments(&self) -> usize {
        self.scratch.len()
    }

    /// Returns the temporary directory the segments are stored in.
    pub fn tmp_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Writes the remaining records, delimiter-terminated, to `output`.
    /// Returns the number of records written.
    pub fn write_to<W: Write + ?Sized>(self, output: &mut W) -> Result<u64, SortError> {
        let mut count = 0;
        for record in self {
            write_record(output, &record?).map_err(SortError::Output)?;
            count += 1;
        }

        return Ok(count);
    }
}

impl<S: ExternalSegment> Iterator for SortedStream<S> {
    type Item = Result<Vec<u8>, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.merger.next()?.map_err(SortError::SegmentRead))
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, ErrorKind};
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats};
    use crate::segment::{ExternalSegment, GzSegment, SegmentOptions};
    use crate::LimitedBufferBuilder;

    #[fixture]
    fn tmp_root() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn sorter(tmp_root: &Path, threshold: usize) -> ExternalSorter {
        ExternalSorterBuilder::new()
            .with_buffer(LimitedBufferBuilder::new(threshold, true))
            .with_tmp_dir(tmp_root)
            .build()
            .unwrap()
    }

    fn lines(records: &[&str]) -> Vec<u8> {
        records.iter().flat_map(|r| format!("{}\n", r).into_bytes()).collect()
    }

    fn leftovers(tmp_root: &Path) -> usize {
        fs::read_dir(tmp_root).unwrap().count()
    }

    #[rstest]
    #[case(2, &["banana", "apple", "cherry", "date"], &["apple", "banana", "cherry", "date"], 2)]
    #[case(10, &["b", "a", "a"], &["a", "a", "b"], 1)]
    #[case(10, &[], &[], 0)]
    #[case(1, &["c", "b", "a", "b"], &["a", "b", "b", "c"], 4)]
    #[case(3, &["a", "", "ab", "", "a"], &["", "", "a", "a", "ab"], 2)]
    fn test_sort_scenarios(
        tmp_root: tempfile::TempDir,
        #[case] threshold: usize,
        #[case] input: &[&str],
        #[case] expected: &[&str],
        #[case] expected_segments: usize,
    ) {
        let mut output = Vec::new();
        let stats = sorter(tmp_root.path(), threshold)
            .sort(&lines(input)[..], &mut output)
            .unwrap();

        assert_eq!(output, lines(expected));
        assert_eq!(
            stats,
            SortStats {
                records: expected.len() as u64,
                segments: expected_segments
            }
        );
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    fn test_sort_random_bytes(tmp_root: tempfile::TempDir) {
        let mut rng = rand::thread_rng();
        let records: Vec<Vec<u8>> = (0..1000)
            .map(|_| {
                let len = rng.gen_range(0..8);
                // any byte but the delimiter, small alphabet to get duplicates
                (0..len).map(|_| *[0u8, 1, 9, 11, 0x7f, 0x80, 0xff].choose(&mut rng).unwrap()).collect()
            })
            .collect();

        let mut input = Vec::new();
        for record in &records {
            input.extend_from_slice(record);
            input.push(b'\n');
        }

        let mut output = Vec::new();
        let stats = sorter(tmp_root.path(), 64).sort(&input[..], &mut output).unwrap();

        let mut expected_records = records.clone();
        expected_records.sort();
        let mut expected = Vec::new();
        for record in &expected_records {
            expected.extend_from_slice(record);
            expected.push(b'\n');
        }

        assert_eq!(output, expected);
        assert_eq!(stats.records, 1000);
        assert_eq!(stats.segments, 16);
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    fn test_delimiter_not_compared(tmp_root: tempfile::TempDir) {
        // a prefix sorts first even when the longer record continues with a byte below the delimiter
        let input = b"a\x01\na\n".to_vec();

        let mut output = Vec::new();
        sorter(tmp_root.path(), 1).sort(&input[..], &mut output).unwrap();

        assert_eq!(output, b"a\na\x01\n");
    }

    #[rstest]
    fn test_sort_is_idempotent(tmp_root: tempfile::TempDir) {
        let mut input: Vec<String> = (0..100).map(|n| format!("{:03}", n % 37)).collect();
        input.shuffle(&mut rand::thread_rng());
        let input = lines(&input.iter().map(String::as_str).collect::<Vec<_>>());

        let sorter = sorter(tmp_root.path(), 7);

        let mut once = Vec::new();
        sorter.sort(&input[..], &mut once).unwrap();
        let mut twice = Vec::new();
        sorter.sort(&once[..], &mut twice).unwrap();

        assert_eq!(once, twice);
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    #[case(5, 5, 1)]
    #[case(5, 6, 2)]
    #[case(5, 10, 2)]
    #[case(5, 11, 3)]
    fn test_segment_count(
        tmp_root: tempfile::TempDir,
        #[case] threshold: usize,
        #[case] records: usize,
        #[case] expected_segments: usize,
    ) {
        let input = (0..records).map(|n| Ok(format!("{}", n).into_bytes()));

        let sorted = sorter(tmp_root.path(), threshold).sort_records(input).unwrap();
        assert_eq!(sorted.segments(), expected_segments);

        let tmp_dir = sorted.tmp_dir().to_path_buf();
        assert_eq!(fs::read_dir(&tmp_dir).unwrap().count(), expected_segments);
        assert!(tmp_dir.join(format!("{:06}.gz", expected_segments - 1)).exists());

        let restored: Result<Vec<Vec<u8>>, SortError> = sorted.collect();
        assert_eq!(restored.unwrap().len(), records);

        assert!(!tmp_dir.exists());
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    fn test_dropped_stream_cleans_up(tmp_root: tempfile::TempDir) {
        let input = (0..10).rev().map(|n| Ok(vec![b'0' + n]));

        let mut sorted = sorter(tmp_root.path(), 3).sort_records(input).unwrap();
        assert_eq!(sorted.next().unwrap().unwrap(), b"0");
        assert_eq!(sorted.segments(), 4);

        drop(sorted);

        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    fn test_unterminated_input(tmp_root: tempfile::TempDir) {
        let mut output = Vec::new();
        let result = sorter(tmp_root.path(), 2).sort(&b"c\nb\na\nlast"[..], &mut output);

        assert!(matches!(result, Err(SortError::MalformedRecord { record: 4, len: 4 })));
        assert!(output.is_empty());
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    fn test_input_error(tmp_root: tempfile::TempDir) {
        let input = vec![
            Ok(b"b".to_vec()),
            Ok(b"a".to_vec()),
            Ok(b"c".to_vec()),
            Err(SortError::Input(io::Error::new(ErrorKind::Other, "test error"))),
        ];

        let result = sorter(tmp_root.path(), 2).sort_records(input);

        assert!(matches!(result, Err(SortError::Input(_))));
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    struct BrokenOutput;

    impl io::Write for BrokenOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    fn test_output_error(tmp_root: tempfile::TempDir) {
        let result = sorter(tmp_root.path(), 1).sort(&b"b\na\n"[..], BrokenOutput);

        assert!(matches!(result, Err(SortError::Output(_))));
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    /// Gzip segment failing to write every segment but the first one.
    struct FailingSegment(GzSegment);

    impl ExternalSegment for FailingSegment {
        const EXTENSION: &'static str = GzSegment::EXTENSION;

        fn build(path: &Path, records: impl IntoIterator<Item = Vec<u8>>, options: &SegmentOptions) -> io::Result<()> {
            GzSegment::build(path, records, options)?;
            if path.ends_with("000000.gz") {
                Ok(())
            } else {
                Err(io::Error::new(ErrorKind::Other, "no space left on device"))
            }
        }

        fn dump(
            segment_writer: &mut io::BufWriter<fs::File>,
            records: impl IntoIterator<Item = Vec<u8>>,
            options: &SegmentOptions,
        ) -> io::Result<()> {
            GzSegment::dump(segment_writer, records, options)
        }

        fn open(path: &Path, options: &SegmentOptions) -> io::Result<Self> {
            Ok(FailingSegment(GzSegment::open(path, options)?))
        }
    }

    impl Iterator for FailingSegment {
        type Item = io::Result<Vec<u8>>;

        fn next(&mut self) -> Option<Self::Item> {
            self.0.next()
        }
    }

    #[rstest]
    fn test_segment_write_error(tmp_root: tempfile::TempDir) {
        let sorter: ExternalSorter<LimitedBufferBuilder, FailingSegment> = ExternalSorterBuilder::new()
            .with_buffer(LimitedBufferBuilder::new(2, false))
            .with_tmp_dir(tmp_root.path())
            .build()
            .unwrap();

        let mut output = Vec::new();
        let result = sorter.sort(&lines(&["d", "c", "b", "a", "e"])[..], &mut output);

        assert!(matches!(result, Err(SortError::SegmentWrite(_))));
        assert!(output.is_empty());
        // both the first segment and the partially written second one are gone
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    /// Gzip segment failing to read past the first record of every segment.
    struct UnreadableSegment(GzSegment, usize);

    impl ExternalSegment for UnreadableSegment {
        const EXTENSION: &'static str = GzSegment::EXTENSION;

        fn dump(
            segment_writer: &mut io::BufWriter<fs::File>,
            records: impl IntoIterator<Item = Vec<u8>>,
            options: &SegmentOptions,
        ) -> io::Result<()> {
            GzSegment::dump(segment_writer, records, options)
        }

        fn open(path: &Path, options: &SegmentOptions) -> io::Result<Self> {
            Ok(UnreadableSegment(GzSegment::open(path, options)?, 0))
        }
    }

    impl Iterator for UnreadableSegment {
        type Item = io::Result<Vec<u8>>;

        fn next(&mut self) -> Option<Self::Item> {
            self.1 += 1;
            if self.1 > 1 {
                return Some(Err(io::Error::new(ErrorKind::UnexpectedEof, "corrupt deflate stream")));
            }
            self.0.next()
        }
    }

    #[rstest]
    fn test_segment_read_error(tmp_root: tempfile::TempDir) {
        let sorter: ExternalSorter<LimitedBufferBuilder, UnreadableSegment> = ExternalSorterBuilder::new()
            .with_buffer(LimitedBufferBuilder::new(2, false))
            .with_tmp_dir(tmp_root.path())
            .build()
            .unwrap();

        let mut output = Vec::new();
        let result = sorter.sort(&lines(&["d", "c", "b", "a"])[..], &mut output);

        assert!(matches!(result, Err(SortError::SegmentRead(_))));
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    fn test_delimiter_in_record(tmp_root: tempfile::TempDir) {
        let input = vec![Ok(b"m".to_vec()), Ok(b"z\na".to_vec()), Ok(b"a".to_vec())];

        let result = sorter(tmp_root.path(), 1).sort_records(input);

        assert!(matches!(result, Err(SortError::DelimiterInRecord { record: 2 })));
        assert_eq!(leftovers(tmp_root.path()), 0);
    }

    #[rstest]
    fn test_zero_rw_buf_size(tmp_root: tempfile::TempDir) {
        let result: Result<ExternalSorter, _> = ExternalSorterBuilder::new()
            .with_tmp_dir(tmp_root.path())
            .with_rw_buf_size(0)
            .build();

        assert!(matches!(result, Err(SortError::InvalidConfig(_))));
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    fn test_small_rw_buf_size(tmp_root: tempfile::TempDir, #[case] buf_size: usize) {
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_buffer(LimitedBufferBuilder::new(2, false))
            .with_tmp_dir(tmp_root.path())
            .with_rw_buf_size(buf_size)
            .build()
            .unwrap();

        let mut output = Vec::new();
        let stats = sorter.sort(&lines(&["b", "a", "c"])[..], &mut output).unwrap();

        assert_eq!(output, lines(&["a", "b", "c"]));
        assert_eq!(stats, SortStats { records: 3, segments: 2 });
    }

    #[rstest]
    fn test_invalid_compression(tmp_root: tempfile::TempDir) {
        let result: Result<ExternalSorter, _> = ExternalSorterBuilder::new()
            .with_tmp_dir(tmp_root.path())
            .with_compression(10)
            .build();

        assert!(matches!(result, Err(SortError::InvalidConfig(_))));
    }

    #[rstest]
    #[case(0)]
    #[case(9)]
    fn test_compression_levels(tmp_root: tempfile::TempDir, #[case] level: u32) {
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_buffer(LimitedBufferBuilder::new(3, false))
            .with_tmp_dir(tmp_root.path())
            .with_compression(level)
            .with_rw_buf_size(64)
            .build()
            .unwrap();

        let mut output = Vec::new();
        sorter
            .sort(&lines(&["delta", "alpha", "echo", "charlie", "bravo"])[..], &mut output)
            .unwrap();

        assert_eq!(output, lines(&["alpha", "bravo", "charlie", "delta", "echo"]));
    }
}
