use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_line_sort::buffer::mem::MemoryLimitedBufferBuilder;
use ext_line_sort::sort::MAX_COMPRESSION;
use ext_line_sort::{ChunkBufferBuilder, ExternalSorter, ExternalSorterBuilder, LimitedBufferBuilder, SortError, SortStats};

const STDIO: &str = "-";
const DEFAULT_CHUNK_SIZE: &str = "1000000";
const DEFAULT_COMPRESSION: &str = "1";

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let chunk_size: usize = arg_parser.value_of_t_or_exit("chunk_size");
    let compression: u32 = arg_parser.value_of_t_or_exit("compression");
    let memory_limit: Option<ByteSize> = arg_parser
        .is_present("memory_limit")
        .then(|| arg_parser.value_of_t_or_exit("memory_limit"));
    let rw_buf_size: Option<ByteSize> = arg_parser
        .is_present("rw_buf_size")
        .then(|| arg_parser.value_of_t_or_exit("rw_buf_size"));

    let input = arg_parser.value_of("input").expect("value has default");
    let input_stream: Box<dyn BufRead> = if input == STDIO {
        Box::new(io::stdin().lock())
    } else {
        match fs::File::open(input) {
            Ok(file) => Box::new(io::BufReader::new(file)),
            Err(err) => {
                log::error!("input file opening error: {}", err);
                process::exit(1);
            }
        }
    };

    let output = arg_parser.value_of("output").expect("value has default");
    let output_stream: Box<dyn Write> = if output == STDIO {
        Box::new(io::BufWriter::new(io::stdout().lock()))
    } else {
        match fs::File::create(output) {
            Ok(file) => Box::new(io::BufWriter::new(file)),
            Err(err) => {
                log::error!("output file creation error: {}", err);
                process::exit(1);
            }
        }
    };

    let result = if let Some(memory_limit) = memory_limit {
        let sorter_builder: ExternalSorterBuilder<MemoryLimitedBufferBuilder> =
            ExternalSorterBuilder::new().with_buffer(
                MemoryLimitedBufferBuilder::new(memory_limit.as_u64()).with_records_limit(chunk_size),
            );
        configure(sorter_builder, tmp_dir, compression, rw_buf_size)
            .and_then(|sorter| sort(sorter, input_stream, output_stream))
    } else {
        let sorter_builder: ExternalSorterBuilder<LimitedBufferBuilder> =
            ExternalSorterBuilder::new().with_buffer(LimitedBufferBuilder::new(chunk_size, false));
        configure(sorter_builder, tmp_dir, compression, rw_buf_size)
            .and_then(|sorter| sort(sorter, input_stream, output_stream))
    };

    if let Err(err) = result {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

fn configure<B: ChunkBufferBuilder<Vec<u8>>>(
    mut sorter_builder: ExternalSorterBuilder<B>,
    tmp_dir: Option<&str>,
    compression: u32,
    rw_buf_size: Option<ByteSize>,
) -> Result<ExternalSorter<B>, SortError> {
    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(rw_buf_size) = rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size.as_u64() as usize);
    }

    sorter_builder.with_compression(compression).build()
}

fn sort<B: ChunkBufferBuilder<Vec<u8>>>(
    sorter: ExternalSorter<B>,
    input_stream: impl BufRead,
    output_stream: impl Write,
) -> Result<SortStats, SortError> {
    let stats = sorter.sort(input_stream, output_stream)?;
    log::debug!("{} records sorted, {} segments spilled", stats.records, stats.segments);

    Ok(stats)
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-line-sort")
        .about("sorts newline-delimited records byte-wise using bounded memory")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted, '-' for standard input")
                .takes_value(true)
                .default_value(STDIO),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file, '-' for standard output")
                .takes_value(true)
                .default_value(STDIO),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("maximum number of records buffered in memory before spilling")
                .takes_value(true)
                .default_value(DEFAULT_CHUNK_SIZE)
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("chunk size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("memory_limit")
                .short('m')
                .long("memory-limit")
                .help("spill chunks once consumed memory reaches the limit (chunk size still applies)")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory limit format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("compression")
                .short('z')
                .long("compression")
                .help("temporary segments compression level (0-9)")
                .takes_value(true)
                .default_value(DEFAULT_COMPRESSION)
                .validator(|v| match v.parse::<u32>() {
                    Ok(level) if level <= MAX_COMPRESSION => Ok(()),
                    Ok(level) => Err(format!("Compression level {} is out of range", level)),
                    Err(err) => Err(format!("Compression level format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .short('b')
                .long("rw-buf-size")
                .help("temporary segments read/write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() == 0 => Err("buffer size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
