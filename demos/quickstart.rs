use std::fs;
use std::io;
use std::path;

use env_logger;
use log;

use ext_line_sort::{ExternalSorter, ExternalSorterBuilder, LimitedBufferBuilder};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
    let output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());

    let sorter: ExternalSorter = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new("./"))
        .with_buffer(LimitedBufferBuilder::new(100_000, true))
        .with_compression(6)
        .build()
        .unwrap();

    let stats = sorter.sort(input_reader, output_writer).unwrap();

    log::info!("{} records sorted using {} segments", stats.records, stats.segments);
}
