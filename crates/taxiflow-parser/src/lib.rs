pub mod errors;
pub mod model;
pub mod reader;
mod columns;
mod values;

pub use errors::ReaderError;
pub use model::{split_column_list, ColumnKind, ReadOptions, DEFAULT_CHUNK_SIZE};
pub use reader::{read_csv, read_csv_from_reader, read_first_chunk, CsvChunkReader};
pub use values::parse_timestamp_micros;
