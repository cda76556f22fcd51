use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use flate2::read::MultiGzDecoder;
use polars::prelude::*;

use crate::columns::ColumnValues;
use crate::errors::ReaderError;
use crate::model::{ColumnKind, ReadOptions};
use crate::values::infer_kind;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Streams a (possibly gzip compressed) CSV source as a sequence of
/// `DataFrame` chunks of at most `chunk_size` rows.
///
/// The column schema is inferred from the first chunk and then held fixed, so
/// every chunk yielded by one reader has the same columns and dtypes. Whole
/// file reads ([`read_csv`]) instead infer every chunk on its own and widen
/// the result.
pub struct CsvChunkReader {
    reader: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    datetime_columns: Vec<bool>,
    schema: Option<Vec<ColumnKind>>,
    fixed_schema: bool,
    chunk_size: usize,
    exhausted: bool,
}

impl std::fmt::Debug for CsvChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvChunkReader")
            .field("headers", &self.headers)
            .field("schema", &self.schema)
            .field("chunk_size", &self.chunk_size)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl CsvChunkReader {
    pub fn open(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self, ReaderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReaderError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, options)
    }

    pub fn from_reader<R>(source: R, options: ReadOptions) -> Result<Self, ReaderError>
    where
        R: Read + Send + 'static,
    {
        let decoded = decompressed(source)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .from_reader(decoded);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|name| name.trim().to_string())
            .collect();

        let mut datetime_columns = vec![false; headers.len()];
        for column in &options.datetime_columns {
            let idx = headers
                .iter()
                .position(|name| name == column)
                .ok_or_else(|| ReaderError::MissingColumn {
                    column: column.clone(),
                })?;
            datetime_columns[idx] = true;
        }

        Ok(Self {
            reader,
            headers,
            datetime_columns,
            schema: None,
            fixed_schema: true,
            chunk_size: options.chunk_size.max(1),
            exhausted: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Column kinds fixed by the first chunk; `None` until a chunk was read.
    pub fn schema(&self) -> Option<Vec<(&str, ColumnKind)>> {
        self.schema.as_ref().map(|kinds| {
            self.headers
                .iter()
                .map(String::as_str)
                .zip(kinds.iter().copied())
                .collect()
        })
    }

    /// Reads the next chunk. `Ok(None)` marks the end of the source.
    pub fn next_chunk(&mut self) -> Result<Option<DataFrame>, ReaderError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut rows: Vec<(u64, StringRecord)> = Vec::with_capacity(self.chunk_size.min(8192));
        let mut record = StringRecord::new();
        while rows.len() < self.chunk_size {
            if !self.reader.read_record(&mut record)? {
                self.exhausted = true;
                break;
            }
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            rows.push((line, std::mem::take(&mut record)));
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let schema = match &self.schema {
            Some(schema) if self.fixed_schema => schema.clone(),
            _ => {
                let inferred = self.infer_schema(&rows);
                self.schema = Some(inferred.clone());
                inferred
            }
        };

        let mut columns: Vec<ColumnValues> = schema
            .iter()
            .map(|kind| ColumnValues::with_capacity(*kind, rows.len()))
            .collect();

        for (line, row) in &rows {
            for (idx, values) in columns.iter_mut().enumerate() {
                values.push(row.get(idx).unwrap_or_default(), *line, &self.headers[idx])?;
            }
        }

        let columns = columns
            .into_iter()
            .zip(&self.headers)
            .map(|(values, name)| values.into_column(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DataFrame::new(columns)?))
    }

    fn with_per_chunk_schema(mut self) -> Self {
        self.fixed_schema = false;
        self
    }

    fn infer_schema(&self, rows: &[(u64, StringRecord)]) -> Vec<ColumnKind> {
        (0..self.headers.len())
            .map(|idx| {
                if self.datetime_columns[idx] {
                    ColumnKind::Datetime
                } else {
                    infer_kind(rows.iter().map(|(_, row)| row.get(idx).unwrap_or_default()))
                }
            })
            .collect()
    }
}

impl Iterator for CsvChunkReader {
    type Item = Result<DataFrame, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

fn decompressed<R>(source: R) -> Result<Box<dyn Read + Send>, ReaderError>
where
    R: Read + Send + 'static,
{
    let mut buffered = BufReader::new(source);
    let is_gzip = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(MultiGzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Reads only the first chunk of a CSV file.
pub fn read_first_chunk(
    path: impl AsRef<Path>,
    options: ReadOptions,
) -> Result<DataFrame, ReaderError> {
    CsvChunkReader::open(path, options)?
        .next_chunk()?
        .ok_or(ReaderError::EmptyData)
}

/// Reads every chunk of a CSV file and concatenates them into one frame.
///
/// Column types are taken over the whole file: an integer column that later
/// holds a fraction becomes `Float64`, and a column blank for the first chunk
/// takes the type its later values show.
pub fn read_csv(path: impl AsRef<Path>, options: ReadOptions) -> Result<DataFrame, ReaderError> {
    collect_chunks(CsvChunkReader::open(path, options)?.with_per_chunk_schema())
}

pub fn read_csv_from_reader<R>(source: R, options: ReadOptions) -> Result<DataFrame, ReaderError>
where
    R: Read + Send + 'static,
{
    collect_chunks(CsvChunkReader::from_reader(source, options)?.with_per_chunk_schema())
}

fn collect_chunks(reader: CsvChunkReader) -> Result<DataFrame, ReaderError> {
    let mut frames = reader.collect::<Result<Vec<_>, _>>()?;
    match frames.len() {
        0 => Err(ReaderError::EmptyData),
        1 => Ok(frames.remove(0)),
        _ => {
            let kinds = widened_kinds(&frames);
            let lazy = frames
                .into_iter()
                .map(|df| cast_to_kinds(df, &kinds).map(IntoLazy::lazy))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(concat(lazy, UnionArgs::default())?.collect()?)
        }
    }
}

/// One kind per column covering every chunk. Columns that are all null in a
/// chunk say nothing about the type and are skipped.
fn widened_kinds(frames: &[DataFrame]) -> Vec<ColumnKind> {
    let width = frames.first().map(DataFrame::width).unwrap_or_default();
    (0..width)
        .map(|idx| {
            frames
                .iter()
                .map(|df| &df.get_columns()[idx])
                .filter(|column| column.null_count() < column.len())
                .filter_map(|column| ColumnKind::from_dtype(column.dtype()))
                .reduce(ColumnKind::widen)
                .or_else(|| {
                    frames
                        .first()
                        .and_then(|df| ColumnKind::from_dtype(df.get_columns()[idx].dtype()))
                })
                .unwrap_or(ColumnKind::Str)
        })
        .collect()
}

fn cast_to_kinds(mut df: DataFrame, kinds: &[ColumnKind]) -> Result<DataFrame, PolarsError> {
    for (idx, kind) in kinds.iter().enumerate() {
        let dtype = kind.dtype();
        if df.get_columns()[idx].dtype() != &dtype {
            let cast = df.get_columns()[idx].cast(&dtype)?;
            df.replace_column(idx, cast)?;
        }
    }
    Ok(df)
}
