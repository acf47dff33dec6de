//! Chunked CSV reader.
//!
//! Reads one bounded slice of rows per call. Blank rows are dropped before
//! offsets are counted, so successive chunks tile the filtered row set.
//!
//! ```text
//! filtered rows:  [hdr] [r1] [r2] | [r3] [r4] | [r5]
//! chunk_size=2     skip  offset 0 | offset 1  | offset 2 (partial)
//! ```

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CsvError, CsvResult};
use crate::models::{Encoding, ImportOptions};

/// One parsed row. `None` stands for a cell the row does not have.
pub type RawRow = Vec<Option<String>>;

/// Bytes fed to the encoding sniffer.
const SNIFF_BYTES: usize = 64 * 1024;

// =============================================================================
// Dialect
// =============================================================================

/// Delimiter, enclosure and escape bytes for the CSV reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
    pub escape: Option<u8>,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: None,
        }
    }
}

impl Dialect {
    /// Apply the overrides in `options` on top of the default dialect.
    pub fn from_options(options: &ImportOptions) -> CsvResult<Self> {
        let default = Self::default();
        let dialect = Self {
            delimiter: dialect_byte("delimiter", options.delimiter)?.unwrap_or(default.delimiter),
            quote: dialect_byte("enclosure", options.enclosure)?.unwrap_or(default.quote),
            escape: dialect_byte("escape", options.escape)?,
        };

        if dialect.delimiter == dialect.quote {
            return Err(CsvError::Dialect(format!(
                "delimiter and enclosure are both '{}'",
                dialect.delimiter as char
            )));
        }
        if dialect.escape == Some(dialect.delimiter) {
            return Err(CsvError::Dialect(format!(
                "delimiter and escape are both '{}'",
                dialect.delimiter as char
            )));
        }
        Ok(dialect)
    }

    fn builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .quote(self.quote);
        if let Some(escape) = self.escape {
            builder.escape(Some(escape));
        }
        builder
    }
}

fn dialect_byte(name: &str, value: Option<char>) -> CsvResult<Option<u8>> {
    match value {
        None => Ok(None),
        Some(c) if c == '\n' || c == '\r' => Err(CsvError::Dialect(format!(
            "{} cannot be a line break",
            name
        ))),
        Some(c) if c.is_ascii() => Ok(Some(c as u8)),
        Some(c) => Err(CsvError::Dialect(format!(
            "{} '{}' must be a single ASCII character",
            name, c
        ))),
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let sample = &bytes[..bytes.len().min(SNIFF_BYTES)];
    let charset = chardet::detect(sample).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "utf-8-sig" | "" => "utf-8".to_string(),
        "iso-8859-1" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes with `encoding`, or with the sniffed encoding when `None`.
///
/// A leading BOM is stripped. Undecodable sequences become U+FFFD.
pub fn decode_content(bytes: &[u8], encoding: Option<Encoding>) -> String {
    let decoder = match encoding {
        Some(enc) => enc.decoder(),
        None => {
            let label = detect_encoding(bytes);
            encoding_rs::Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8)
        }
    };
    decoder.decode(bytes).0.into_owned()
}

/// Guess the delimiter by counting candidates in the first line.
///
/// Only used to suggest a dialect to the operator; chunk reads use the
/// explicit dialect.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

// =============================================================================
// Reader
// =============================================================================

/// A row with at most one cell, and that cell empty, carries no data.
pub fn is_blank_row(row: &[Option<String>]) -> bool {
    row.len() <= 1 && row.first().map_or(true, |cell| cell.as_deref().map_or(true, str::is_empty))
}

/// Reader bound to one CSV file and one dialect.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
    dialect: Dialect,
    encoding: Option<Encoding>,
    first_row_titles: bool,
}

impl ChunkReader {
    /// Validate the dialect and check that `path` is a readable file.
    pub fn open(path: impl AsRef<Path>, options: &ImportOptions) -> CsvResult<Self> {
        let path = path.as_ref().to_path_buf();
        let dialect = Dialect::from_options(options)?;

        let meta = fs::metadata(&path).map_err(|e| CsvError::resource(&path, e))?;
        if !meta.is_file() {
            return Err(CsvError::resource(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        Ok(Self {
            path,
            dialect,
            encoding: options.encoding,
            first_row_titles: options.first_row_titles,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn load(&self) -> CsvResult<String> {
        let bytes = fs::read(&self.path).map_err(|e| CsvError::resource(&self.path, e))?;
        Ok(decode_content(&bytes, self.encoding))
    }

    /// Non-blank rows of `content`, header included.
    fn filtered_rows<'a>(&self, content: &'a str) -> impl Iterator<Item = CsvResult<RawRow>> + 'a {
        self.dialect
            .builder()
            .from_reader(content.as_bytes())
            .into_records()
            .enumerate()
            .filter_map(|(line, result)| match result {
                Ok(record) => {
                    let row: RawRow = record.iter().map(|cell| Some(cell.to_string())).collect();
                    if is_blank_row(&row) {
                        None
                    } else {
                        Some(Ok(row))
                    }
                }
                Err(e) => Some(Err(CsvError::Parse {
                    row: line + 1,
                    message: e.to_string(),
                })),
            })
    }

    /// Rows `[row_offset, row_offset + chunk_size)` of the filtered set.
    ///
    /// Returns fewer rows on the last chunk and none past the end.
    pub fn read_chunk(&self, options: &ImportOptions) -> CsvResult<Vec<RawRow>> {
        let content = self.load()?;
        let rows = self
            .filtered_rows(&content)
            .skip(options.row_offset())
            .take(options.chunk_size)
            .collect::<CsvResult<Vec<_>>>()?;

        tracing::debug!(
            path = %self.path.display(),
            offset = options.offset,
            row_offset = options.row_offset(),
            rows = rows.len(),
            "read chunk"
        );
        Ok(rows)
    }

    /// Number of filtered data rows (header excluded).
    pub fn count_rows(&self) -> CsvResult<usize> {
        let content = self.load()?;
        let mut total = 0usize;
        for row in self.filtered_rows(&content) {
            row?;
            total += 1;
        }
        Ok(self.data_rows(total))
    }

    /// [`ChunkReader::count_rows`] and [`ChunkReader::read_chunk`] in one
    /// pass over the file.
    pub fn read_chunk_with_total(&self, options: &ImportOptions) -> CsvResult<(usize, Vec<RawRow>)> {
        let content = self.load()?;
        let window = options.row_offset()..options.row_offset().saturating_add(options.chunk_size);

        let mut total = 0usize;
        let mut rows = Vec::new();
        for (index, row) in self.filtered_rows(&content).enumerate() {
            let row = row?;
            if window.contains(&index) {
                rows.push(row);
            }
            total += 1;
        }
        Ok((self.data_rows(total), rows))
    }

    fn data_rows(&self, filtered: usize) -> usize {
        if self.first_row_titles {
            filtered.saturating_sub(1)
        } else {
            filtered
        }
    }

    /// Column labels: the title row, or `Column #n` when the file has none.
    pub fn read_headers(&self) -> CsvResult<Vec<String>> {
        let content = self.load()?;
        let first = match self.filtered_rows(&content).next() {
            Some(row) => row?,
            None => return Ok(Vec::new()),
        };

        Ok(if self.first_row_titles {
            first
                .into_iter()
                .map(|cell| cell.unwrap_or_default().trim().to_string())
                .collect()
        } else {
            (1..=first.len()).map(|n| format!("Column #{}", n)).collect()
        })
    }

    /// First `limit` non-empty values of column `index`, header excluded.
    pub fn column_sample(&self, index: usize, limit: usize) -> CsvResult<Vec<String>> {
        let content = self.load()?;
        let mut sample = Vec::new();

        for row in self
            .filtered_rows(&content)
            .skip(usize::from(self.first_row_titles))
        {
            let row = row?;
            if let Some(Some(value)) = row.get(index) {
                if !value.trim().is_empty() {
                    sample.push(value.clone());
                }
            }
            if sample.len() >= limit {
                break;
            }
        }
        Ok(sample)
    }
}

/// Open `path` and read the chunk selected by `options`.
pub fn read_chunk(path: impl AsRef<Path>, options: &ImportOptions) -> CsvResult<Vec<RawRow>> {
    ChunkReader::open(path, options)?.read_chunk(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn opts(chunk_size: usize, offset: usize) -> ImportOptions {
        ImportOptions {
            chunk_size,
            offset,
            ..Default::default()
        }
    }

    fn first_cells(rows: &[RawRow]) -> Vec<String> {
        rows.iter()
            .map(|r| r[0].clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_header_plus_five_rows_in_chunks_of_two() {
        let file = csv_file(b"sku,name\nA,1\nB,2\nC,3\nD,4\nE,5\n");

        let chunk = |offset| first_cells(&read_chunk(file.path(), &opts(2, offset)).unwrap());
        assert_eq!(chunk(0), vec!["A", "B"]);
        assert_eq!(chunk(1), vec!["C", "D"]);
        assert_eq!(chunk(2), vec!["E"]);
        assert!(chunk(3).is_empty());
        assert!(chunk(40).is_empty());
    }

    #[test]
    fn test_read_chunk_with_total_matches_separate_calls() {
        let file = csv_file(b"sku,name\nA,1\n\nB,2\nC,3\n");
        let reader = ChunkReader::open(file.path(), &opts(2, 0)).unwrap();

        for offset in 0..3 {
            let options = opts(2, offset);
            let (total, rows) = reader.read_chunk_with_total(&options).unwrap();
            assert_eq!(total, reader.count_rows().unwrap());
            assert_eq!(rows, reader.read_chunk(&options).unwrap());
        }
        assert_eq!(reader.read_chunk_with_total(&opts(2, 1)).unwrap().0, 3);
    }

    #[test]
    fn test_chunks_tile_filtered_rows() {
        let mut content = String::from("sku,name\n\n");
        for i in 0..23 {
            content.push_str(&format!("S{},n{}\n", i, i));
            if i % 4 == 0 {
                content.push_str("\n\n");
            }
        }
        let file = csv_file(content.as_bytes());

        for first_row_titles in [true, false] {
            for chunk_size in 1..=9 {
                let base = ImportOptions {
                    first_row_titles,
                    chunk_size,
                    ..Default::default()
                };
                let reader = ChunkReader::open(file.path(), &base).unwrap();
                let total = reader.count_rows().unwrap();

                let mut seen = Vec::new();
                let mut offset = 0;
                loop {
                    let rows = reader.read_chunk(&base.at_offset(offset)).unwrap();
                    assert!(rows.len() <= chunk_size);
                    if rows.is_empty() {
                        break;
                    }
                    seen.extend(first_cells(&rows));
                    offset += 1;
                }

                let mut expected: Vec<String> = (0..23).map(|i| format!("S{}", i)).collect();
                if !first_row_titles {
                    expected.insert(0, "sku".to_string());
                }
                assert_eq!(total, expected.len());
                assert_eq!(seen, expected, "chunk_size={} titles={}", chunk_size, first_row_titles);
            }
        }
    }

    #[test]
    fn test_blank_rows_filtered_before_offsets() {
        // The ',' row has two empty cells and is kept as data
        let file = csv_file(b"h1,h2\n\nA,1\n\n\nB,2\n,\n");
        let rows = read_chunk(file.path(), &opts(10, 0)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec![Some(String::new()), Some(String::new())]);

        let second = read_chunk(file.path(), &opts(1, 1)).unwrap();
        assert_eq!(first_cells(&second), vec!["B"]);
    }

    #[test]
    fn test_blank_row_predicate() {
        assert!(is_blank_row(&[]));
        assert!(is_blank_row(&[None]));
        assert!(is_blank_row(&[Some(String::new())]));
        assert!(!is_blank_row(&[Some("x".into())]));
        assert!(!is_blank_row(&[None, None]));
    }

    #[test]
    fn test_custom_dialect() {
        let file = csv_file(b"sku;name\n'A;1';Widget\n");
        let options = ImportOptions {
            delimiter: Some(';'),
            enclosure: Some('\''),
            ..opts(5, 0)
        };
        let rows = read_chunk(file.path(), &options).unwrap();
        assert_eq!(rows[0], vec![Some("A;1".to_string()), Some("Widget".to_string())]);
    }

    #[test]
    fn test_escape_character() {
        let file = csv_file(b"sku,name\nA,\"say \\\"hi\\\"\"\n");
        let options = ImportOptions {
            escape: Some('\\'),
            ..opts(5, 0)
        };
        let rows = read_chunk(file.path(), &options).unwrap();
        assert_eq!(rows[0][1].as_deref(), Some("say \"hi\""));
    }

    #[test]
    fn test_invalid_dialect_is_fatal() {
        let file = csv_file(b"a,b\n1,2\n");
        let bad = [
            ImportOptions { delimiter: Some('€'), ..opts(1, 0) },
            ImportOptions { delimiter: Some('"'), ..opts(1, 0) },
            ImportOptions { enclosure: Some('\n'), ..opts(1, 0) },
            ImportOptions { escape: Some(','), ..opts(1, 0) },
        ];
        for options in bad {
            assert!(matches!(
                ChunkReader::open(file.path(), &options),
                Err(CsvError::Dialect(_))
            ));
        }
    }

    #[test]
    fn test_missing_file_is_resource_error() {
        let result = read_chunk("/definitely/not/here.csv", &opts(1, 0));
        assert!(matches!(result, Err(CsvError::Resource { .. })));
    }

    #[test]
    fn test_count_rows_empty_and_header_only() {
        let empty = csv_file(b"");
        let reader = ChunkReader::open(empty.path(), &opts(1, 0)).unwrap();
        assert_eq!(reader.count_rows().unwrap(), 0);
        assert!(reader.read_headers().unwrap().is_empty());

        let header_only = csv_file(b"sku,name\n\n");
        let reader = ChunkReader::open(header_only.path(), &opts(1, 0)).unwrap();
        assert_eq!(reader.count_rows().unwrap(), 0);
    }

    #[test]
    fn test_headers_and_generated_labels() {
        let file = csv_file(b" sku , name,price\nA,B,1\n");
        let reader = ChunkReader::open(file.path(), &opts(1, 0)).unwrap();
        assert_eq!(reader.read_headers().unwrap(), vec!["sku", "name", "price"]);

        let untitled = ImportOptions { first_row_titles: false, ..opts(1, 0) };
        let reader = ChunkReader::open(file.path(), &untitled).unwrap();
        assert_eq!(
            reader.read_headers().unwrap(),
            vec!["Column #1", "Column #2", "Column #3"]
        );
    }

    #[test]
    fn test_column_sample_skips_header_and_empty_cells() {
        let file = csv_file(b"sku,name\nA,\nB,Bolt\nC,Cog\nD,Disc\n");
        let reader = ChunkReader::open(file.path(), &opts(1, 0)).unwrap();
        assert_eq!(reader.column_sample(1, 2).unwrap(), vec!["Bolt", "Cog"]);
        assert!(reader.column_sample(7, 3).unwrap().is_empty());
    }

    #[test]
    fn test_latin1_source() {
        // "Société" in ISO-8859-1
        let file = csv_file(&[b's', b',', b'\n', 0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9, b',', b'\n']);
        let options = ImportOptions {
            encoding: Some(Encoding::Iso8859_1),
            ..opts(5, 0)
        };
        let rows = read_chunk(file.path(), &options).unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("Société"));
    }

    #[test]
    fn test_utf8_bom_stripped() {
        let decoded = decode_content(b"\xEF\xBB\xBFsku,name", Some(Encoding::Utf8));
        assert_eq!(decoded, "sku,name");
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(detect_delimiter("a|b|c"), '|');
        assert_eq!(detect_delimiter("single"), ',');
    }
}
