//! Read/write counts files and parameter store JSON.
//!
//! A counts file holds one number per channel separated by any whitespace, so
//! a single column, a single row and a numpy `savetxt` dump all load. Lines
//! starting with `#` are comments.

use std::fs::{self, File};
use std::io::{Error as IoError, ErrorKind, Read};
use std::path::Path;

use tracing::debug;

use crate::domain::ParamStore;
use crate::error::Result;

/// Parse counts text; see the module docs for the format.
pub fn parse_counts(text: &str) -> Result<Vec<f64>> {
    counts_from_reader(text.as_bytes())
}

fn counts_from_reader<R: Read>(input: R) -> Result<Vec<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .delimiter(b' ')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut counts = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        // runs of spaces give empty fields, tabs stay inside one field
        for token in record.iter().flat_map(str::split_whitespace) {
            let value: f64 = token.parse().map_err(|_| {
                IoError::new(
                    ErrorKind::InvalidData,
                    format!("line {line}: '{token}' is not a number"),
                )
            })?;
            counts.push(value);
        }
    }
    if counts.is_empty() {
        return Err(IoError::new(ErrorKind::InvalidData, "counts file holds no values").into());
    }
    Ok(counts)
}

/// Read a counts file.
pub fn read_counts(path: &Path) -> Result<Vec<f64>> {
    let counts = counts_from_reader(File::open(path)?)?;
    debug!(path = %path.display(), channels = counts.len(), "counts loaded");
    Ok(counts)
}

/// Write one value per line.
pub fn write_counts(path: &Path, counts: &[f64]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    for v in counts {
        writer.write_record([v.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Load a parameter store; `None` gives [`ParamStore::default_xrf`].
pub fn read_store(path: Option<&Path>) -> Result<ParamStore> {
    match path {
        Some(path) => {
            let store = ParamStore::from_json_str(&fs::read_to_string(path)?)?;
            debug!(path = %path.display(), params = store.len(), "parameter store loaded");
            Ok(store)
        }
        None => Ok(ParamStore::default_xrf()),
    }
}

pub fn write_store(path: &Path, store: &ParamStore) -> Result<()> {
    fs::write(path, store.to_json_string()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FitError;

    #[test]
    fn parses_columns_rows_and_comments() {
        let text = "# channel counts\n1 2.5\n\n  3e1\n4\n";
        assert_eq!(parse_counts(text).unwrap(), [1.0, 2.5, 30.0, 4.0]);
    }

    #[test]
    fn savetxt_style_rows_with_mixed_separators() {
        let text = "# x y\n0  5\t7\n 1   8 \r\n2\t\t9\n";
        assert_eq!(
            parse_counts(text).unwrap(),
            [0.0, 5.0, 7.0, 1.0, 8.0, 2.0, 9.0]
        );
    }

    #[test]
    fn bad_token_reports_its_line() {
        let err = parse_counts("1\n2\n3 x\n").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn rejects_garbage_and_empty_input() {
        assert!(matches!(parse_counts("1 two 3"), Err(FitError::Io(_))));
        assert!(matches!(parse_counts("# nothing\n"), Err(FitError::Io(_))));
    }

    #[test]
    fn counts_file_round_trip() {
        let path = std::env::temp_dir().join(format!("xrf-counts-{}.txt", std::process::id()));
        write_counts(&path, &[0.0, 12.0, 3.5]).unwrap();
        let back = read_counts(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, [0.0, 12.0, 3.5]);
    }
}
