//! Numeric matrices as headerless CSV.
//!
//! - one CSV row per matrix row, comma separated
//! - blank lines are skipped
//! - every row must have the same number of fields

use std::fs::File;
use std::path::Path;

use nalgebra::DMatrix;

use crate::io::IoError;

/// Read a matrix file.
pub fn read_matrix(path: &Path) -> Result<DMatrix<f64>, IoError> {
    let file = File::open(path).map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut values = Vec::new();
    let mut ncols = None;
    let mut nrows = 0usize;
    for result in reader.records() {
        let record = result.map_err(|source| IoError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(nrows + 1, |p| p.line() as usize);
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }

        let expected = *ncols.get_or_insert(record.len());
        if record.len() != expected {
            return Err(IoError::Ragged {
                path: path.to_path_buf(),
                line,
                expected,
                found: record.len(),
            });
        }
        for (column, field) in record.iter().enumerate() {
            let v: f64 = field.parse().map_err(|_| IoError::Number {
                path: path.to_path_buf(),
                line,
                column: column + 1,
                value: field.to_string(),
            })?;
            values.push(v);
        }
        nrows += 1;
    }

    let ncols = ncols.ok_or_else(|| IoError::Empty(path.to_path_buf()))?;
    Ok(DMatrix::from_row_slice(nrows, ncols, &values))
}

/// Write `m` as CSV, full precision.
pub fn write_matrix(path: &Path, m: &DMatrix<f64>) -> Result<(), IoError> {
    let csv_err = |source| IoError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_err)?;
    for row in m.row_iter() {
        writer
            .write_record(row.iter().map(|v| format!("{v:e}")))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_text(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn round_trip_keeps_every_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let m = DMatrix::from_row_slice(2, 3, &[0.1, -2.5e-9, 3.0, 1.0 / 3.0, 0.0, 1e300]);
        write_matrix(&path, &m).unwrap();
        assert_eq!(read_matrix(&path).unwrap(), m);
    }

    #[test]
    fn skips_blank_lines_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(dir.path(), "m.csv", "1, 2\n\n 3 ,4\n");
        let m = read_matrix(&path).unwrap();
        assert_eq!(m, DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(dir.path(), "m.csv", "1,2\n3\n");
        match read_matrix(&path) {
            Err(IoError::Ragged { line, expected, found, .. }) => {
                assert_eq!((line, expected, found), (2, 2, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reports_bad_numbers_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(dir.path(), "bad.csv", "1,x\n");
        assert!(matches!(
            read_matrix(&path),
            Err(IoError::Number { line: 1, column: 2, .. })
        ));
        let path = write_text(dir.path(), "empty.csv", "\n\n");
        assert!(matches!(read_matrix(&path), Err(IoError::Empty(_))));
    }
}
