//! Table persistence and column extraction shared by every stage

use crate::error::ChurnError;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;

/// On-disk table formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    /// `.csv` (any case) is CSV; everything else is Parquet.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Parquet,
        }
    }
}

/// Read a table from disk, failing with `NotFound` when the file is absent.
///
/// CSV schemas are inferred over the whole file so that a column holding a
/// single non-numeric placeholder is read as text instead of failing to parse.
pub fn read_table(path: &Path) -> crate::Result<DataFrame> {
    if !path.is_file() {
        return Err(ChurnError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let df = match TableFormat::from_path(path) {
        TableFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        TableFormat::Parquet => ParquetReader::new(File::open(path)?).finish()?,
    };

    tracing::debug!(
        path = %path.display(),
        rows = df.height(),
        columns = df.width(),
        "read table"
    );
    Ok(df)
}

/// Write a table to disk, creating the parent directory when missing.
pub fn write_table(df: &mut DataFrame, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(path)?;
    match TableFormat::from_path(path) {
        TableFormat::Csv => {
            CsvWriter::new(&mut file).include_header(true).finish(df)?;
        }
        TableFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
    }

    tracing::debug!(path = %path.display(), rows = df.height(), "wrote table");
    Ok(())
}

/// Column names in table order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect()
}

/// Fail with a schema error naming every absent column.
pub fn require_columns<S: AsRef<str>>(df: &DataFrame, required: &[S]) -> crate::Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| df.get_column_index(name).is_none())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ChurnError::schema(format!(
            "missing required columns: {}",
            missing.join(", ")
        )))
    }
}

/// Values of a column rendered as text. Nulls are a schema error.
pub fn string_values(df: &DataFrame, name: &str) -> crate::Result<Vec<String>> {
    let casted = df.column(name)?.cast(&DataType::String)?;
    casted
        .str()?
        .into_iter()
        .map(|value| {
            value
                .map(str::to_string)
                .ok_or_else(|| ChurnError::schema(format!("null value in column {name}")))
        })
        .collect()
}

/// Values of a column as `f64`. Nulls and unparseable values are a schema error.
pub fn f64_values(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    casted
        .f64()?
        .into_iter()
        .map(|value| {
            value.ok_or_else(|| ChurnError::schema(format!("non-numeric value in column {name}")))
        })
        .collect()
}

/// Stack the named columns, in the given order, into a row-major matrix.
pub fn matrix<S: AsRef<str>>(df: &DataFrame, columns: &[S]) -> crate::Result<Array2<f64>> {
    require_columns(df, columns)?;
    let values = columns
        .iter()
        .map(|name| f64_values(df, name.as_ref()))
        .collect::<crate::Result<Vec<_>>>()?;

    Ok(Array2::from_shape_fn((df.height(), columns.len()), |(row, col)| {
        values[col][row]
    }))
}

/// Binary class labels. Anything other than 0 or 1 is a schema error.
pub fn labels(df: &DataFrame, name: &str) -> crate::Result<Array1<usize>> {
    require_columns(df, &[name])?;
    f64_values(df, name)?
        .into_iter()
        .map(|value| match value {
            v if v == 0.0 => Ok(0),
            v if v == 1.0 => Ok(1),
            other => Err(ChurnError::schema(format!(
                "label column {name} holds non-binary value {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, Builder};

    fn sample_frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("a".into(), &[1.0, 2.0, 3.0]),
            Column::new("b".into(), &[10i64, 20, 30]),
            Column::new("label".into(), &[0i64, 1, 0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(TableFormat::from_path(Path::new("x.csv")), TableFormat::Csv);
        assert_eq!(TableFormat::from_path(Path::new("x.CSV")), TableFormat::Csv);
        assert_eq!(
            TableFormat::from_path(Path::new("x.parquet")),
            TableFormat::Parquet
        );
        assert_eq!(TableFormat::from_path(Path::new("x")), TableFormat::Parquet);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = read_table(Path::new("/definitely/not/here.csv"));
        assert!(matches!(result, Err(ChurnError::NotFound { .. })));
    }

    #[test]
    fn test_parquet_round_trip_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("frame.parquet");
        let mut df = sample_frame();

        write_table(&mut df, &path).unwrap();
        let loaded = read_table(&path).unwrap();

        assert_eq!(loaded.shape(), (3, 3));
        assert_eq!(column_names(&loaded), vec!["a", "b", "label"]);
    }

    #[test]
    fn test_csv_blank_placeholder_read_as_text() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "id,charge").unwrap();
        writeln!(file, "1,29.85").unwrap();
        writeln!(file, "2, ").unwrap();
        writeln!(file, "3,108.15").unwrap();

        let df = read_table(file.path()).unwrap();
        assert_eq!(df.column("charge").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_require_columns_lists_missing() {
        let df = sample_frame();
        let err = require_columns(&df, &["a", "zz", "yy"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("zz"));
        assert!(msg.contains("yy"));
        assert!(!msg.contains("a,"));
    }

    #[test]
    fn test_matrix_follows_requested_order() {
        let df = sample_frame();
        let x = matrix(&df, &["b", "a"]).unwrap();
        assert_eq!(x.shape(), &[3, 2]);
        assert_eq!(x[[0, 0]], 10.0);
        assert_eq!(x[[2, 1]], 3.0);
    }

    #[test]
    fn test_labels_reject_non_binary() {
        let df = DataFrame::new(vec![Column::new("label".into(), &[0i64, 2])]).unwrap();
        assert!(labels(&df, "label").is_err());

        let df = sample_frame();
        assert_eq!(labels(&df, "label").unwrap().to_vec(), vec![0, 1, 0]);
    }
}
