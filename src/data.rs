//! Raw data ingestion: repair `TotalCharges`, drop unusable rows and the
//! customer identifier, persist the cleaned table

use crate::table::{read_table, write_table};
use polars::prelude::*;
use std::path::Path;

/// Column holding the free-text total charge amount.
pub const TOTAL_CHARGES: &str = "TotalCharges";
/// Identifier column removed before modelling.
pub const CUSTOMER_ID: &str = "customerID";

/// Cleaned customer table with row accounting from the ingestion run
#[derive(Debug)]
pub struct CleanedTable {
    /// Cleaned rows; every `TotalCharges` value is a valid `f64`
    pub frame: DataFrame,
    /// Rows read from the raw input
    pub rows_in: usize,
    /// Rows removed because `TotalCharges` could not be parsed
    pub rows_dropped: usize,
}

/// Load raw customer data, clean it and persist the result
///
/// # Arguments
/// * `raw_path` - Delimited raw table (CSV)
/// * `out_path` - Destination; `.csv` writes CSV, anything else Parquet
///
/// # Returns
/// * `CleanedTable` holding the persisted frame
pub fn clean(raw_path: &Path, out_path: &Path) -> crate::Result<CleanedTable> {
    tracing::info!("Reading raw data from {}", raw_path.display());
    let raw = read_table(raw_path)?;

    let mut cleaned = clean_frame(raw)?;
    tracing::info!(
        "Dropped {} rows due to invalid {}",
        cleaned.rows_dropped,
        TOTAL_CHARGES
    );

    write_table(&mut cleaned.frame, out_path)?;
    tracing::info!("Cleaned data saved to {}", out_path.display());

    Ok(cleaned)
}

/// Apply the cleaning rules to an in-memory frame
pub fn clean_frame(mut df: DataFrame) -> crate::Result<CleanedTable> {
    crate::table::require_columns(&df, &[TOTAL_CHARGES])?;
    let rows_in = df.height();

    let charges = coerce_numeric(df.column(TOTAL_CHARGES)?)?;
    let keep: Vec<bool> = charges.iter().map(Option::is_some).collect();
    df.with_column(Column::new(TOTAL_CHARGES.into(), charges))?;

    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let mut frame = df.filter(&mask)?;

    if frame.get_column_index(CUSTOMER_ID).is_some() {
        frame = frame.drop(CUSTOMER_ID)?;
        tracing::debug!("Removed '{}' column", CUSTOMER_ID);
    }

    let rows_dropped = rows_in - frame.height();
    Ok(CleanedTable {
        frame,
        rows_in,
        rows_dropped,
    })
}

/// Coerce a column to `f64`, mapping anything unparseable to `None`
///
/// Text values are trimmed before parsing, so a blank placeholder becomes
/// missing instead of an error.
fn coerce_numeric(column: &Column) -> crate::Result<Vec<Option<f64>>> {
    let values = match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|value| value.and_then(parse_amount))
            .collect(),
        _ => {
            let casted = column.cast(&DataType::Float64)?;
            let values: Vec<Option<f64>> = casted
                .f64()?
                .into_iter()
                .map(|value| value.filter(|v| v.is_finite()))
                .collect();
            values
        }
    };
    Ok(values)
}

/// Non-finite amounts (`NaN`, `inf`) count as unparseable and drop the row.
fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
