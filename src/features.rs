//! Feature engineering: the fixed encoding mapping and the feature builder
//!
//! [`EncodingSpec`] is the single source of truth for how a customer record
//! becomes a feature row. The builder applies it to every cleaned row, persists
//! it next to the feature table, and the trainer embeds it in the model
//! artifact so the prediction form applies the exact same mapping.

use crate::error::ChurnError;
use crate::table::{read_table, require_columns, string_values, f64_values, write_table};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Version of the encoding rules. Bump whenever a mapping, vocabulary or
/// bucket boundary changes.
pub const ENCODING_VERSION: u32 = 1;

/// Label column.
pub const LABEL: &str = "Churn";
/// Tenure column, in months.
pub const TENURE: &str = "tenure";
/// Total charges column.
pub const TOTAL_CHARGES: &str = "TotalCharges";
/// Derived spend-per-month column.
pub const AVG_MONTHLY_CHARGE: &str = "avg_monthly_charge";
/// Prefix of tenure bucket indicator columns.
pub const TENURE_GROUP_PREFIX: &str = "tenure_group";

/// Two-valued categorical column; `labels[code]` is the category for `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryMapping {
    pub column: String,
    pub labels: [String; 2],
}

impl BinaryMapping {
    pub fn new(column: &str, zero: &str, one: &str) -> Self {
        Self {
            column: column.to_string(),
            labels: [zero.to_string(), one.to_string()],
        }
    }

    /// Code for a category label.
    pub fn encode(&self, value: &str) -> crate::Result<f64> {
        self.labels
            .iter()
            .position(|label| label == value)
            .map(|code| code as f64)
            .ok_or_else(|| ChurnError::unknown_category(&self.column, value))
    }
}

/// Multi-valued categorical column with a fixed vocabulary.
///
/// `categories[0]` is the reference category and gets no indicator column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalField {
    pub column: String,
    pub categories: Vec<String>,
}

impl CategoricalField {
    pub fn new(column: &str, categories: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn reference(&self) -> &str {
        &self.categories[0]
    }

    /// Indicator column name for a category.
    pub fn indicator(&self, category: &str) -> String {
        format!("{}_{}", self.column, category)
    }

    /// Indicator columns in vocabulary order, reference excluded.
    pub fn indicators(&self) -> Vec<String> {
        self.categories[1..]
            .iter()
            .map(|category| self.indicator(category))
            .collect()
    }

    /// Indicator to set for a category, `None` for the reference.
    pub fn encode(&self, value: &str) -> crate::Result<Option<String>> {
        match self.categories.iter().position(|c| c == value) {
            Some(0) => Ok(None),
            Some(_) => Ok(Some(self.indicator(value))),
            None => Err(ChurnError::unknown_category(&self.column, value)),
        }
    }
}

/// Tenure partition into half-open ranges `(edges[i], edges[i + 1]]`.
///
/// Bucket 0 is the reference. Tenures outside `(edges[0], edges[last]]`
/// fall in no bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenureBuckets {
    pub edges: Vec<f64>,
    pub labels: Vec<String>,
}

impl TenureBuckets {
    pub fn bucket(&self, tenure: f64) -> Option<usize> {
        self.edges
            .windows(2)
            .position(|range| tenure > range[0] && tenure <= range[1])
    }

    pub fn indicator(&self, bucket: usize) -> String {
        format!("{}_{}", TENURE_GROUP_PREFIX, self.labels[bucket])
    }

    /// Indicator columns for every bucket except the reference.
    pub fn indicators(&self) -> Vec<String> {
        (1..self.labels.len()).map(|b| self.indicator(b)).collect()
    }
}

/// How a feature column is produced from a customer record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Copied numeric value, or a binary category mapped to {0, 1}
    Passthrough,
    /// One-hot indicator of a multi-valued category
    Indicator,
    /// One-hot indicator of a tenure bucket
    TenureBucket,
    /// `TotalCharges / max(tenure, 1)`
    Ratio,
}

/// Versioned, serializable encoding mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingSpec {
    pub version: u32,
    pub label: BinaryMapping,
    /// Columns copied into the feature row, in output order.
    pub passthrough: Vec<String>,
    /// Mappings for the passthrough columns that hold binary categories.
    pub binary: Vec<BinaryMapping>,
    pub categorical: Vec<CategoricalField>,
    pub tenure_buckets: TenureBuckets,
}

impl Default for EncodingSpec {
    fn default() -> Self {
        Self::telco()
    }
}

impl EncodingSpec {
    /// Encoding for the telecom customer churn table.
    ///
    /// Binary codes follow lexicographic label order (`Female`/`No` → 0,
    /// `Male`/`Yes` → 1). Each vocabulary is sorted, so the reference is the
    /// lexicographically first category.
    pub fn telco() -> Self {
        let yes_no = |column: &str| BinaryMapping::new(column, "No", "Yes");
        let internet_addon =
            |column: &str| CategoricalField::new(column, &["No", "No internet service", "Yes"]);

        Self {
            version: ENCODING_VERSION,
            label: yes_no(LABEL),
            passthrough: [
                "gender",
                "SeniorCitizen",
                "Partner",
                "Dependents",
                TENURE,
                "PhoneService",
                "PaperlessBilling",
                "MonthlyCharges",
                TOTAL_CHARGES,
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            binary: vec![
                BinaryMapping::new("gender", "Female", "Male"),
                yes_no("Partner"),
                yes_no("Dependents"),
                yes_no("PhoneService"),
                yes_no("PaperlessBilling"),
            ],
            categorical: vec![
                CategoricalField::new("MultipleLines", &["No", "No phone service", "Yes"]),
                CategoricalField::new("InternetService", &["DSL", "Fiber optic", "No"]),
                internet_addon("OnlineSecurity"),
                internet_addon("OnlineBackup"),
                internet_addon("DeviceProtection"),
                internet_addon("TechSupport"),
                internet_addon("StreamingTV"),
                internet_addon("StreamingMovies"),
                CategoricalField::new("Contract", &["Month-to-month", "One year", "Two year"]),
                CategoricalField::new(
                    "PaymentMethod",
                    &[
                        "Bank transfer (automatic)",
                        "Credit card (automatic)",
                        "Electronic check",
                        "Mailed check",
                    ],
                ),
            ],
            tenure_buckets: TenureBuckets {
                edges: vec![0.0, 12.0, 24.0, 48.0, 72.0],
                labels: ["0-12m", "13-24m", "25-48m", "49-72m"]
                    .iter()
                    .map(|l| l.to_string())
                    .collect(),
            },
        }
    }

    /// Check the mapping is usable and was produced by this version of the rules.
    pub fn validate(&self) -> crate::Result<()> {
        if self.version != ENCODING_VERSION {
            return Err(ChurnError::invalid_config(format!(
                "encoding version {} is not supported (expected {})",
                self.version, ENCODING_VERSION
            )));
        }

        for mapping in self.binary.iter().chain(std::iter::once(&self.label)) {
            if mapping.labels[0] == mapping.labels[1] {
                return Err(ChurnError::invalid_config(format!(
                    "binary column {} maps both codes to {:?}",
                    mapping.column, mapping.labels[0]
                )));
            }
        }

        for mapping in &self.binary {
            if !self.passthrough.contains(&mapping.column) {
                return Err(ChurnError::invalid_config(format!(
                    "binary column {} is not a passthrough column",
                    mapping.column
                )));
            }
        }

        for field in &self.categorical {
            let mut seen = field.categories.clone();
            seen.sort();
            seen.dedup();
            if field.categories.len() < 2 || seen.len() != field.categories.len() {
                return Err(ChurnError::invalid_config(format!(
                    "categorical column {} needs at least two distinct categories",
                    field.column
                )));
            }
        }

        let buckets = &self.tenure_buckets;
        let increasing = buckets.edges.windows(2).all(|w| w[0] < w[1]);
        if buckets.edges.len() < 2 || !increasing || buckets.labels.len() + 1 != buckets.edges.len()
        {
            return Err(ChurnError::invalid_config(
                "tenure bucket edges must increase and match the bucket labels",
            ));
        }

        for required in [TENURE, TOTAL_CHARGES] {
            if !self.passthrough.iter().any(|c| c == required) {
                return Err(ChurnError::invalid_config(format!(
                    "passthrough columns must include {required}"
                )));
            }
        }

        Ok(())
    }

    pub fn binary_mapping(&self, column: &str) -> Option<&BinaryMapping> {
        self.binary.iter().find(|m| m.column == column)
    }

    pub fn categorical_field(&self, column: &str) -> Option<&CategoricalField> {
        self.categorical.iter().find(|f| f.column == column)
    }

    /// Model input columns in order: passthrough, indicators, tenure
    /// buckets, `avg_monthly_charge`.
    pub fn feature_columns(&self) -> Vec<String> {
        let mut columns = self.passthrough.clone();
        columns.extend(self.categorical.iter().flat_map(CategoricalField::indicators));
        columns.extend(self.tenure_buckets.indicators());
        columns.push(AVG_MONTHLY_CHARGE.to_string());
        columns
    }

    /// Feature table columns: the model inputs with the label after the
    /// passthrough block.
    pub fn table_columns(&self) -> Vec<String> {
        let mut columns = self.feature_columns();
        columns.insert(self.passthrough.len(), self.label.column.clone());
        columns
    }

    /// Cleaned-table columns the builder reads.
    pub fn input_columns(&self) -> Vec<String> {
        let mut columns = self.passthrough.clone();
        columns.extend(self.categorical.iter().map(|f| f.column.clone()));
        columns.push(self.label.column.clone());
        columns
    }

    /// Classify a model column, `None` when this mapping cannot produce it.
    pub fn column_kind(&self, column: &str) -> Option<ColumnKind> {
        if self.passthrough.iter().any(|c| c == column) {
            Some(ColumnKind::Passthrough)
        } else if self
            .categorical
            .iter()
            .any(|f| f.indicators().iter().any(|c| c == column))
        {
            Some(ColumnKind::Indicator)
        } else if self.tenure_buckets.indicators().iter().any(|c| c == column) {
            Some(ColumnKind::TenureBucket)
        } else if column == AVG_MONTHLY_CHARGE {
            Some(ColumnKind::Ratio)
        } else {
            None
        }
    }

    /// Encode one record into its explicitly set feature values.
    ///
    /// Every column not returned is 0: reference categories, tenure outside
    /// the buckets and the reference bucket set nothing.
    pub fn encode(&self, record: &CustomerRecord) -> crate::Result<Vec<(String, f64)>> {
        let mut values = Vec::with_capacity(self.passthrough.len() + self.categorical.len() + 2);

        for column in &self.passthrough {
            let value = match self.binary_mapping(column) {
                Some(mapping) => mapping.encode(record.category(column)?)?,
                None => record.number(column)?,
            };
            values.push((column.clone(), value));
        }

        for field in &self.categorical {
            if let Some(indicator) = field.encode(record.category(&field.column)?)? {
                values.push((indicator, 1.0));
            }
        }

        let tenure = record.number(TENURE)?;
        if let Some(bucket) = self.tenure_buckets.bucket(tenure).filter(|&b| b > 0) {
            values.push((self.tenure_buckets.indicator(bucket), 1.0));
        }

        values.push((
            AVG_MONTHLY_CHARGE.to_string(),
            avg_monthly_charge(record.number(TOTAL_CHARGES)?, tenure),
        ));

        Ok(values)
    }

    /// Encode a record into a dense row over `columns`.
    ///
    /// Values for columns outside `columns` are skipped, which is how a
    /// reference or unobserved indicator stays at 0.
    pub fn encode_row(&self, record: &CustomerRecord, columns: &ColumnIndex) -> crate::Result<Vec<f64>> {
        let mut row = vec![0.0; columns.len()];
        for (name, value) in self.encode(record)? {
            match columns.position(&name) {
                Some(position) => row[position] = value,
                None => tracing::debug!(column = %name, "encoded column not in schema"),
            }
        }
        Ok(row)
    }
}

/// `TotalCharges / tenure`, with a tenure of 0 treated as 1.
pub fn avg_monthly_charge(total_charges: f64, tenure: f64) -> f64 {
    total_charges / if tenure == 0.0 { 1.0 } else { tenure }
}

/// Column name → position lookup over an ordered schema
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            positions: columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.as_ref().to_string(), i))
                .collect(),
        }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// A value in a [`CustomerRecord`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Category(String),
    Number(f64),
}

/// One customer's cleaned fields, keyed by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl CustomerRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, column: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(column.to_string(), FieldValue::Category(value.into()));
        self
    }

    pub fn with_number(mut self, column: &str, value: f64) -> Self {
        self.fields
            .insert(column.to_string(), FieldValue::Number(value));
        self
    }

    pub fn category(&self, column: &str) -> crate::Result<&str> {
        match self.fields.get(column) {
            Some(FieldValue::Category(value)) => Ok(value),
            Some(FieldValue::Number(_)) => Err(ChurnError::schema(format!(
                "field {column} is numeric, expected a category"
            ))),
            None => Err(ChurnError::schema(format!("record has no field {column}"))),
        }
    }

    pub fn number(&self, column: &str) -> crate::Result<f64> {
        match self.fields.get(column) {
            Some(FieldValue::Number(value)) => Ok(*value),
            Some(FieldValue::Category(_)) => Err(ChurnError::schema(format!(
                "field {column} is a category, expected a number"
            ))),
            None => Err(ChurnError::schema(format!("record has no field {column}"))),
        }
    }
}

/// Ordered feature table schema persisted beside the feature table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub encoding: EncodingSpec,
    pub columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(encoding: EncodingSpec) -> Self {
        let columns = encoding.table_columns();
        Self { encoding, columns }
    }

    /// Sidecar location for a feature table: `features.parquet` →
    /// `features.schema.json`.
    pub fn path_for(features_path: &Path) -> PathBuf {
        features_path.with_extension("schema.json")
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.is_file() {
            return Err(ChurnError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let schema: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        schema.encoding.validate()?;
        if schema.columns != schema.encoding.table_columns() {
            return Err(ChurnError::schema(
                "feature schema columns disagree with its encoding",
            ));
        }
        Ok(schema)
    }

    /// Model input columns: the table columns without the label.
    pub fn feature_columns(&self) -> Vec<String> {
        self.encoding.feature_columns()
    }

    pub fn label(&self) -> &str {
        &self.encoding.label.column
    }
}

/// Feature table and the schema it was built with
#[derive(Debug)]
pub struct FeatureTable {
    pub frame: DataFrame,
    pub schema: FeatureSchema,
}

/// Build the feature table from a cleaned table and persist it with its
/// schema sidecar
///
/// # Arguments
/// * `cleaned_path` - Cleaned table written by ingestion
/// * `out_path` - Feature table destination
pub fn build(cleaned_path: &Path, out_path: &Path) -> crate::Result<FeatureTable> {
    build_with(cleaned_path, out_path, EncodingSpec::telco())
}

/// [`build`] with an explicit encoding
pub fn build_with(
    cleaned_path: &Path,
    out_path: &Path,
    encoding: EncodingSpec,
) -> crate::Result<FeatureTable> {
    tracing::info!("Loading cleaned data from {}", cleaned_path.display());
    let cleaned = read_table(cleaned_path)?;

    let mut table = build_frame(&cleaned, encoding)?;

    write_table(&mut table.frame, out_path)?;
    let schema_path = FeatureSchema::path_for(out_path);
    table.schema.save(&schema_path)?;
    tracing::info!(
        "Feature matrix saved to {} (schema {})",
        out_path.display(),
        schema_path.display()
    );

    Ok(table)
}

/// Encode every row of a cleaned frame
pub fn build_frame(cleaned: &DataFrame, encoding: EncodingSpec) -> crate::Result<FeatureTable> {
    encoding.validate()?;
    let label = encoding.label.column.clone();
    if cleaned.get_column_index(&label).is_none() {
        return Err(ChurnError::schema(format!("{label} column missing")));
    }
    require_columns(cleaned, &encoding.input_columns())?;

    let records = read_records(cleaned, &encoding)?;
    let labels = string_values(cleaned, &label)?
        .iter()
        .map(|value| encoding.label.encode(value).map(|code| code as i64))
        .collect::<crate::Result<Vec<i64>>>()?;
    tracing::info!("Encoded binary columns");

    let schema = FeatureSchema::new(encoding);
    let feature_columns = schema.feature_columns();
    let index = ColumnIndex::new(&feature_columns);

    let mut values = vec![Vec::with_capacity(records.len()); feature_columns.len()];
    for record in &records {
        let row = schema.encoding.encode_row(record, &index)?;
        for (column, value) in values.iter_mut().zip(row) {
            column.push(value);
        }
    }
    tracing::info!(
        "One-hot encoded {} multi-valued columns, bucketed tenure, added {}",
        schema.encoding.categorical.len(),
        AVG_MONTHLY_CHARGE
    );

    let mut columns: Vec<Column> = feature_columns
        .iter()
        .zip(values)
        .map(|(name, column)| Column::new(name.as_str().into(), column))
        .collect();
    columns.insert(
        schema.encoding.passthrough.len(),
        Column::new(label.as_str().into(), labels),
    );

    let frame = DataFrame::new(columns)?;
    Ok(FeatureTable { frame, schema })
}

/// Pull the encoding's input columns out of a cleaned frame, one record per row
fn read_records(cleaned: &DataFrame, encoding: &EncodingSpec) -> crate::Result<Vec<CustomerRecord>> {
    let mut categories: Vec<(&str, Vec<String>)> = Vec::new();
    let mut numbers: Vec<(&str, Vec<f64>)> = Vec::new();

    for column in &encoding.passthrough {
        if encoding.binary_mapping(column).is_some() {
            categories.push((column.as_str(), string_values(cleaned, column)?));
        } else {
            numbers.push((column.as_str(), f64_values(cleaned, column)?));
        }
    }
    for field in &encoding.categorical {
        categories.push((field.column.as_str(), string_values(cleaned, &field.column)?));
    }

    Ok((0..cleaned.height())
        .map(|row| {
            let record = categories
                .iter()
                .fold(CustomerRecord::new(), |record, (column, values)| {
                    record.with_category(column, values[row].clone())
                });
            numbers.iter().fold(record, |record, (column, values)| {
                record.with_number(column, values[row])
            })
        })
        .collect())
}
