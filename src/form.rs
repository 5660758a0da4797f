//! Single-customer inference: turn one form submission into a model row and
//! score it

use crate::artifact::ModelArtifact;
use crate::error::ChurnError;
use crate::features::{ColumnIndex, CustomerRecord, EncodingSpec, TENURE, TOTAL_CHARGES};
use ndarray::ArrayView1;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Highest tenure the form accepts, in months
pub const MAX_TENURE: u32 = 72;

/// One customer as entered in the form
///
/// Category fields hold the raw labels (`"Yes"`, `"Fiber optic"`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormInput {
    pub gender: String,
    #[serde(default, deserialize_with = "flag")]
    pub senior_citizen: bool,
    pub partner: String,
    pub dependents: String,
    /// Whole months
    pub tenure: u32,
    pub phone_service: String,
    pub multiple_lines: String,
    pub internet_service: String,
    pub online_security: String,
    pub online_backup: String,
    pub device_protection: String,
    pub tech_support: String,
    pub streaming_tv: String,
    pub streaming_movies: String,
    pub contract: String,
    pub paperless_billing: String,
    pub payment_method: String,
    pub monthly_charges: f64,
    /// Defaults to `monthly_charges * max(tenure, 1)`
    #[serde(default, deserialize_with = "optional_amount")]
    pub total_charges: Option<f64>,
}

/// Accepts a JSON bool or an HTML checkbox value (`on`, `true`, `1`, `yes`)
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "on" | "true" | "1" | "yes"
        ),
    })
}

/// Accepts a number, a numeric string, or an empty string for "not given"
fn optional_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Option::<Amount>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Amount::Number(value)) => Ok(Some(value)),
        Some(Amount::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Amount::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl FormInput {
    pub fn validate(&self) -> crate::Result<()> {
        if self.tenure > MAX_TENURE {
            return Err(ChurnError::invalid_input(format!(
                "tenure must be between 0 and {MAX_TENURE} months, got {}",
                self.tenure
            )));
        }
        for (name, value) in [
            ("monthly_charges", Some(self.monthly_charges)),
            ("total_charges", self.total_charges),
        ] {
            if let Some(value) = value.filter(|v| !v.is_finite() || *v < 0.0) {
                return Err(ChurnError::invalid_input(format!(
                    "{name} must be a non-negative amount, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Total charges as entered, or estimated from the monthly charge
    pub fn total_charges(&self) -> f64 {
        self.total_charges
            .unwrap_or(self.monthly_charges * f64::from(self.tenure.max(1)))
    }

    /// The submission as a cleaned-table record
    pub fn to_record(&self) -> CustomerRecord {
        CustomerRecord::new()
            .with_category("gender", self.gender.as_str())
            .with_number("SeniorCitizen", if self.senior_citizen { 1.0 } else { 0.0 })
            .with_category("Partner", self.partner.as_str())
            .with_category("Dependents", self.dependents.as_str())
            .with_number(TENURE, f64::from(self.tenure))
            .with_category("PhoneService", self.phone_service.as_str())
            .with_category("MultipleLines", self.multiple_lines.as_str())
            .with_category("InternetService", self.internet_service.as_str())
            .with_category("OnlineSecurity", self.online_security.as_str())
            .with_category("OnlineBackup", self.online_backup.as_str())
            .with_category("DeviceProtection", self.device_protection.as_str())
            .with_category("TechSupport", self.tech_support.as_str())
            .with_category("StreamingTV", self.streaming_tv.as_str())
            .with_category("StreamingMovies", self.streaming_movies.as_str())
            .with_category("Contract", self.contract.as_str())
            .with_category("PaperlessBilling", self.paperless_billing.as_str())
            .with_category("PaymentMethod", self.payment_method.as_str())
            .with_number("MonthlyCharges", self.monthly_charges)
            .with_number(TOTAL_CHARGES, self.total_charges())
    }
}

/// A loaded model ready to score form submissions
#[derive(Debug, Clone)]
pub struct Predictor {
    artifact: ModelArtifact,
    columns: ColumnIndex,
}

impl Predictor {
    /// Load a model artifact and check its schema against its encoding
    pub fn load(model_path: &Path) -> crate::Result<Self> {
        let predictor = Self::new(ModelArtifact::load(model_path)?)?;
        tracing::info!(
            "Loaded model {} ({} features, {})",
            model_path.display(),
            predictor.artifact.feature_names.len(),
            predictor.artifact.params
        );
        Ok(predictor)
    }

    /// Every model column must be one the embedded encoding can produce;
    /// anything else would silently stay 0 at inference time.
    pub fn new(artifact: ModelArtifact) -> crate::Result<Self> {
        let unknown: Vec<&str> = artifact
            .feature_names
            .iter()
            .map(String::as_str)
            .filter(|name| artifact.encoding.column_kind(name).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(ChurnError::schema(format!(
                "model columns not produced by its encoding: {}",
                unknown.join(", ")
            )));
        }

        let columns = ColumnIndex::new(&artifact.feature_names);
        Ok(Self { artifact, columns })
    }

    pub fn encoding(&self) -> &EncodingSpec {
        &self.artifact.encoding
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Feature row in model column order
    pub fn build_row(&self, input: &FormInput) -> crate::Result<Vec<f64>> {
        input.validate()?;
        self.encoding().encode_row(&input.to_record(), &self.columns)
    }

    /// Churn probability in `[0, 1]`
    pub fn predict(&self, input: &FormInput) -> crate::Result<f64> {
        let row = self.build_row(input)?;
        let probability = self.artifact.forest.predict_proba_row(ArrayView1::from(row.as_slice()))?;
        tracing::debug!(probability, "scored form input");
        Ok(probability)
    }
}
