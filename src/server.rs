//! HTTP front end for single-customer churn predictions
//!
//! `GET /` serves an HTML form whose option lists come from the model's
//! encoding, `POST /predict` scores a form submission, `POST /api/predict`
//! scores a JSON body.

use crate::error::ChurnError;
use crate::features::EncodingSpec;
use crate::form::{FormInput, Predictor, MAX_TENURE};
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Default listen address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8501";

/// Shared, read-only server state
#[derive(Debug, Clone)]
pub struct AppState {
    pub predictor: Arc<Predictor>,
}

impl AppState {
    pub fn new(predictor: Predictor) -> Self {
        Self {
            predictor: Arc::new(predictor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub features: usize,
    pub trained_at: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/predict", post(predict_form))
        .route("/api/predict", post(predict_json))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped
pub async fn serve(predictor: Predictor, addr: SocketAddr) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Churn form listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(AppState::new(predictor))).await?;
    Ok(())
}

fn status_for(err: &ChurnError) -> StatusCode {
    match err {
        ChurnError::InvalidInput(_) | ChurnError::UnknownCategory { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let artifact = state.predictor.artifact();
    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        features: artifact.feature_names.len(),
        trained_at: artifact.trained_at.to_rfc3339(),
    };
    (StatusCode::OK, Json(health))
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render_page(state.predictor.encoding(), None))
}

pub async fn predict_form(
    State(state): State<AppState>,
    Form(input): Form<FormInput>,
) -> (StatusCode, Html<String>) {
    let encoding = state.predictor.encoding();
    match state.predictor.predict(&input) {
        Ok(probability) => {
            let message = format!(
                r#"<p class="result">Estimated churn probability: {:.1}%</p>"#,
                probability * 100.0
            );
            (StatusCode::OK, Html(render_page(encoding, Some(&message))))
        }
        Err(e) => {
            tracing::warn!("Rejected form submission: {e}");
            let message = format!(r#"<p class="error">{}</p>"#, escape(&e.to_string()));
            (status_for(&e), Html(render_page(encoding, Some(&message))))
        }
    }
}

pub async fn predict_json(
    State(state): State<AppState>,
    Json(input): Json<FormInput>,
) -> Result<(StatusCode, Json<PredictionResponse>), (StatusCode, Json<ErrorResponse>)> {
    match state.predictor.predict(&input) {
        Ok(probability) => Ok((StatusCode::OK, Json(PredictionResponse { probability }))),
        Err(e) => Err((
            status_for(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Form select fields: (input name, encoding column, label)
const SELECT_FIELDS: [(&str, &str, &str); 15] = [
    ("gender", "gender", "Gender"),
    ("partner", "Partner", "Has partner"),
    ("dependents", "Dependents", "Has dependents"),
    ("phone_service", "PhoneService", "Phone service"),
    ("multiple_lines", "MultipleLines", "Multiple lines"),
    ("internet_service", "InternetService", "Internet service"),
    ("online_security", "OnlineSecurity", "Online security"),
    ("online_backup", "OnlineBackup", "Online backup"),
    ("device_protection", "DeviceProtection", "Device protection"),
    ("tech_support", "TechSupport", "Tech support"),
    ("streaming_tv", "StreamingTV", "Streaming TV"),
    ("streaming_movies", "StreamingMovies", "Streaming movies"),
    ("contract", "Contract", "Contract"),
    ("paperless_billing", "PaperlessBilling", "Paperless billing"),
    ("payment_method", "PaymentMethod", "Payment method"),
];

/// Category options for a column, first entry preselected
fn options(encoding: &EncodingSpec, column: &str) -> Vec<String> {
    if let Some(mapping) = encoding.binary_mapping(column) {
        mapping.labels.to_vec()
    } else if let Some(field) = encoding.categorical_field(column) {
        field.categories.clone()
    } else {
        Vec::new()
    }
}

fn render_page(encoding: &EncodingSpec, message: Option<&str>) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Telecom Churn Predictor</title></head>\n<body>\n",
    );
    html.push_str("<h1>Telecom Churn Predictor</h1>\n");
    html.push_str("<p>Fill in the customer details and press Predict to see their churn risk.</p>\n");
    if let Some(message) = message {
        html.push_str(message);
        html.push('\n');
    }
    html.push_str("<form method=\"post\" action=\"/predict\">\n");

    for (name, column, label) in SELECT_FIELDS {
        html.push_str(&format!("<label>{label} <select name=\"{name}\">\n"));
        for (i, option) in options(encoding, column).iter().enumerate() {
            let option = escape(option);
            let selected = if i == 0 { " selected" } else { "" };
            html.push_str(&format!("<option value=\"{option}\"{selected}>{option}</option>\n"));
        }
        html.push_str("</select></label><br>\n");
    }

    html.push_str("<label>Senior citizen <input type=\"checkbox\" name=\"senior_citizen\"></label><br>\n");
    html.push_str(&format!(
        "<label>Tenure (months) <input type=\"number\" name=\"tenure\" min=\"0\" max=\"{MAX_TENURE}\" step=\"1\" value=\"12\"></label><br>\n"
    ));
    html.push_str("<label>Monthly charges ($) <input type=\"number\" name=\"monthly_charges\" min=\"0\" step=\"0.01\" value=\"70.0\"></label><br>\n");
    html.push_str("<label>Total charges ($) <input type=\"number\" name=\"total_charges\" min=\"0\" step=\"0.01\" placeholder=\"monthly x tenure\"></label><br>\n");
    html.push_str("<button type=\"submit\">Predict churn risk</button>\n</form>\n</body>\n</html>\n");
    html
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
