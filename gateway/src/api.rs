use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use riskflow_core::registry::AgentRole;

// Input: which merchant to analyze
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub merchant_id: String,   // Who is being reviewed?
    pub days: Option<i64>,     // How far back? (defaults from config)
    pub roles: Option<Vec<String>>, // Which stages, in order? (defaults to all)
}

// One line of GET /roles
#[derive(Debug, Serialize)]
pub struct RoleSummary {
    pub name: String,
    pub allowed_tools: Vec<String>,
}

impl From<&AgentRole> for RoleSummary {
    fn from(role: &AgentRole) -> Self {
        Self {
            name: role.name.clone(),
            allowed_tools: role.allowed_tools.iter().cloned().collect(),
        }
    }
}

// Output when we refuse a request
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self)).into_response()
    }
}
