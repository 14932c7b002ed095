use serde::{Deserialize, Serialize};

/// A control invocation sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(rename = "AppID", default)]
    pub app_id: String,
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "Control")]
    pub control: String,
}

/// The outcome of a control. Application level failures travel in `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub const fn ok() -> Self {
        Self { error: None }
    }

    pub fn error(error: impl ToString) -> Self {
        Self { error: Some(error.to_string()) }
    }
}
