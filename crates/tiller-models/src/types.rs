use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Available,
    Downloading,
    Installing,
    Error,
    Removed,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelStatus::Available => write!(f, "available"),
            ModelStatus::Downloading => write!(f, "downloading"),
            ModelStatus::Installing => write!(f, "installing"),
            ModelStatus::Error => write!(f, "error"),
            ModelStatus::Removed => write!(f, "removed"),
        }
    }
}

impl std::str::FromStr for ModelStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "available" => Ok(ModelStatus::Available),
            "downloading" => Ok(ModelStatus::Downloading),
            "installing" => Ok(ModelStatus::Installing),
            "error" => Ok(ModelStatus::Error),
            "removed" => Ok(ModelStatus::Removed),
            other => Err(format!("unknown model status: {}", other)),
        }
    }
}

/// One catalog row. Created by sync or by a download request.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub size_bytes: u64,
    pub family: String,
    pub format: String,
    pub parameter_size: String,
    pub quantization: String,
    pub status: ModelStatus,
    pub is_default: bool,
    pub is_enabled: bool,
    pub progress: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
    pub last_used_at: Option<String>,
}

/// Per-model generation settings. One row per model; defaults apply when
/// the row is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repeat_penalty: f64,
    pub context_length: u32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            context_length: 4096,
            max_tokens: 2048,
            system_prompt: String::new(),
        }
    }
}

/// Partial update for a model config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfigPatch {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f64>,
    pub context_length: Option<u32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl ModelConfig {
    pub fn apply(mut self, patch: &ModelConfigPatch) -> Self {
        if let Some(v) = patch.temperature {
            self.temperature = v;
        }
        if let Some(v) = patch.top_p {
            self.top_p = v;
        }
        if let Some(v) = patch.top_k {
            self.top_k = v;
        }
        if let Some(v) = patch.repeat_penalty {
            self.repeat_penalty = v;
        }
        if let Some(v) = patch.context_length {
            self.context_length = v;
        }
        if let Some(v) = patch.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = &patch.system_prompt {
            self.system_prompt = v.clone();
        }
        self
    }
}

/// Partial update for a catalog row's editable fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPatch {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub is_enabled: Option<bool>,
}

/// Snapshot returned by the download-status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStatus {
    pub id: String,
    pub name: String,
    pub status: ModelStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Introspection of the installable-models cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub cached_models_count: usize,
    pub last_updated: Option<String>,
    pub ttl_hours: u64,
    pub is_expired: bool,
    pub time_until_expiry_ns: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            ModelStatus::Available,
            ModelStatus::Downloading,
            ModelStatus::Installing,
            ModelStatus::Error,
            ModelStatus::Removed,
        ] {
            assert_eq!(ModelStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn config_patch_overrides_only_given_fields() {
        let patched = ModelConfig::default().apply(&ModelConfigPatch {
            temperature: Some(0.2),
            system_prompt: Some("be terse".into()),
            ..Default::default()
        });
        assert_eq!(patched.temperature, 0.2);
        assert_eq!(patched.system_prompt, "be terse");
        assert_eq!(patched.top_k, 40);
    }
}
