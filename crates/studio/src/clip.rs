use serde::{Deserialize, Serialize};

/// A generated track as listed by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub title: String,
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub tags: String,
    pub created_at: Option<String>,
    /// Length in seconds.
    pub duration: Option<f64>,
}

impl Clip {
    /// Parse one clip object from an API response. Returns `None` when the
    /// object has no id.
    pub fn from_api(data: &serde_json::Value) -> Option<Self> {
        let id = data.get("id")?.as_str().filter(|s| !s.is_empty())?;
        let str_field = |key: &str| {
            data.get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let metadata = data.get("metadata");

        Some(Self {
            id: id.to_string(),
            title: str_field("title").unwrap_or_else(|| "Unknown".to_string()),
            audio_url: str_field("audio_url"),
            image_url: str_field("image_url").or_else(|| str_field("image_large_url")),
            tags: metadata
                .and_then(|m| m.get("tags"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            created_at: str_field("created_at"),
            duration: metadata
                .and_then(|m| m.get("duration"))
                .and_then(|v| v.as_f64()),
        })
    }

    /// Parse the `clips` array of a page response, dropping entries without
    /// an id.
    pub fn list_from_page(page: &serde_json::Value) -> Vec<Self> {
        page.get("clips")
            .and_then(|v| v.as_array())
            .map(|clips| clips.iter().filter_map(Self::from_api).collect())
            .unwrap_or_default()
    }
}
