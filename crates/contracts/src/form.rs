use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_FILE_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFile {
    pub path: PathBuf,
    pub content_type: String,
}

/// An HTTP POST submission: URL-encoded fields, multipart attachments or a raw JSON payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub url: String,
    pub fields: Vec<(String, String)>,
    pub json: Option<String>,
    pub files: BTreeMap<String, FormFile>,
}

impl Form {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn set_json(&mut self, json: impl Into<String>) -> &mut Self {
        self.json = Some(json.into());
        self
    }

    pub fn set_json_value<T: Serialize>(&mut self, value: &T) -> serde_json::Result<&mut Self> {
        let json = serde_json::to_string(value)?;
        Ok(self.set_json(json))
    }

    // A second file under the same field name replaces the first
    pub fn add_file(
        &mut self,
        field: impl Into<String>,
        path: impl Into<PathBuf>,
        content_type: impl Into<String>,
    ) -> &mut Self {
        self.files.insert(
            field.into(),
            FormFile {
                path: path.into(),
                content_type: content_type.into(),
            },
        );
        self
    }

    pub fn add_text_file(&mut self, field: impl Into<String>, path: impl Into<PathBuf>) -> &mut Self {
        self.add_file(field, path, DEFAULT_FILE_CONTENT_TYPE)
    }

    /// Removes fields and attachments. The JSON payload is left untouched.
    pub fn clear_fields(&mut self) {
        self.fields.clear();
        self.files.clear();
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_json(&self) -> bool {
        self.json.as_deref().is_some_and(|json| !json.is_empty())
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}
