use serde::{Deserialize, Serialize};

/// Metadata of the file uploaded with a diagnosis request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Request-scoped values threaded into every node of a run.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentVariables {
    /// bearer token forwarded to every interface
    pub token: String,
    pub file_meta: Option<FileMeta>,
    pub file_data: Option<Vec<u8>>,
}

impl EnvironmentVariables {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn with_file(
        mut self,
        meta: FileMeta,
        data: Vec<u8>,
    ) -> Self {
        self.file_meta = Some(meta);
        self.file_data = Some(data);
        self
    }
}
