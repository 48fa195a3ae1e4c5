use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl HttpMethod {
    /// Whether the parameters travel in the query string instead of the body.
    pub fn uses_query(&self) -> bool {
        matches!(self, HttpMethod::GET | HttpMethod::DELETE)
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::POST => reqwest::Method::POST,
            HttpMethod::PUT => reqwest::Method::PUT,
            HttpMethod::PATCH => reqwest::Method::PATCH,
            HttpMethod::DELETE => reqwest::Method::DELETE,
        }
    }
}

/// Target descriptor of a node: where and how to call it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceConfig {
    /// scheme and authority, eg. `http://diagnosis-model:8080`
    pub base_url: String,
    #[serde(default)]
    pub path_prefix: String,
    /// path template, may contain `{name}` placeholders
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// request timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl InterfaceConfig {
    pub fn new(
        base_url: impl Into<String>,
        path: impl Into<String>,
        method: HttpMethod,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            method,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// Joins base url, prefix and an already resolved path without doubling slashes.
    pub fn full_url(
        &self,
        resolved_path: &str,
    ) -> String {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        for segment in [self.path_prefix.as_str(), resolved_path] {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        url
    }
}
