//! Handoff to the external classification service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::error::ClassifyError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub labels: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub usage: Usage,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        title: &str,
        description: &str,
        taxonomy: &str,
    ) -> Result<Classification, ClassifyError>;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    title: &'a str,
    description: &'a str,
    taxonomy: &'a str,
}

pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpClassifier {
    pub fn new(client: reqwest::Client, config: &ClassifierConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        title: &str,
        description: &str,
        taxonomy: &str,
    ) -> Result<Classification, ClassifyError> {
        let mut request = self.client.post(&self.endpoint).json(&ClassifyRequest {
            title,
            description,
            taxonomy,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::Status(status.as_u16()));
        }
        Ok(response.json::<Classification>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape() {
        let body = serde_json::to_value(ClassifyRequest {
            title: "Data Engineer",
            description: "Build pipelines",
            taxonomy: "roles-v2",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "title": "Data Engineer",
                "description": "Build pipelines",
                "taxonomy": "roles-v2"
            })
        );
    }

    #[test]
    fn response_without_usage_defaults() {
        let c: Classification =
            serde_json::from_str(r#"{"labels":{"family":"data","seniority":["senior"]}}"#).unwrap();
        assert_eq!(c.labels["family"], "data");
        assert_eq!(c.usage, Usage::default());
    }

    #[test]
    fn response_with_usage() {
        let c: Classification = serde_json::from_str(
            r#"{"labels":{},"usage":{"input_tokens":812,"output_tokens":40,"cost":0.0031}}"#,
        )
        .unwrap();
        assert_eq!(c.usage.input_tokens, 812);
        assert!((c.usage.cost - 0.0031).abs() < 1e-12);
    }
}
