use async_trait::async_trait;
use serde::Deserialize;

use super::{http_client, RawJob, SearchParams, SourceAdapter, SourceError, SourceErrorKind};

const API_URL: &str = "https://remoteok.com/api";

pub struct RemoteOkAdapter {
    client: reqwest::Client,
}

/// The feed's first element is a legal notice without job fields, so
/// everything is optional and rows without an id/position are dropped.
#[derive(Deserialize)]
struct RemoteOkEntry {
    id: Option<serde_json::Value>,
    position: Option<String>,
    company: Option<String>,
    description: Option<String>,
    url: Option<String>,
    location: Option<String>,
    salary_min: Option<i64>,
    salary_max: Option<i64>,
    date: Option<String>,
}

impl RemoteOkAdapter {
    pub fn new() -> Self {
        RemoteOkAdapter { client: http_client() }
    }
}

impl Default for RemoteOkAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for RemoteOkAdapter {
    fn name(&self) -> &'static str {
        "RemoteOK"
    }

    async fn fetch_jobs(&self, params: &SearchParams) -> Result<Vec<RawJob>, SourceError> {
        let response = self
            .client
            .get(API_URL)
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(
                status,
                format!("RemoteOK returned {status}"),
            ));
        }

        let entries: Vec<RemoteOkEntry> = response
            .json()
            .await
            .map_err(|e| SourceError::new(SourceErrorKind::Parse, e.to_string()))?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let id = entry.id.map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })?;
                let title = entry.position?;
                Some(RawJob {
                    external_id: Some(id),
                    title,
                    company: entry.company.unwrap_or_default(),
                    description: entry.description.unwrap_or_default(),
                    source_url: entry.url,
                    location: entry.location,
                    salary_min: entry.salary_min,
                    salary_max: entry.salary_max,
                    posted_date: entry.date.map(|d| d.chars().take(10).collect()),
                })
            })
            .take(params.results_per_page as usize)
            .collect())
    }
}
