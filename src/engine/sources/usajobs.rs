use async_trait::async_trait;
use serde::Deserialize;

use super::{http_client, RawJob, SearchParams, SourceAdapter, SourceError, SourceErrorKind};

const API_URL: &str = "https://data.usajobs.gov/api/search";

pub struct UsaJobsAdapter {
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UsaJobsResponse {
    search_result: SearchResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResult {
    search_result_items: Vec<SearchResultItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResultItem {
    matched_object_id: String,
    matched_object_descriptor: Descriptor,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Descriptor {
    position_title: String,
    organization_name: Option<String>,
    #[serde(rename = "PositionURI")]
    position_uri: Option<String>,
    position_location_display: Option<String>,
    publication_start_date: Option<String>,
    user_area: Option<UserArea>,
    position_remuneration: Option<Vec<Remuneration>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserArea {
    details: Option<Details>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Details {
    job_summary: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Remuneration {
    minimum_range: Option<String>,
    maximum_range: Option<String>,
}

impl UsaJobsAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        UsaJobsAdapter { api_key, client: http_client() }
    }
}

#[async_trait]
impl SourceAdapter for UsaJobsAdapter {
    fn name(&self) -> &'static str {
        "USAJobs"
    }

    async fn fetch_jobs(&self, params: &SearchParams) -> Result<Vec<RawJob>, SourceError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            SourceError::new(SourceErrorKind::Auth, "USAJobs API key not configured")
        })?;

        let response = self
            .client
            .get(API_URL)
            .header("Authorization-Key", api_key)
            .query(&[
                ("Keyword", params.keywords.join(" ")),
                ("ResultsPerPage", params.results_per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(
                status,
                format!("USAJobs returned {status}"),
            ));
        }

        let body: UsaJobsResponse = response
            .json()
            .await
            .map_err(|e| SourceError::new(SourceErrorKind::Parse, e.to_string()))?;

        Ok(body
            .search_result
            .search_result_items
            .into_iter()
            .map(|item| {
                let descriptor = item.matched_object_descriptor;
                let (salary_min, salary_max) = descriptor
                    .position_remuneration
                    .as_ref()
                    .and_then(|r| r.first())
                    .map(|r| {
                        (
                            r.minimum_range.as_deref().and_then(|s| s.parse::<f64>().ok()),
                            r.maximum_range.as_deref().and_then(|s| s.parse::<f64>().ok()),
                        )
                    })
                    .unwrap_or((None, None));
                RawJob {
                    external_id: Some(item.matched_object_id),
                    title: descriptor.position_title,
                    company: descriptor.organization_name.unwrap_or_default(),
                    description: descriptor
                        .user_area
                        .and_then(|u| u.details)
                        .and_then(|d| d.job_summary)
                        .unwrap_or_default(),
                    source_url: descriptor.position_uri,
                    location: descriptor.position_location_display,
                    salary_min: salary_min.map(|s| s as i64),
                    salary_max: salary_max.map(|s| s as i64),
                    posted_date: descriptor
                        .publication_start_date
                        .map(|d| d.chars().take(10).collect()),
                }
            })
            .collect())
    }
}
