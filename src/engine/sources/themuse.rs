use async_trait::async_trait;
use serde::Deserialize;

use super::{http_client, RawJob, SearchParams, SourceAdapter, SourceError, SourceErrorKind};

const API_URL: &str = "https://www.themuse.com/api/public/jobs";

pub struct TheMuseAdapter {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MuseResponse {
    results: Vec<MuseJob>,
}

#[derive(Deserialize)]
struct MuseJob {
    id: i64,
    name: String,
    company: Option<MuseCompany>,
    contents: Option<String>,
    refs: Option<MuseRefs>,
    locations: Option<Vec<MuseLocation>>,
    publication_date: Option<String>,
}

#[derive(Deserialize)]
struct MuseCompany {
    name: Option<String>,
}

#[derive(Deserialize)]
struct MuseRefs {
    landing_page: Option<String>,
}

#[derive(Deserialize)]
struct MuseLocation {
    name: Option<String>,
}

impl TheMuseAdapter {
    pub fn new() -> Self {
        TheMuseAdapter { client: http_client() }
    }
}

impl Default for TheMuseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for TheMuseAdapter {
    fn name(&self) -> &'static str {
        "TheMuse"
    }

    async fn fetch_jobs(&self, params: &SearchParams) -> Result<Vec<RawJob>, SourceError> {
        let response = self
            .client
            .get(API_URL)
            .query(&[("page", "1"), ("descending", "true")])
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(
                status,
                format!("TheMuse returned {status}"),
            ));
        }

        let body: MuseResponse = response
            .json()
            .await
            .map_err(|e| SourceError::new(SourceErrorKind::Parse, e.to_string()))?;

        Ok(body
            .results
            .into_iter()
            .map(|job| RawJob {
                external_id: Some(job.id.to_string()),
                title: job.name,
                company: job.company.and_then(|c| c.name).unwrap_or_default(),
                description: job.contents.unwrap_or_default(),
                source_url: job.refs.and_then(|r| r.landing_page),
                location: job
                    .locations
                    .and_then(|ls| ls.into_iter().next())
                    .and_then(|l| l.name),
                salary_min: None,
                salary_max: None,
                posted_date: job.publication_date.map(|d| d.chars().take(10).collect()),
            })
            .take(params.results_per_page as usize)
            .collect())
    }
}
