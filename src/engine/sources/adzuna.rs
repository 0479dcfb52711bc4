use async_trait::async_trait;
use serde::Deserialize;

use super::{http_client, RawJob, SearchParams, SourceAdapter, SourceError, SourceErrorKind};

const API_BASE: &str = "https://api.adzuna.com/v1/api/jobs/us/search/1";

pub struct AdzunaAdapter {
    app_id: Option<String>,
    app_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct AdzunaResponse {
    results: Vec<AdzunaJob>,
}

#[derive(Deserialize)]
struct AdzunaJob {
    id: String,
    title: String,
    company: Option<AdzunaCompany>,
    description: String,
    redirect_url: Option<String>,
    location: Option<AdzunaLocation>,
    salary_min: Option<f64>,
    salary_max: Option<f64>,
    created: Option<String>,
}

#[derive(Deserialize)]
struct AdzunaCompany {
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct AdzunaLocation {
    display_name: Option<String>,
}

impl AdzunaAdapter {
    pub fn new(app_id: Option<String>, app_key: Option<String>) -> Self {
        AdzunaAdapter {
            app_id,
            app_key,
            client: http_client(),
        }
    }
}

#[async_trait]
impl SourceAdapter for AdzunaAdapter {
    fn name(&self) -> &'static str {
        "Adzuna"
    }

    async fn fetch_jobs(&self, params: &SearchParams) -> Result<Vec<RawJob>, SourceError> {
        let (app_id, app_key) = match (&self.app_id, &self.app_key) {
            (Some(id), Some(key)) => (id, key),
            _ => {
                return Err(SourceError::new(
                    SourceErrorKind::Auth,
                    "Adzuna credentials not configured",
                ))
            }
        };

        let response = self
            .client
            .get(API_BASE)
            .query(&[
                ("app_id", app_id.as_str()),
                ("app_key", app_key.as_str()),
                ("what", &params.keywords.join(" ")),
                ("results_per_page", &params.results_per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(
                status,
                format!("Adzuna returned {status}"),
            ));
        }

        let body: AdzunaResponse = response
            .json()
            .await
            .map_err(|e| SourceError::new(SourceErrorKind::Parse, e.to_string()))?;

        Ok(body
            .results
            .into_iter()
            .map(|job| RawJob {
                external_id: Some(job.id),
                title: job.title,
                company: job
                    .company
                    .and_then(|c| c.display_name)
                    .unwrap_or_default(),
                description: job.description,
                source_url: job.redirect_url,
                location: job.location.and_then(|l| l.display_name),
                salary_min: job.salary_min.map(|s| s as i64),
                salary_max: job.salary_max.map(|s| s as i64),
                // Adzuna "created" is RFC-3339; keep the date part.
                posted_date: job.created.map(|c| c.chars().take(10).collect()),
            })
            .collect())
    }
}
