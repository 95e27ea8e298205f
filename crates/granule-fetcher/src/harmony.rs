//! NASA Harmony OGC coverages adapter.
//!
//! A rangeset request either answers with granules inline or with a job
//! document that is polled at `{endpoint}/jobs/{jobID}`. Both bodies are JSON.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use aq_common::{BoundingBox, Granule, TimeWindow};

use crate::error::ProviderError;
use crate::provider::{DataProvider, JobHandle, JobStatus, ProviderResponse, SubQuery};

/// Default Harmony production endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://harmony.earthdata.nasa.gov";

/// Harmony-backed [`DataProvider`].
pub struct HarmonyProvider {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HarmonyProvider {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Rangeset URL for a sub-query (without query parameters).
    pub fn rangeset_url(&self, query: &SubQuery) -> String {
        format!(
            "{}/{}/ogc-api-coverages/1.0.0/collections/{}/coverage/rangeset",
            self.endpoint, query.dataset.collection_id, query.dataset.variable
        )
    }

    fn job_url(&self, job: &JobHandle) -> String {
        job.status_url
            .clone()
            .unwrap_or_else(|| format!("{}/jobs/{}", self.endpoint, job.job_id))
    }

    async fn get_json(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<HarmonyBody, ProviderError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), truncate(&body, 200)));
        }
        response
            .json::<HarmonyBody>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn fetch_links(
        &self,
        doc: &JobDoc,
        query_source: &str,
    ) -> Result<Vec<Granule>, ProviderError> {
        let mut granules = Vec::new();
        for link in doc.links.iter().filter(|l| l.rel.as_deref() == Some("data")) {
            debug!(href = %link.href, job_id = %doc.job_id, "Fetching job output");
            match self.get_json(self.client.get(&link.href)).await? {
                HarmonyBody::Granules { granules: docs } => {
                    for d in docs {
                        granules.push(d.into_granule(query_source)?);
                    }
                }
                HarmonyBody::Single(d) => granules.push(d.into_granule(query_source)?),
                HarmonyBody::Job(_) => {
                    return Err(ProviderError::InvalidResponse(
                        "job output link returned a job document".to_string(),
                    ))
                }
            }
        }
        Ok(granules)
    }
}

#[async_trait]
impl DataProvider for HarmonyProvider {
    fn name(&self) -> &str {
        "harmony"
    }

    #[instrument(skip(self, query), fields(subquery = %query.label()))]
    async fn submit(&self, query: &SubQuery) -> Result<ProviderResponse, ProviderError> {
        let params = subset_params(&query.bbox, &query.window);
        let request = self.client.get(self.rangeset_url(query)).query(&params);
        match self.get_json(request).await? {
            HarmonyBody::Job(doc) => {
                debug!(job_id = %doc.job_id, status = %doc.status, "Harmony job submitted");
                Ok(ProviderResponse::Job(JobHandle {
                    job_id: doc.job_id,
                    status_url: None,
                }))
            }
            HarmonyBody::Granules { granules } => granules
                .into_iter()
                .map(|d| d.into_granule(&query.dataset.collection_id))
                .collect::<Result<Vec<_>, _>>()
                .map(ProviderResponse::Inline),
            HarmonyBody::Single(d) => Ok(ProviderResponse::Inline(vec![
                d.into_granule(&query.dataset.collection_id)?
            ])),
        }
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, ProviderError> {
        let doc = match self.get_json(self.client.get(self.job_url(job))).await? {
            HarmonyBody::Job(doc) => doc,
            _ => {
                return Err(ProviderError::InvalidResponse(format!(
                    "job {} status is not a job document",
                    job.job_id
                )))
            }
        };

        match doc.status.to_ascii_lowercase().as_str() {
            "successful" | "complete_with_errors" => {
                let source = doc.job_id.clone();
                let mut granules = Vec::new();
                for d in doc.granules.clone() {
                    granules.push(d.into_granule(&source)?);
                }
                granules.extend(self.fetch_links(&doc, &source).await?);
                Ok(JobStatus::Successful(granules))
            }
            "failed" | "canceled" => Ok(JobStatus::Failed(
                doc.message
                    .unwrap_or_else(|| format!("job {}", doc.status)),
            )),
            _ => Ok(JobStatus::Running {
                progress: doc.progress,
            }),
        }
    }
}

/// OGC subset parameters for a tile and time span.
pub fn subset_params(bbox: &BoundingBox, window: &TimeWindow) -> Vec<(&'static str, String)> {
    vec![
        ("subset", format!("lon({}:{})", bbox.min_x, bbox.max_x)),
        ("subset", format!("lat({}:{})", bbox.min_y, bbox.max_y)),
        (
            "subset",
            format!(
                "time(\"{}\":\"{}\")",
                window.start().to_rfc3339_opts(SecondsFormat::Secs, true),
                window.end().to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
        ),
        ("format", "application/json".to_string()),
    ]
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if let Some(status) = e.status() {
        ProviderError::from_status(status.as_u16(), e.to_string())
    } else {
        ProviderError::Connection(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ============================================================================
// Wire documents
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum HarmonyBody {
    Job(JobDoc),
    Granules { granules: Vec<GranuleDoc> },
    Single(GranuleDoc),
}

#[derive(Debug, Clone, Deserialize)]
struct JobDoc {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    links: Vec<LinkDoc>,
    #[serde(default)]
    granules: Vec<GranuleDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct LinkDoc {
    href: String,
    #[serde(default)]
    rel: Option<String>,
}

/// One granule as encoded on the wire. `null` samples are missing.
#[derive(Debug, Clone, Deserialize)]
struct GranuleDoc {
    #[serde(default)]
    id: Option<String>,
    crs: String,
    /// `[min_x, min_y, max_x, max_y]`
    bbox: [f64; 4],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    width: usize,
    height: usize,
    values: Vec<Option<f32>>,
    #[serde(default)]
    fill_value: Option<f32>,
}

impl GranuleDoc {
    fn into_granule(self, source_id: &str) -> Result<Granule, ProviderError> {
        let coverage = TimeWindow::new(self.start, self.end)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let fill = self.fill_value;
        let missing: Vec<bool> = self
            .values
            .iter()
            .map(|v| match (v, fill) {
                (None, _) => true,
                (Some(v), Some(f)) => *v == f,
                (Some(_), None) => false,
            })
            .collect();
        let values: Vec<f32> = self.values.iter().map(|v| v.unwrap_or(f32::NAN)).collect();

        let [min_x, min_y, max_x, max_y] = self.bbox;
        let mut granule = Granule::new(
            "",
            BoundingBox::new(min_x, min_y, max_x, max_y),
            self.crs,
            coverage,
            self.width,
            self.height,
            values,
            source_id,
        )
        .with_missing(missing);
        if let Some(id) = self.id {
            granule = granule.with_granule_id(id);
        }
        Ok(granule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetConfig;
    use aq_common::CrsCode;

    fn query() -> SubQuery {
        SubQuery {
            index: 0,
            dataset: DatasetConfig::new("NO2", "C3685668972-LARC_CLOUD", "vertical_column_troposphere"),
            bbox: BoundingBox::new(-100.0, 30.0, -95.0, 35.0),
            crs: CrsCode::Epsg4326,
            window: TimeWindow::parse("2024-06-01T00:00:00Z/2024-06-01T06:00:00Z").unwrap(),
        }
    }

    #[test]
    fn test_rangeset_url() {
        let provider =
            HarmonyProvider::new("https://harmony.example/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            provider.rangeset_url(&query()),
            "https://harmony.example/C3685668972-LARC_CLOUD/ogc-api-coverages/1.0.0/collections/vertical_column_troposphere/coverage/rangeset"
        );
    }

    #[test]
    fn test_subset_params() {
        let q = query();
        let params = subset_params(&q.bbox, &q.window);
        assert_eq!(params[0].1, "lon(-100:-95)");
        assert_eq!(params[1].1, "lat(30:35)");
        assert_eq!(
            params[2].1,
            "time(\"2024-06-01T00:00:00Z\":\"2024-06-01T06:00:00Z\")"
        );
    }

    #[test]
    fn test_parse_job_document() {
        let json = r#"{"jobID":"abc-123","status":"running","progress":40,"links":[]}"#;
        match serde_json::from_str::<HarmonyBody>(json).unwrap() {
            HarmonyBody::Job(doc) => {
                assert_eq!(doc.job_id, "abc-123");
                assert_eq!(doc.progress, Some(40));
            }
            other => panic!("expected job, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_inline_granule_with_fill_value() {
        let json = r#"{
            "granules": [{
                "id": "G1",
                "crs": "EPSG:4326",
                "bbox": [-100.0, 30.0, -99.0, 31.0],
                "start": "2024-06-01T00:00:00Z",
                "end": "2024-06-01T01:00:00Z",
                "width": 2,
                "height": 1,
                "values": [1.5e15, -9999.0],
                "fill_value": -9999.0
            }]
        }"#;
        let docs = match serde_json::from_str::<HarmonyBody>(json).unwrap() {
            HarmonyBody::Granules { granules } => granules,
            other => panic!("expected granules, got {:?}", other),
        };
        let granule = docs[0].clone().into_granule("C1").unwrap();
        assert_eq!(granule.provenance.granule_id, "G1");
        assert_eq!(granule.provenance.source_id, "C1");
        assert_eq!(granule.missing, vec![false, true]);
        assert!(granule.validate_shape().is_ok());
        assert_eq!(granule.valid_count(), 1);
    }

    #[test]
    fn test_null_samples_are_missing() {
        let json = r#"{
            "crs": "EPSG:4326",
            "bbox": [0.0, 0.0, 1.0, 1.0],
            "start": "2024-06-01T00:00:00Z",
            "end": "2024-06-01T01:00:00Z",
            "width": 1,
            "height": 2,
            "values": [null, 3.0]
        }"#;
        let doc = match serde_json::from_str::<HarmonyBody>(json).unwrap() {
            HarmonyBody::Single(d) => d,
            other => panic!("expected single granule, got {:?}", other),
        };
        let granule = doc.into_granule("C1").unwrap();
        assert_eq!(granule.sample(0, 0), None);
        assert_eq!(granule.sample(0, 1), Some(3.0));
    }
}
