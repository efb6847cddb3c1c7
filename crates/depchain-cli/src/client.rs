//! HTTP client for the depchain API.

use crate::config::CliConfig;
use depchain_core::buildset::{BuildResult, Buildset};
use depchain_core::ids::SourceStampId;
use depchain_core::pending::{BuildRequest, PendingBuildsetRequest};
use depchain_core::sourcestamp::{NewSourceStamp, SourceStamp};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Server error ({status}): {message}")]
    Server { status: StatusCode, message: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulerSummary {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub builder: Option<String>,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulerList {
    pub schedulers: Vec<SchedulerSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub scheduler: String,
    pub ssid: SourceStampId,
    pub outcome: String,
    #[serde(default)]
    pub buildsets: Vec<Buildset>,
    #[serde(default)]
    pub unmet: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingList {
    pub scheduler: String,
    pub pending: Vec<PendingBuildsetRequest>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub source_stamp: SourceStamp,
    pub triggered: Vec<String>,
    #[serde(default)]
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub examined: u64,
    pub admitted: u64,
    pub waiting: u64,
    pub failed: u64,
    pub expired: u64,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    ssid: &'a str,
    #[serde(flatten)]
    request: &'a BuildRequest,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &CliConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/api/v1{}", self.base_url, path);
        self.client.request(method, &url)
    }

    async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, ApiError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }

        let message = res.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(message)),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => Err(ApiError::Rejected(message)),
            _ => Err(ApiError::Server { status, message }),
        }
    }

    pub async fn list_schedulers(&self) -> Result<SchedulerList, ApiError> {
        let res = self.request(Method::GET, "/schedulers").send().await?;
        Self::decode(res).await
    }

    pub async fn request_build(
        &self,
        scheduler: &str,
        ssid: &str,
        request: &BuildRequest,
    ) -> Result<SubmitOutcome, ApiError> {
        let res = self
            .request(Method::POST, &format!("/schedulers/{}/requests", scheduler))
            .json(&SubmitBody { ssid, request })
            .send()
            .await?;
        Self::decode(res).await
    }

    pub async fn pending(&self, scheduler: &str, ssid: Option<&str>) -> Result<PendingList, ApiError> {
        let path = match ssid {
            Some(ssid) => format!("/schedulers/{}/pending/{}", scheduler, ssid),
            None => format!("/schedulers/{}/pending", scheduler),
        };
        let res = self.request(Method::GET, &path).send().await?;
        Self::decode(res).await
    }

    pub async fn cancel(&self, scheduler: &str, ssid: &str) -> Result<u64, ApiError> {
        #[derive(Deserialize)]
        struct Cancelled {
            cancelled: u64,
        }

        let res = self
            .request(Method::DELETE, &format!("/schedulers/{}/pending/{}", scheduler, ssid))
            .send()
            .await?;
        Ok(Self::decode::<Cancelled>(res).await?.cancelled)
    }

    pub async fn complete(&self, buildset_id: &str, result: BuildResult) -> Result<Buildset, ApiError> {
        let res = self
            .request(Method::POST, &format!("/buildsets/{}/complete", buildset_id))
            .json(&serde_json::json!({ "result": result }))
            .send()
            .await?;
        Self::decode(res).await
    }

    pub async fn commit(&self, stamp: &NewSourceStamp) -> Result<CommitOutcome, ApiError> {
        let res = self.request(Method::POST, "/changes").json(stamp).send().await?;
        Self::decode(res).await
    }

    pub async fn expire(&self, older_than_secs: u64) -> Result<u64, ApiError> {
        #[derive(Deserialize)]
        struct Expired {
            expired: u64,
        }

        let res = self
            .request(Method::POST, "/pending/expire")
            .json(&serde_json::json!({ "older_than_secs": older_than_secs }))
            .send()
            .await?;
        Ok(Self::decode::<Expired>(res).await?.expired)
    }

    pub async fn reconcile(&self) -> Result<ReconcileSummary, ApiError> {
        let res = self.request(Method::POST, "/reconcile").send().await?;
        Self::decode(res).await
    }
}
