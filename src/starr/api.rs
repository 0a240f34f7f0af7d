use super::{QueueItem, QueuePage, QueueSource, StarrApp};
use crate::config::StarrAppConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Records requested per poll
pub const PAGE_SIZE: usize = 100;

/// HTTP client for the `/queue` endpoint of an *arr application
pub struct StarrApi {
    app: StarrApp,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl StarrApi {
    /// Build a client using the app's URL, API key and timeout
    pub fn new(app: StarrApp, config: &StarrAppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            app,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn queue_url(&self) -> String {
        format!("{}/api/{}/queue", self.base_url, self.app.api_version())
    }

    fn error(&self, reason: impl std::fmt::Display) -> Error {
        Error::Starr {
            app: self.app.display_name().to_string(),
            operation: "get queue".to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl QueueSource for StarrApi {
    fn name(&self) -> &str {
        self.app.name()
    }

    async fn fetch_queue(&self) -> Result<QueuePage> {
        let response = self
            .client
            .get(self.queue_url())
            .header("X-Api-Key", &self.api_key)
            .query(&[("page", "1"), ("pageSize", &PAGE_SIZE.to_string())])
            .send()
            .await
            .map_err(|e| self.error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.error(format!("HTTP {}", status)));
        }

        let raw: RawQueuePage = response.json().await.map_err(|e| self.error(e))?;

        Ok(QueuePage {
            total_records: raw.total_records,
            records: raw.records.into_iter().map(QueueItem::from).collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQueuePage {
    #[serde(default)]
    total_records: usize,
    #[serde(default)]
    records: Vec<RawQueueRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawQueueRecord {
    id: i64,
    output_path: Option<String>,
    protocol: Option<String>,
    status: Option<String>,
    title: Option<String>,
    size: f64,
    download_id: Option<String>,
    tracked_download_state: Option<String>,
}

impl From<RawQueueRecord> for QueueItem {
    fn from(raw: RawQueueRecord) -> Self {
        Self {
            id: raw.id,
            output_path: raw.output_path.unwrap_or_default().into(),
            protocol: raw.protocol.unwrap_or_default(),
            status: raw.status.unwrap_or_default(),
            title: raw.title.unwrap_or_default(),
            size: raw.size.max(0.0) as u64,
            download_id: raw.download_id.unwrap_or_default(),
            tracked_download_state: raw.tracked_download_state.unwrap_or_default(),
        }
    }
}
