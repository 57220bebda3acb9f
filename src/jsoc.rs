use std::fs::File;
use std::path::Path;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Channel, Query};
use crate::error::F4stError;
use crate::fetch::RemoteFile;

pub const JSOC_BASE_URL: &str = "http://jsoc.stanford.edu";

static T_REC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})[.-](\d{2})[.-](\d{2})[T_](\d{2}):(\d{2}):(\d{2})")
        .expect("T_REC pattern is valid")
});

/// Search and transfer collaborator for SDO data.
pub trait JsocClient: Send + Sync {
    /// Lists the files matching the query. Does not download anything.
    fn search(&self, query: &Query) -> Result<Vec<RemoteFile>, F4stError>;
    /// Downloads one matched file to `destination`.
    fn download(&self, file: &RemoteFile, destination: &Path) -> Result<(), F4stError>;
}

#[derive(Clone)]
pub struct JsocHttpClient {
    client: Client,
    base_url: String,
}

impl JsocHttpClient {
    pub fn new() -> Result<Self, F4stError> {
        Self::with_base_url(JSOC_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, F4stError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("f4st/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| F4stError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| F4stError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn info_url(&self) -> String {
        format!("{}/cgi-bin/ajax/jsoc_info", self.base_url)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, reqwest::Error>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, delay_ms = delay, "jsoc.retry");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(error = %err, delay_ms = delay, "jsoc.retry");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl JsocClient for JsocHttpClient {
    fn search(&self, query: &Query) -> Result<Vec<RemoteFile>, F4stError> {
        let url = self.info_url();
        let record_set = record_set(query);
        debug!(%record_set, "jsoc.search");
        let response = self
            .send_with_retries(|| {
                self.client.get(&url).query(&[
                    ("ds", record_set.as_str()),
                    ("op", "rs_list"),
                    ("key", "T_REC"),
                    ("seg", query.channel.segment()),
                ])
            })
            .map_err(|err| F4stError::SearchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "JSOC search failed".to_string());
            return Err(F4stError::SearchStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| F4stError::SearchHttp(err.to_string()))?;
        parse_rs_list(&self.base_url, query, &body)
    }

    fn download(&self, file: &RemoteFile, destination: &Path) -> Result<(), F4stError> {
        let Some(url) = file.url.as_deref() else {
            return Err(F4stError::TransferHttp(format!(
                "{} has no online copy",
                file.file_name
            )));
        };
        let mut response = self
            .send_with_retries(|| self.client.get(url))
            .map_err(|err| F4stError::TransferHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "file transfer failed".to_string());
            return Err(F4stError::TransferStatus { status, message });
        }
        let mut out =
            File::create(destination).map_err(|err| F4stError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut out)
            .map_err(|err| F4stError::TransferHttp(err.to_string()))?;
        Ok(())
    }
}

/// JSOC record-set specification covering the query window inclusively.
pub fn record_set(query: &Query) -> String {
    let format = "%Y.%m.%d_%H:%M:%S_UTC";
    let window = format!(
        "{}-{}",
        query.start.as_datetime().format(format),
        query.end.as_datetime().format(format)
    );
    match query.channel {
        Channel::Aia(wave) => format!("{}[{window}][{wave}]", query.channel.series()),
        Channel::HmiLosMagneticField => format!("{}[{window}]", query.channel.series()),
    }
}

#[derive(Debug, Deserialize)]
struct RsListResponse {
    status: i64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    keywords: Vec<Column>,
    #[serde(default)]
    segments: Vec<Column>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
    #[serde(default)]
    values: Vec<String>,
}

/// Turns a `jsoc_info?op=rs_list` response into downloadable files.
///
/// Records without an online segment (JSOC reports a placeholder such as
/// `NoDataDirectory` instead of a path) are kept with no URL, so they still
/// surface as failures.
pub fn parse_rs_list(
    base_url: &str,
    query: &Query,
    body: &str,
) -> Result<Vec<RemoteFile>, F4stError> {
    let response: RsListResponse =
        serde_json::from_str(body).map_err(|err| F4stError::SearchHttp(err.to_string()))?;
    if response.status != 0 {
        return Err(F4stError::SearchStatus {
            status: 200,
            message: response
                .error
                .unwrap_or_else(|| format!("jsoc_info status {}", response.status)),
        });
    }

    let segment = query.channel.segment();
    let paths = response
        .segments
        .into_iter()
        .find(|column| column.name == segment)
        .map(|column| column.values)
        .unwrap_or_default();
    let records = response
        .keywords
        .into_iter()
        .find(|column| column.name == "T_REC")
        .map(|column| column.values)
        .unwrap_or_default();

    let base_url = base_url.trim_end_matches('/');
    let files = paths
        .iter()
        .enumerate()
        .map(|(index, path)| {
            let t_rec = records
                .get(index)
                .map(|value| compact_t_rec(value))
                .unwrap_or_else(|| format!("record{index}"));
            RemoteFile {
                url: path
                    .starts_with('/')
                    .then(|| format!("{base_url}{path}")),
                file_name: format!(
                    "{}.{}.{}.{}.fits",
                    query.channel.series(),
                    t_rec,
                    query.channel,
                    segment
                ),
            }
        })
        .collect();
    Ok(files)
}

/// `2024.04.17_21:57:00_TAI` -> `20240417_215700`.
pub fn compact_t_rec(value: &str) -> String {
    match T_REC_PATTERN.captures(value) {
        Some(caps) => format!(
            "{}{}{}_{}{}{}",
            &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]
        ),
        None => value
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
            .collect(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
