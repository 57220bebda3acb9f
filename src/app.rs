use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::domain::{self, Channel, ObsTime, Query, Wavelength};
use crate::error::F4stError;
use crate::fetch::{FetchFailure, FetchHandle};
use crate::fs_util;
use crate::jsoc::JsocClient;
use crate::obs_info::ObsInfo;

/// Retry rounds allowed per channel after the initial fetch.
pub const DEFAULT_TRIES: usize = 5;

/// One SDO download request. `None` fields fall back to the defaults:
/// the flare time of interest, the current directory and the nine standard
/// AIA wavelengths.
#[derive(Debug, Clone, Default)]
pub struct SdoDownload {
    pub start_time: Option<ObsTime>,
    pub end_time: Option<ObsTime>,
    pub directory: Option<Utf8PathBuf>,
    pub wavelengths: Option<Vec<Wavelength>>,
    pub get_hmi: bool,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub tries: usize,
    pub overwrite: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            overwrite: false,
        }
    }
}

/// Failures that survived every retry, one batch per unrecoverable channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NeededFiles(Vec<Vec<FetchFailure>>);

impl NeededFiles {
    pub fn push_batch(&mut self, batch: Vec<FetchFailure>) {
        self.0.push(batch);
    }

    pub fn batches(&self) -> &[Vec<FetchFailure>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn total_failures(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub channel: Channel,
    pub directory: Utf8PathBuf,
    pub files: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub start_time: ObsTime,
    pub end_time: ObsTime,
    pub directory: Utf8PathBuf,
    pub channels: Vec<ChannelReport>,
    pub needed_files: NeededFiles,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<C: JsocClient> {
    client: C,
    obs_info: Arc<ObsInfo>,
}

impl<C: JsocClient> App<C> {
    pub fn new(client: C, obs_info: Arc<ObsInfo>) -> Self {
        Self { client, obs_info }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn obs_info(&self) -> &ObsInfo {
        &self.obs_info
    }

    /// Downloads SDO/AIA (and optionally SDO/HMI LOS) data and returns the
    /// files that could not be retrieved.
    pub fn sdo_download(
        &self,
        request: SdoDownload,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<NeededFiles, F4stError> {
        Ok(self.sdo_download_report(request, options, sink)?.needed_files)
    }

    pub fn sdo_download_report(
        &self,
        request: SdoDownload,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, F4stError> {
        let start_time = match request.start_time {
            Some(time) => time,
            None => self.obs_info.flare_start_utc()?,
        };
        let end_time = match request.end_time {
            Some(time) => time,
            None => self.obs_info.flare_end_utc()?,
        };
        let directory = match request.directory {
            Some(dir) => dir,
            None => current_dir()?,
        };
        let wavelengths = request
            .wavelengths
            .unwrap_or_else(domain::default_wavelengths);

        let mut needed_files = NeededFiles::default();
        let mut channels = Vec::new();
        for channel in domain::channels(&wavelengths, request.get_hmi) {
            let channel_dir = directory.join(channel.dir_name());
            info!("Doing {channel_dir}");
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; channel {channel} -> {channel_dir}"),
                elapsed: None,
            });
            fs_util::ensure_dir(&channel_dir)?;

            let started = Instant::now();
            let query = Query::new(start_time, end_time, channel);
            let handle = FetchHandle::search_and_fetch(
                &self.client,
                query,
                channel_dir.clone(),
                options.overwrite,
            );
            let handle = handle_retries(&self.client, handle, options.tries);
            if let Some(batch) = handle.unresolved() {
                needed_files.push_batch(batch);
            }

            sink.event(ProgressEvent {
                message: format!(
                    "phase=Store; channel {channel} files={} failed={}",
                    handle.files().len(),
                    handle.errors().len()
                ),
                elapsed: Some(started.elapsed()),
            });
            channels.push(ChannelReport {
                channel,
                directory: channel_dir,
                files: handle.files().len(),
                failed: handle.errors().len(),
            });
        }

        info!(
            batches = needed_files.len(),
            files = needed_files.total_failures(),
            "Files Needed are:"
        );
        for failure in needed_files.batches().iter().flatten() {
            info!("{failure}");
        }

        Ok(DownloadReport {
            start_time,
            end_time,
            directory,
            channels,
            needed_files,
        })
    }
}

/// Resumes `handle` up to `tries` times, stopping as soon as nothing is left
/// to retry. Only the failed subset of the original fetch is transferred
/// again.
pub fn handle_retries<C: JsocClient + ?Sized>(
    client: &C,
    mut handle: FetchHandle,
    tries: usize,
) -> FetchHandle {
    for attempt in 1..=tries {
        if !handle.is_resumable() {
            break;
        }
        info!(
            attempt,
            failed = handle.errors().len(),
            query = %handle.query(),
            "Trying again"
        );
        handle = handle.resume(client);
    }
    handle
}

fn current_dir() -> Result<Utf8PathBuf, F4stError> {
    let cwd = std::env::current_dir().map_err(|err| F4stError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|_| F4stError::Filesystem("non-utf8 current directory".to_string()))
}
