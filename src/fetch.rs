use std::fmt;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::Query;
use crate::error::F4stError;
use crate::fs_util;
use crate::jsoc::JsocClient;

/// One file matched by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    /// `None` when the record matched but its data is not online.
    pub url: Option<String>,
    /// Name chosen by the data source; the file is stored under it.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailedItem {
    /// The search itself failed, so there is nothing to narrow a retry to.
    Search { query: Query },
    File {
        file: RemoteFile,
        path: Utf8PathBuf,
    },
    /// Matched, but the source has no data to transfer for it.
    Offline {
        file: RemoteFile,
        path: Utf8PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub item: FailedItem,
    pub message: String,
}

impl FetchFailure {
    fn search(query: &Query, err: &F4stError) -> Self {
        Self {
            item: FailedItem::Search {
                query: query.clone(),
            },
            message: err.to_string(),
        }
    }

    fn file(file: RemoteFile, path: Utf8PathBuf, err: &F4stError) -> Self {
        Self {
            item: FailedItem::File { file, path },
            message: err.to_string(),
        }
    }

    fn offline(file: RemoteFile, path: Utf8PathBuf) -> Self {
        Self {
            item: FailedItem::Offline { file, path },
            message: "record matched but its data is not online".to_string(),
        }
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self.item, FailedItem::File { .. })
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            FailedItem::Search { query } => write!(f, "search {query}: {}", self.message),
            FailedItem::File { file, path } => {
                let url = file.url.as_deref().unwrap_or("-");
                write!(f, "{url} -> {path}: {}", self.message)
            }
            FailedItem::Offline { file, path } => {
                write!(f, "{} -> {path}: {}", file.file_name, self.message)
            }
        }
    }
}

/// Outcome of one search+fetch, resumable for the files that failed.
///
/// [`FetchHandle::resume`] consumes the handle and transfers only the
/// previously failed files again; the search is never repeated.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    query: Query,
    directory: Utf8PathBuf,
    overwrite: bool,
    files: Vec<Utf8PathBuf>,
    errors: Vec<FetchFailure>,
}

impl FetchHandle {
    pub fn search_and_fetch<C: JsocClient + ?Sized>(
        client: &C,
        query: Query,
        directory: Utf8PathBuf,
        overwrite: bool,
    ) -> Self {
        let mut handle = Self {
            query,
            directory,
            overwrite,
            files: Vec::new(),
            errors: Vec::new(),
        };
        match client.search(&handle.query) {
            Ok(matched) => {
                debug!(query = %handle.query, matched = matched.len(), "search complete");
                handle.transfer(client, matched);
            }
            Err(err) => {
                warn!(query = %handle.query, error = %err, "search failed");
                handle.errors.push(FetchFailure::search(&handle.query, &err));
            }
        }
        handle
    }

    pub fn resume<C: JsocClient + ?Sized>(self, client: &C) -> Self {
        let Self {
            query,
            directory,
            overwrite,
            files,
            errors,
        } = self;
        let (retry, kept): (Vec<_>, Vec<_>) =
            errors.into_iter().partition(FetchFailure::is_resumable);

        let mut next = Self {
            query,
            directory,
            overwrite,
            files,
            errors: kept,
        };
        let pending = retry
            .into_iter()
            .filter_map(|failure| match failure.item {
                FailedItem::File { file, .. } => Some(file),
                FailedItem::Search { .. } | FailedItem::Offline { .. } => None,
            })
            .collect();
        next.transfer(client, pending);
        next
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Paths written (or already present) so far.
    pub fn files(&self) -> &[Utf8PathBuf] {
        &self.files
    }

    pub fn errors(&self) -> &[FetchFailure] {
        &self.errors
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_resumable(&self) -> bool {
        self.errors.iter().any(FetchFailure::is_resumable)
    }

    /// The failures left on this handle, if any.
    pub fn unresolved(&self) -> Option<Vec<FetchFailure>> {
        (!self.errors.is_empty()).then(|| self.errors.clone())
    }

    fn transfer<C: JsocClient + ?Sized>(&mut self, client: &C, pending: Vec<RemoteFile>) {
        for file in pending {
            let path = self.directory.join(&file.file_name);
            if file.url.is_none() {
                debug!(%path, "record offline");
                self.errors.push(FetchFailure::offline(file, path));
                continue;
            }
            if !self.overwrite && path.as_std_path().exists() {
                debug!(%path, "already downloaded");
                self.files.push(path);
                continue;
            }
            match fs_util::write_atomic(&path, |temp| client.download(&file, temp)) {
                Ok(()) => self.files.push(path),
                Err(err) => {
                    debug!(%path, error = %err, "transfer failed");
                    self.errors.push(FetchFailure::file(file, path, &err));
                }
            }
        }
    }
}
