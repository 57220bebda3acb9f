use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use foxsi4_science_tools::app::{App, FetchOptions, ProgressEvent, ProgressSink, SdoDownload};
use foxsi4_science_tools::domain::{Channel, Query, Wavelength};
use foxsi4_science_tools::error::F4stError;
use foxsi4_science_tools::fetch::{FailedItem, RemoteFile};
use foxsi4_science_tools::jsoc::JsocClient;
use foxsi4_science_tools::obs_info::ObsInfo;

const OBS: &str = r#"
flight:
  foxsi4:
    launch_time:
      utc: "2024-04-17T22:13:00"
      clock: 0
flare:
  time_of_interest:
    start:
      utc: "2024-04-17T21:57:00"
    end:
      utc: "2024-04-17T22:30:00"
"#;

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Clone, Default)]
struct Behavior {
    files: Vec<&'static str>,
    /// How many download attempts of each file fail before one succeeds.
    failures: usize,
    search_error: bool,
    /// Every matched record has no online data.
    offline: bool,
}

#[derive(Default)]
struct ScriptedClient {
    behaviors: HashMap<String, Behavior>,
    searches: Mutex<Vec<Channel>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl ScriptedClient {
    fn with(mut self, channel: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(channel.to_string(), behavior);
        self
    }

    fn searches(&self) -> Vec<Channel> {
        self.searches.lock().unwrap().clone()
    }

    fn attempts(&self, file_name: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }

    fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().values().sum()
    }
}

impl JsocClient for ScriptedClient {
    fn search(&self, query: &Query) -> Result<Vec<RemoteFile>, F4stError> {
        self.searches.lock().unwrap().push(query.channel);
        let behavior = self
            .behaviors
            .get(&query.channel.to_string())
            .cloned()
            .unwrap_or_default();
        if behavior.search_error {
            return Err(F4stError::SearchStatus {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(behavior
            .files
            .iter()
            .map(|name| RemoteFile {
                url: (!behavior.offline).then(|| format!("http://jsoc.invalid/{name}")),
                file_name: format!("{}.{name}", query.channel),
            })
            .collect())
    }

    fn download(&self, file: &RemoteFile, destination: &Path) -> Result<(), F4stError> {
        let (channel, _) = file.file_name.split_once('.').unwrap();
        let failures = self
            .behaviors
            .get(channel)
            .map(|behavior| behavior.failures)
            .unwrap_or(0);
        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry(file.file_name.clone()).or_insert(0);
        *count += 1;
        if *count <= failures {
            return Err(F4stError::TransferHttp("connection reset".to_string()));
        }
        std::fs::write(destination, b"SIMPLE  =                    T").unwrap();
        Ok(())
    }
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn waves(values: &[u32]) -> Vec<Wavelength> {
    values
        .iter()
        .map(|value| Wavelength::new(*value).unwrap())
        .collect()
}

fn app(client: ScriptedClient) -> App<ScriptedClient> {
    App::new(client, Arc::new(ObsInfo::from_yaml_str(OBS).unwrap()))
}

fn request(root: &Utf8PathBuf, wavelengths: &[u32], get_hmi: bool) -> SdoDownload {
    SdoDownload {
        directory: Some(root.clone()),
        wavelengths: Some(waves(wavelengths)),
        get_hmi,
        ..SdoDownload::default()
    }
}

fn client_of(app: &App<ScriptedClient>) -> &ScriptedClient {
    app.client()
}

#[test]
fn one_initial_search_per_channel_in_order() {
    let (_temp, root) = temp_root();
    let app = app(ScriptedClient::default());

    let needed = app
        .sdo_download(
            request(&root, &[171, 94, 1600], true),
            FetchOptions::default(),
            &NoopSink,
        )
        .unwrap();

    assert!(needed.is_empty());
    let mut expected = waves(&[171, 94, 1600])
        .into_iter()
        .map(Channel::Aia)
        .collect::<Vec<_>>();
    expected.push(Channel::HmiLosMagneticField);
    assert_eq!(client_of(&app).searches(), expected);
    assert!(root.join("171angstrom").as_std_path().is_dir());
    assert!(root.join("hmi").as_std_path().is_dir());
}

#[test]
fn no_channels_means_no_calls() {
    let (_temp, root) = temp_root();
    let app = app(ScriptedClient::default());

    let needed = app
        .sdo_download(request(&root, &[], false), FetchOptions::default(), &NoopSink)
        .unwrap();

    assert!(needed.is_empty());
    assert!(client_of(&app).searches().is_empty());
}

#[test]
fn hmi_only_download() {
    let (_temp, root) = temp_root();
    let client = ScriptedClient::default().with(
        "LOS_magnetic_field",
        Behavior {
            files: vec!["m1.fits"],
            ..Behavior::default()
        },
    );
    let app = app(client);

    let report = app
        .sdo_download_report(request(&root, &[], true), FetchOptions::default(), &NoopSink)
        .unwrap();

    assert_eq!(
        client_of(&app).searches(),
        vec![Channel::HmiLosMagneticField]
    );
    assert_eq!(report.channels.len(), 1);
    assert_eq!(report.channels[0].files, 1);
    assert!(
        root.join("hmi")
            .join("LOS_magnetic_field.m1.fits")
            .as_std_path()
            .is_file()
    );
}

#[test]
fn failures_within_retry_budget_are_not_reported() {
    let (_temp, root) = temp_root();
    // initial attempt plus four retries fail, the fifth retry succeeds
    let client = ScriptedClient::default().with(
        "171",
        Behavior {
            files: vec!["a.fits", "b.fits"],
            failures: 5,
            ..Behavior::default()
        },
    );
    let app = app(client);

    let needed = app
        .sdo_download(request(&root, &[171], false), FetchOptions::default(), &NoopSink)
        .unwrap();

    assert!(needed.is_empty());
    assert_eq!(client_of(&app).attempts("171.a.fits"), 6);
    assert_eq!(client_of(&app).searches().len(), 1);
}

#[test]
fn exhausted_failures_are_one_batch() {
    let (_temp, root) = temp_root();
    let client = ScriptedClient::default().with(
        "171",
        Behavior {
            files: vec!["a.fits", "b.fits", "c.fits"],
            failures: usize::MAX,
            ..Behavior::default()
        },
    );
    let app = app(client);

    let needed = app
        .sdo_download(request(&root, &[171], false), FetchOptions::default(), &NoopSink)
        .unwrap();

    assert_eq!(needed.len(), 1);
    assert_eq!(needed.batches()[0].len(), 3);
    assert_eq!(needed.total_failures(), 3);
    for failure in &needed.batches()[0] {
        assert_matches!(failure.item, FailedItem::File { .. });
    }
    // one initial attempt plus five retries, and never a second search
    assert_eq!(client_of(&app).attempts("171.b.fits"), 6);
    assert_eq!(client_of(&app).searches().len(), 1);
    assert!(!root.join("171angstrom").join("171.b.fits").as_std_path().exists());
}

#[test]
fn partially_failed_channel_reports_only_missing_files() {
    let (_temp, root) = temp_root();
    let client = ScriptedClient::default().with(
        "171",
        Behavior {
            files: vec!["a.fits"],
            failures: usize::MAX,
            ..Behavior::default()
        },
    );
    let client = client.with(
        "94",
        Behavior {
            files: vec!["ok.fits"],
            ..Behavior::default()
        },
    );
    let app = app(client);

    let report = app
        .sdo_download_report(
            request(&root, &[94, 171], false),
            FetchOptions::default(),
            &NoopSink,
        )
        .unwrap();

    assert_eq!(report.needed_files.len(), 1);
    assert_eq!(report.channels[0].files, 1);
    assert_eq!(report.channels[0].failed, 0);
    assert_eq!(report.channels[1].failed, 1);
    assert_matches!(
        &report.needed_files.batches()[0][0].item,
        FailedItem::File { file, .. } if file.file_name == "171.a.fits"
    );
}

#[test]
fn needed_files_accumulate_across_channels() {
    let (_temp, root) = temp_root();
    let failing = Behavior {
        files: vec!["x.fits"],
        failures: usize::MAX,
        ..Behavior::default()
    };
    let client = ScriptedClient::default()
        .with("171", failing.clone())
        .with(
            "94",
            Behavior {
                files: vec!["y.fits"],
                ..Behavior::default()
            },
        )
        .with("211", failing);
    let app = app(client);

    let needed = app
        .sdo_download(
            request(&root, &[171, 94, 211], false),
            FetchOptions::default(),
            &NoopSink,
        )
        .unwrap();

    assert_eq!(needed.len(), 2);
    assert_matches!(
        &needed.batches()[0][0].item,
        FailedItem::File { file, .. } if file.file_name == "171.x.fits"
    );
    assert_matches!(
        &needed.batches()[1][0].item,
        FailedItem::File { file, .. } if file.file_name == "211.x.fits"
    );
}

#[test]
fn offline_channel_is_one_batch_without_retries() {
    let (_temp, root) = temp_root();
    let client = ScriptedClient::default()
        .with(
            "171",
            Behavior {
                files: vec!["a.fits", "b.fits"],
                offline: true,
                ..Behavior::default()
            },
        )
        .with(
            "94",
            Behavior {
                files: vec!["y.fits"],
                ..Behavior::default()
            },
        );
    let app = app(client);

    let report = app
        .sdo_download_report(
            request(&root, &[171, 94], false),
            FetchOptions::default(),
            &NoopSink,
        )
        .unwrap();

    assert_eq!(report.needed_files.len(), 1);
    assert_eq!(report.needed_files.batches()[0].len(), 2);
    for failure in &report.needed_files.batches()[0] {
        assert_matches!(
            &failure.item,
            FailedItem::Offline { file, path }
                if file.url.is_none() && path.starts_with(root.join("171angstrom"))
        );
        assert!(!failure.is_resumable());
    }
    assert_eq!(report.channels[0].failed, 2);
    assert_eq!(report.channels[0].files, 0);
    assert_eq!(client_of(&app).attempts("171.a.fits"), 0);
    assert_eq!(client_of(&app).total_attempts(), 1);
    assert_eq!(client_of(&app).searches().len(), 2);
}

#[test]
fn search_failure_is_reported_and_later_channels_continue() {
    let (_temp, root) = temp_root();
    let client = ScriptedClient::default()
        .with(
            "171",
            Behavior {
                search_error: true,
                ..Behavior::default()
            },
        )
        .with(
            "94",
            Behavior {
                files: vec!["y.fits"],
                ..Behavior::default()
            },
        );
    let app = app(client);

    let needed = app
        .sdo_download(
            request(&root, &[171, 94], false),
            FetchOptions::default(),
            &NoopSink,
        )
        .unwrap();

    assert_eq!(needed.len(), 1);
    assert_eq!(needed.batches()[0].len(), 1);
    assert_matches!(
        &needed.batches()[0][0].item,
        FailedItem::Search { query } if query.channel == Channel::Aia(waves(&[171])[0])
    );
    assert_eq!(client_of(&app).searches().len(), 2);
    assert!(
        root.join("94angstrom")
            .join("94.y.fits")
            .as_std_path()
            .is_file()
    );
}

#[test]
fn zero_tries_disables_retries() {
    let (_temp, root) = temp_root();
    let client = ScriptedClient::default().with(
        "171",
        Behavior {
            files: vec!["a.fits"],
            failures: 1,
            ..Behavior::default()
        },
    );
    let app = app(client);
    let options = FetchOptions {
        tries: 0,
        overwrite: false,
    };

    let needed = app
        .sdo_download(request(&root, &[171], false), options, &NoopSink)
        .unwrap();

    assert_eq!(needed.total_failures(), 1);
    assert_eq!(client_of(&app).attempts("171.a.fits"), 1);
}

#[test]
fn rerun_reuses_directories_and_existing_files() {
    let (_temp, root) = temp_root();
    let client = ScriptedClient::default().with(
        "171",
        Behavior {
            files: vec!["a.fits", "b.fits"],
            ..Behavior::default()
        },
    );
    let app = app(client);

    app.sdo_download(request(&root, &[171], true), FetchOptions::default(), &NoopSink)
        .unwrap();
    assert_eq!(client_of(&app).total_attempts(), 2);

    let report = app
        .sdo_download_report(request(&root, &[171], true), FetchOptions::default(), &NoopSink)
        .unwrap();
    assert!(report.needed_files.is_empty());
    assert_eq!(report.channels[0].files, 2);
    assert_eq!(client_of(&app).total_attempts(), 2);

    let options = FetchOptions {
        overwrite: true,
        ..FetchOptions::default()
    };
    app.sdo_download(request(&root, &[171], false), options, &NoopSink)
        .unwrap();
    assert_eq!(client_of(&app).total_attempts(), 4);
}

#[test]
fn missing_obs_window_is_fatal() {
    let (_temp, root) = temp_root();
    let app = App::new(
        ScriptedClient::default(),
        Arc::new(ObsInfo::from_yaml_str("flight: {}").unwrap()),
    );

    let err = app
        .sdo_download(request(&root, &[171], false), FetchOptions::default(), &NoopSink)
        .unwrap_err();

    assert_matches!(err, F4stError::MissingObsKey(_));
    assert!(client_of(&app).searches().is_empty());
}

#[test]
fn unwritable_directory_is_fatal() {
    let (_temp, root) = temp_root();
    let blocker = root.join("not-a-dir");
    std::fs::write(blocker.as_std_path(), b"").unwrap();
    let app = app(ScriptedClient::default());

    let err = app
        .sdo_download(
            request(&blocker, &[171], false),
            FetchOptions::default(),
            &NoopSink,
        )
        .unwrap_err();

    assert_matches!(err, F4stError::Filesystem(_));
    assert!(client_of(&app).searches().is_empty());
}
