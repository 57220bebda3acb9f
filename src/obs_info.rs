use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde_yaml::Value;

use crate::domain::ObsTime;
use crate::error::F4stError;

/// Environment variable that overrides the observation information location.
pub const OBS_INFO_ENV: &str = "F4ST_OBS_INFO";

const LAUNCH_UTC: &str = "flight.foxsi4.launch_time.utc";
const LAUNCH_CLOCK: &str = "flight.foxsi4.launch_time.clock";
const FLARE_START_UTC: &str = "flare.time_of_interest.start.utc";
const FLARE_END_UTC: &str = "flare.time_of_interest.end.utc";

static SHARED: OnceLock<Arc<ObsInfo>> = OnceLock::new();

/// Flight and flare information, read once from YAML and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ObsInfo {
    root: Value,
}

impl ObsInfo {
    pub fn from_yaml_str(content: &str) -> Result<Self, F4stError> {
        let root: Value = serde_yaml::from_str(content)
            .map_err(|err| F4stError::ObsInfoParse(err.to_string()))?;
        if !root.is_mapping() {
            return Err(F4stError::ObsInfoParse(
                "top level of the file is not a mapping".to_string(),
            ));
        }
        Ok(Self { root })
    }

    /// Nested lookup, one key per level.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.root, |node, key| node.get(*key))
    }

    /// Nested lookup with a dotted key such as `flight.foxsi4.launch_time.utc`.
    pub fn lookup(&self, dotted: &str) -> Option<&Value> {
        let path = dotted.split('.').collect::<Vec<_>>();
        self.get(&path)
    }

    pub fn str_at(&self, dotted: &str) -> Result<&str, F4stError> {
        self.require(dotted)?
            .as_str()
            .ok_or_else(|| F4stError::InvalidObsValue {
                key: dotted.to_string(),
                expected: "a string",
            })
    }

    pub fn i64_at(&self, dotted: &str) -> Result<i64, F4stError> {
        self.require(dotted)?
            .as_i64()
            .ok_or_else(|| F4stError::InvalidObsValue {
                key: dotted.to_string(),
                expected: "an integer",
            })
    }

    pub fn time_at(&self, dotted: &str) -> Result<ObsTime, F4stError> {
        self.str_at(dotted)?
            .parse()
            .map_err(|_| F4stError::InvalidObsValue {
                key: dotted.to_string(),
                expected: "a UTC timestamp",
            })
    }

    pub fn launch_time_utc(&self) -> Result<ObsTime, F4stError> {
        self.time_at(LAUNCH_UTC)
    }

    pub fn launch_clock(&self) -> Result<i64, F4stError> {
        self.i64_at(LAUNCH_CLOCK)
    }

    pub fn flare_start_utc(&self) -> Result<ObsTime, F4stError> {
        self.time_at(FLARE_START_UTC)
    }

    pub fn flare_end_utc(&self) -> Result<ObsTime, F4stError> {
        self.time_at(FLARE_END_UTC)
    }

    pub fn to_yaml_string(&self) -> Result<String, F4stError> {
        serde_yaml::to_string(&self.root).map_err(|err| F4stError::ObsInfoParse(err.to_string()))
    }

    fn require(&self, dotted: &str) -> Result<&Value, F4stError> {
        self.lookup(dotted)
            .ok_or_else(|| F4stError::MissingObsKey(dotted.to_string()))
    }
}

pub struct ObsInfoLoader;

impl ObsInfoLoader {
    /// Loads any YAML file into an [`ObsInfo`] mapping.
    pub fn load_yaml(path: &Path) -> Result<ObsInfo, F4stError> {
        let content =
            fs::read_to_string(path).map_err(|_| F4stError::ObsInfoRead(path.to_path_buf()))?;
        ObsInfo::from_yaml_str(&content)
    }

    /// Loads the observation parameters shipped with the crate, or the file
    /// named by `F4ST_OBS_INFO`.
    pub fn load_obs_info() -> Result<ObsInfo, F4stError> {
        Self::load_yaml(&default_obs_info_path())
    }

    pub fn resolve(path: Option<&Path>) -> Result<ObsInfo, F4stError> {
        match path {
            Some(path) => Self::load_yaml(path),
            None => Self::load_obs_info(),
        }
    }
}

pub fn default_obs_info_path() -> PathBuf {
    match std::env::var_os(OBS_INFO_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("observational-information")
            .join("observation-parameters.yaml"),
    }
}

/// Process-wide observation information, loaded on first use.
///
/// The first successful call fixes the value for the rest of the process;
/// `path` is only consulted by that call. A failed load leaves the slot
/// empty and returns the error.
pub fn shared(path: Option<&Path>) -> Result<Arc<ObsInfo>, F4stError> {
    if let Some(info) = SHARED.get() {
        return Ok(Arc::clone(info));
    }
    let loaded = Arc::new(ObsInfoLoader::resolve(path)?);
    Ok(Arc::clone(SHARED.get_or_init(|| loaded)))
}
