//! Tools for FOXSI-4 science: SDO data retrieval and the shared flight/flare
//! observation information.

pub mod app;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod jsoc;
pub mod obs_info;
pub mod output;
