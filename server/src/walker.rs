use protocol::ResultObject;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::{BackendError, CaseResult, ResultBackend};

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("cannot parse result file '{filename}': {reason}")]
    Parse { filename: String, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Turns one received result file into backend callbacks.
pub trait ResultWalker: Send + Sync {
    /// Returns `Ok(false)` for files this walker does not understand. A file
    /// that fails to parse produces no callbacks at all.
    fn walk(&self, result: &ResultObject, sink: &mut dyn ResultBackend) -> Result<bool, WalkError>;
}

/// Result files named `*results.json`, shaped
/// `{"cases": [{"name": .., "result": .., "insignificant": ..}]}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonResultWalker;

#[derive(Deserialize)]
struct ResultFile {
    cases: Vec<CaseEntry>,
}

#[derive(Deserialize)]
struct CaseEntry {
    name: String,
    result: String,
    #[serde(default)]
    insignificant: bool,
}

impl ResultWalker for JsonResultWalker {
    fn walk(&self, result: &ResultObject, sink: &mut dyn ResultBackend) -> Result<bool, WalkError> {
        if !result.filename.ends_with("results.json") {
            return Ok(false);
        }

        let file: ResultFile =
            serde_json::from_slice(&result.content).map_err(|e| WalkError::Parse {
                filename: result.filename.clone(),
                reason: e.to_string(),
            })?;

        sink.on_package_start(&result.package, &result.environment)?;
        for entry in file.cases {
            sink.on_case(&CaseResult {
                name: entry.name,
                result: entry.result,
                insignificant: entry.insignificant,
            })?;
        }
        sink.on_package_end()?;
        Ok(true)
    }
}
