//! Uploaded audio asset descriptor

use serde::{Deserialize, Serialize};

/// Result of storing an uploaded audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedAudioFile {
    /// Where the file was stored on disk
    pub path: String,
    /// Duration in seconds
    pub duration: f64,
    /// Sample rate in Hz
    pub sample_rate: u32,
}
