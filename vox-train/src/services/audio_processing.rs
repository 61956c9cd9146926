//! Uploaded audio storage
//!
//! Stores uploaded audio under the upload directory and reports basic
//! properties. WAV headers are read with `hound`; for anything else the
//! sample rate is assumed to be 44.1 kHz and the duration is estimated from
//! the byte count.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vox_common::{ids, Error, Result};

use crate::models::ProcessedAudioFile;

/// Sample rate assumed when the format is not inspected
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// Subdirectory of the upload dir holding processed uploads
pub const PROCESSED_SUBDIR: &str = "processed";

const DEFAULT_EXTENSION: &str = "wav";

/// Store a single uploaded asset and describe it
pub async fn process_audio_file(
    bytes: &[u8],
    original_name: Option<&str>,
    upload_dir: &Path,
) -> Result<ProcessedAudioFile> {
    if bytes.is_empty() {
        return Err(Error::InvalidInput("Uploaded audio file is empty".to_string()));
    }

    let (duration, sample_rate) = inspect_audio(bytes);

    let dir = upload_dir.join(PROCESSED_SUBDIR);
    let file_name = format!(
        "processed_{}.{}",
        ids::generate_file_stem(),
        extension_of(original_name)
    );
    let path = write_upload(&dir, &file_name, bytes).await?;

    info!(
        path = %path.display(),
        bytes = bytes.len(),
        duration,
        sample_rate,
        "Stored uploaded audio"
    );

    Ok(ProcessedAudioFile {
        path: path.to_string_lossy().into_owned(),
        duration,
        sample_rate,
    })
}

/// Store one training file from a multipart submission
///
/// Returns the stored path, which is handed to the worker unchanged.
pub async fn store_training_upload(
    bytes: &[u8],
    original_name: Option<&str>,
    upload_dir: &Path,
) -> Result<PathBuf> {
    if bytes.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Uploaded training file is empty: {}",
            original_name.unwrap_or("<unnamed>")
        )));
    }

    let file_name = format!(
        "audioFiles-{}.{}",
        ids::generate_file_stem(),
        extension_of(original_name)
    );
    let path = write_upload(upload_dir, &file_name, bytes).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "Stored training upload");
    Ok(path)
}

/// Duration in seconds and sample rate
fn inspect_audio(bytes: &[u8]) -> (f64, u32) {
    match hound::WavReader::new(Cursor::new(bytes)) {
        Ok(reader) => {
            let spec = reader.spec();
            // duration() counts frames, not interleaved samples
            let frames = reader.duration();
            let duration = if spec.sample_rate == 0 {
                0.0
            } else {
                frames as f64 / spec.sample_rate as f64
            };
            (duration, spec.sample_rate)
        }
        Err(e) => {
            debug!(error = %e, "Not a readable WAV; estimating duration from size");
            (bytes.len() as f64 / FALLBACK_SAMPLE_RATE as f64, FALLBACK_SAMPLE_RATE)
        }
    }
}

/// Extension of the client-supplied name, restricted to ASCII alphanumerics
fn extension_of(original_name: Option<&str>) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

async fn write_upload(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
