//! Shared helpers for vox-train integration tests
//!
//! Workers are faked with small `sh` scripts so the tests exercise the real
//! process plumbing without a Python toolchain.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use vox_train::config::TrainerConfig;
use vox_train::models::TrainingJob;
use vox_train::services::JobRegistry;

/// Upper bound for any wait on a worker
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Write an `sh` worker script into `dir`
pub fn write_worker_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path
}

/// Memory-only config rooted in `root`, running `script` through `sh`
pub fn config_with_worker(root: &Path, script: &Path) -> TrainerConfig {
    let mut config = TrainerConfig::for_root(root);
    config.worker.program = "sh".to_string();
    config.worker.script = Some(script.to_path_buf());
    config.worker.job_timeout = None;
    config.ensure_directories().unwrap();
    config
}

/// Poll the registry until `done` holds for the job
pub async fn wait_for_job<F>(registry: &JobRegistry, job_id: &str, done: F) -> TrainingJob
where
    F: Fn(&TrainingJob) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        if let Some(job) = registry.get(job_id).await {
            if done(&job) {
                return job;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {} did not reach expected state; last seen: {:?}",
                job_id,
                registry.get(job_id).await
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the job is completed or failed
pub async fn wait_for_terminal(registry: &JobRegistry, job_id: &str) -> TrainingJob {
    wait_for_job(registry, job_id, |job| job.is_terminal()).await
}

/// Minimal 16-bit PCM WAV
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..frames * channels as u32 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
