//! Configuration resolution for vox-train
//!
//! **Priority:** CLI → environment (`VOX_*`) → TOML → compiled defaults.
//! clap handles the first two tiers; the TOML file fills in whatever the
//! command line and environment left unset.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vox_common::config::{find_config_file, load_toml_config, resolve_root_folder, LoggingConfig};
use vox_common::{Error, Result};

/// Module name used for the TOML file and health reporting
pub const MODULE_NAME: &str = "vox-train";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5740;
const DEFAULT_WORKER_PROGRAM: &str = "python3";
const DEFAULT_WORKER_SCRIPT: &str = "train_rvc.py";
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 6 * 60 * 60;
const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_RETAINED_JOBS: usize = 1000;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[command(name = "vox-train", version, about = "Vox voice-model training service")]
pub struct CliArgs {
    /// TOML config file (default: ~/.config/vox/vox-train.toml)
    #[arg(long, env = "VOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address
    #[arg(long, env = "VOX_HOST")]
    pub host: Option<String>,

    /// HTTP port
    #[arg(long, env = "VOX_PORT")]
    pub port: Option<u16>,

    /// Root folder for uploads, models and the job database
    #[arg(long)]
    pub root_folder: Option<PathBuf>,

    /// SQLite job database (default: <root>/vox-train.db)
    #[arg(long, env = "VOX_DATABASE")]
    pub database: Option<PathBuf>,

    /// Keep job state in memory only
    #[arg(long)]
    pub in_memory: bool,

    /// Program used to run the training script
    #[arg(long, env = "VOX_WORKER_PROGRAM")]
    pub worker_program: Option<String>,

    /// Training script passed as the first worker argument
    #[arg(long, env = "VOX_WORKER_SCRIPT")]
    pub worker_script: Option<PathBuf>,

    /// Maximum number of concurrently running workers
    #[arg(long, env = "VOX_MAX_CONCURRENT_JOBS")]
    pub max_concurrent_jobs: Option<usize>,

    /// Per-job deadline in seconds (0 disables)
    #[arg(long, env = "VOX_JOB_TIMEOUT_SECS")]
    pub job_timeout_secs: Option<u64>,
}

/// `[worker]` TOML section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerToml {
    pub program: Option<String>,
    pub script: Option<PathBuf>,
    pub max_concurrent_jobs: Option<usize>,
    pub job_timeout_secs: Option<u64>,
}

/// `[retention]` TOML section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetentionToml {
    pub retention_secs: Option<u64>,
    pub max_retained_jobs: Option<usize>,
    pub reaper_interval_secs: Option<u64>,
}

/// vox-train TOML file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub root_folder: Option<PathBuf>,
    pub upload_dir: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub max_upload_bytes: Option<usize>,
    pub logging: LoggingConfig,
    pub worker: WorkerToml,
    pub retention: RetentionToml,
}

/// External worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Executable to launch (e.g. `python3`)
    pub program: String,
    /// Script passed as the first argument; omitted when None
    pub script: Option<PathBuf>,
    /// Admission limit on concurrently running workers
    pub max_concurrent_jobs: usize,
    /// Deadline after which a worker is killed; None disables
    pub job_timeout: Option<Duration>,
}

/// Retention policy for finished jobs
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Terminal jobs older than this are evicted
    pub retention: Duration,
    /// Cap on retained jobs; oldest finished evicted first
    pub max_retained_jobs: usize,
    /// How often the reaper runs
    pub reaper_interval: Duration,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub host: String,
    pub port: u16,
    pub root_folder: PathBuf,
    pub upload_dir: PathBuf,
    pub models_dir: PathBuf,
    /// None keeps job state in memory only
    pub database_path: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub log_level: String,
    pub worker: WorkerConfig,
    pub retention: RetentionConfig,
    /// TOML file that was read, if any
    pub config_file: Option<PathBuf>,
}

impl TrainerConfig {
    /// Compiled defaults rooted at `root_folder` (memory-only registry)
    pub fn for_root(root_folder: impl Into<PathBuf>) -> Self {
        let root_folder = root_folder.into();
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upload_dir: root_folder.join("uploads"),
            models_dir: root_folder.join("models"),
            database_path: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_level: LoggingConfig::default().level,
            worker: WorkerConfig {
                program: DEFAULT_WORKER_PROGRAM.to_string(),
                script: Some(PathBuf::from(DEFAULT_WORKER_SCRIPT)),
                max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
                job_timeout: timeout_from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            },
            retention: RetentionConfig {
                retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
                max_retained_jobs: DEFAULT_MAX_RETAINED_JOBS,
                reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            },
            root_folder,
            config_file: None,
        }
    }

    /// Resolve configuration from CLI/environment and the TOML file
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        let config_file = match &args.config {
            Some(path) if !path.exists() => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => Some(path.clone()),
            None => find_config_file(MODULE_NAME),
        };

        let toml_config: TomlConfig = match &config_file {
            Some(path) => load_toml_config(path)?,
            None => TomlConfig::default(),
        };

        let mut config = Self::from_sources(args, toml_config)?;
        config.config_file = config_file;
        Ok(config)
    }

    /// Merge already-loaded sources
    pub fn from_sources(args: &CliArgs, toml: TomlConfig) -> Result<Self> {
        let root_folder =
            resolve_root_folder(args.root_folder.as_deref(), toml.root_folder.as_deref());
        let mut config = Self::for_root(root_folder);

        if let Some(host) = args.host.clone().or(toml.host) {
            config.host = host;
        }
        if let Some(port) = args.port.or(toml.port) {
            config.port = port;
        }
        if let Some(dir) = toml.upload_dir {
            config.upload_dir = dir;
        }
        if let Some(dir) = toml.models_dir {
            config.models_dir = dir;
        }
        if let Some(bytes) = toml.max_upload_bytes {
            config.max_upload_bytes = bytes;
        }
        config.log_level = toml.logging.level;

        config.database_path = if args.in_memory {
            None
        } else {
            Some(
                args.database
                    .clone()
                    .or(toml.database_path)
                    .unwrap_or_else(|| config.root_folder.join("vox-train.db")),
            )
        };

        if let Some(program) = args.worker_program.clone().or(toml.worker.program) {
            config.worker.program = program;
        }
        if let Some(script) = args.worker_script.clone().or(toml.worker.script) {
            // An empty script path means the program is the worker itself
            config.worker.script = if script.as_os_str().is_empty() {
                None
            } else {
                Some(script)
            };
        }
        if let Some(max) = args.max_concurrent_jobs.or(toml.worker.max_concurrent_jobs) {
            if max == 0 {
                return Err(Error::Config(
                    "worker.max_concurrent_jobs must be at least 1".to_string(),
                ));
            }
            config.worker.max_concurrent_jobs = max;
        }
        if let Some(secs) = args.job_timeout_secs.or(toml.worker.job_timeout_secs) {
            config.worker.job_timeout = timeout_from_secs(secs);
        }

        if let Some(secs) = toml.retention.retention_secs {
            config.retention.retention = Duration::from_secs(secs);
        }
        if let Some(max) = toml.retention.max_retained_jobs {
            config.retention.max_retained_jobs = max;
        }
        if let Some(secs) = toml.retention.reaper_interval_secs {
            if secs == 0 {
                return Err(Error::Config(
                    "retention.reaper_interval_secs must be at least 1".to_string(),
                ));
            }
            config.retention.reaper_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Create root, upload and model directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.root_folder, &self.upload_dir, &self.models_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Directory holding the trained model for a job
    pub fn model_dir_for(models_dir: &Path, user_id: &str, job_id: &str) -> PathBuf {
        models_dir.join(path_component(user_id)).join(job_id)
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Make an opaque user id safe to use as a single path component
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_for_root() {
        let config = TrainerConfig::for_root("/srv/vox");
        assert_eq!(config.upload_dir, PathBuf::from("/srv/vox/uploads"));
        assert_eq!(config.models_dir, PathBuf::from("/srv/vox/models"));
        assert_eq!(config.worker.program, "python3");
        assert_eq!(config.worker.max_concurrent_jobs, 2);
        assert_eq!(config.worker.job_timeout, Some(Duration::from_secs(21600)));
        assert!(config.database_path.is_none());
    }

    #[test]
    #[serial]
    fn test_cli_overrides_toml() {
        std::env::remove_var(vox_common::config::ROOT_FOLDER_ENV);
        let toml: TomlConfig = toml::from_str(
            r#"
            port = 6000
            root_folder = "/toml/root"

            [worker]
            program = "python"
            max_concurrent_jobs = 4
            job_timeout_secs = 0
            "#,
        )
        .unwrap();

        let args = CliArgs {
            port: Some(7000),
            worker_program: Some("python3.11".to_string()),
            ..Default::default()
        };

        let config = TrainerConfig::from_sources(&args, toml).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.root_folder, PathBuf::from("/toml/root"));
        assert_eq!(config.worker.program, "python3.11");
        assert_eq!(config.worker.max_concurrent_jobs, 4);
        assert_eq!(config.worker.job_timeout, None);
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/toml/root/vox-train.db"))
        );
    }

    #[test]
    #[serial]
    fn test_in_memory_disables_database() {
        let args = CliArgs {
            root_folder: Some(PathBuf::from("/cli/root")),
            database: Some(PathBuf::from("/cli/jobs.db")),
            in_memory: true,
            ..Default::default()
        };
        let config = TrainerConfig::from_sources(&args, TomlConfig::default()).unwrap();
        assert_eq!(config.root_folder, PathBuf::from("/cli/root"));
        assert!(config.database_path.is_none());
    }

    #[test]
    #[serial]
    fn test_zero_concurrency_rejected() {
        let args = CliArgs {
            root_folder: Some(PathBuf::from("/cli/root")),
            max_concurrent_jobs: Some(0),
            ..Default::default()
        };
        let result = TrainerConfig::from_sources(&args, TomlConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_explicit_config_file_is_error() {
        let args = CliArgs {
            config: Some(PathBuf::from("/definitely/not/here/vox-train.toml")),
            ..Default::default()
        };
        assert!(matches!(TrainerConfig::resolve(&args), Err(Error::Config(_))));
    }

    #[test]
    fn test_model_dir_sanitizes_user_id() {
        let dir = TrainerConfig::model_dir_for(Path::new("/m"), "../evil user", "train_1");
        assert_eq!(dir, PathBuf::from("/m/___evil_user/train_1"));
    }
}
