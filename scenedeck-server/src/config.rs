use scenedeck_core::ProcessingConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Database settings
    pub database_url: String,
    pub database_max_connections: u32,

    // Artifact output
    pub artifacts_dir: PathBuf,

    // FFmpeg settings
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    // Processing core
    pub processing: ProcessingConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let mut processing = ProcessingConfig::default();
        processing.data_dir = env::var("DATA_DIR")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        if let Ok(raw) = env::var("JOB_HISTORY_RETENTION") {
            processing.job_history_retention = parse_duration("JOB_HISTORY_RETENTION", &raw)?;
        }
        if let Ok(raw) = env::var("FEEDER_POLL_INTERVAL") {
            processing.feeder.poll_interval = parse_duration("FEEDER_POLL_INTERVAL", &raw)?;
        }
        if let Ok(raw) = env::var("QUEUE_CAPACITY") {
            processing.queue_capacity = raw.parse()?;
        }

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "4400".to_string())
                .parse()
                .unwrap_or(4400),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(10),

            artifacts_dir: env::var("ARTIFACTS_DIR")
                .unwrap_or_else(|_| "./artifacts".to_string())
                .into(),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            processing,
        })
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.processing.data_dir)?;
        std::fs::create_dir_all(&self.artifacts_dir)?;
        Ok(())
    }
}

fn parse_duration(name: &str, raw: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(raw).map_err(|e| anyhow::anyhow!("invalid {name} ({raw:?}): {e}"))
}
