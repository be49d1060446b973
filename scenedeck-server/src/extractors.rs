//! ffmpeg/ffprobe-backed implementations of the core's extractor
//! capability. The core schedules these per phase and records whatever
//! JSON they return.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scenedeck_core::jobs::{ExtractionRequest, Extractor, JobContext, SharedExtractor};
use scenedeck_core::{ProcessError, Result};
use scenedeck_model::{Phase, Scene};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub artifacts_dir: PathBuf,
}

pub fn build_extractors(config: &ExtractorConfig) -> HashMap<Phase, SharedExtractor> {
    let mut extractors: HashMap<Phase, SharedExtractor> = HashMap::new();
    extractors.insert(
        Phase::Metadata,
        Arc::new(MetadataExtractor {
            ffprobe_path: config.ffprobe_path.clone(),
        }),
    );
    extractors.insert(
        Phase::Thumbnail,
        Arc::new(ThumbnailExtractor {
            ffmpeg_path: config.ffmpeg_path.clone(),
            artifacts_dir: config.artifacts_dir.clone(),
        }),
    );
    extractors.insert(
        Phase::Sprites,
        Arc::new(SpriteExtractor {
            ffmpeg_path: config.ffmpeg_path.clone(),
            artifacts_dir: config.artifacts_dir.clone(),
        }),
    );
    extractors.insert(
        Phase::AnimatedThumbnails,
        Arc::new(PreviewExtractor {
            ffmpeg_path: config.ffmpeg_path.clone(),
            artifacts_dir: config.artifacts_dir.clone(),
        }),
    );
    extractors
}

fn scene_artifact_dir(artifacts_dir: &Path, scene: &Scene) -> Result<PathBuf> {
    let dir = artifacts_dir.join("scenes").join(scene.id.to_string());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Runs an ffmpeg-family command to completion, streaming stderr for
/// progress (`time=` samples against the known duration) and error
/// context. Cancellation kills the child process.
async fn run_command(
    mut cmd: Command,
    ctx: &JobContext,
    duration_hint: f64,
) -> Result<()> {
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::Internal(format!("failed to spawn extractor command: {e}")))?;

    let stderr = child.stderr.take();
    let ctx_clone = ctx.clone();
    let tail = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    let tail_clone = Arc::clone(&tail);
    let monitor = stderr.map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if duration_hint > 0.0
                    && let Some(seconds) = parse_time_seconds(&line)
                {
                    let percent = ((seconds / duration_hint) * 100.0).clamp(0.0, 99.0) as i16;
                    ctx_clone.report_progress(percent);
                }
                let mut tail = tail_clone.lock().await;
                tail.push(line);
                if tail.len() > 30 {
                    tail.remove(0);
                }
            }
        })
    });

    let status = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            let _ = child.kill().await;
            if let Some(handle) = monitor {
                handle.abort();
            }
            return Err(ProcessError::Cancelled("extractor interrupted".into()));
        }
        status = child.wait() => status
            .map_err(|e| ProcessError::Internal(format!("extractor wait failed: {e}")))?,
    };
    if let Some(handle) = monitor {
        let _ = handle.await;
    }

    if !status.success() {
        let tail = tail.lock().await.join("\n");
        return Err(ProcessError::Internal(format!(
            "extractor command exited with {status}: {tail}"
        )));
    }
    Ok(())
}

/// Parses `time=00:00:41.36` samples from ffmpeg progress lines.
fn parse_time_seconds(line: &str) -> Option<f64> {
    let start = line.find("time=")? + 5;
    let rest = &line[start..];
    let token = rest.split_whitespace().next()?;
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

// ---------------------------------------------------------------------
// Metadata

struct MetadataExtractor {
    ffprobe_path: String,
}

#[async_trait]
impl Extractor for MetadataExtractor {
    async fn execute(&self, request: &ExtractionRequest, ctx: &JobContext) -> Result<Value> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(&request.scene.stored_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProcessError::Internal(format!("failed to run ffprobe: {e}")))?;
        if ctx.is_cancelled() {
            return Err(ProcessError::Cancelled("extractor interrupted".into()));
        }
        if !output.status.success() {
            return Err(ProcessError::Internal(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let probe: Value = serde_json::from_slice(&output.stdout)?;
        let format = &probe["format"];
        let video_stream = probe["streams"]
            .as_array()
            .and_then(|streams| {
                streams
                    .iter()
                    .find(|stream| stream["codec_type"] == "video")
            })
            .ok_or_else(|| {
                ProcessError::Validation(format!(
                    "no video stream in {}",
                    request.scene.stored_path.display()
                ))
            })?;

        let duration: f64 = format["duration"]
            .as_str()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0.0);
        let bit_rate: i64 = format["bit_rate"]
            .as_str()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        ctx.report_progress(100);

        // Shape consumed by the core's metadata completion handler.
        Ok(json!({
            "duration": duration,
            "width": video_stream["width"].as_i64().unwrap_or(0),
            "height": video_stream["height"].as_i64().unwrap_or(0),
            "video_codec": video_stream["codec_name"].as_str().unwrap_or(""),
            "bit_rate": bit_rate,
        }))
    }
}

// ---------------------------------------------------------------------
// Thumbnail

struct ThumbnailExtractor {
    ffmpeg_path: String,
    artifacts_dir: PathBuf,
}

#[async_trait]
impl Extractor for ThumbnailExtractor {
    async fn execute(&self, request: &ExtractionRequest, ctx: &JobContext) -> Result<Value> {
        let scene = &request.scene;
        let dir = scene_artifact_dir(&self.artifacts_dir, scene)?;
        let stem = request.force_target.as_deref().unwrap_or("thumb");
        let output = dir.join(format!("{stem}.jpg"));

        // Grab a frame from 20% in; the very first frames are often
        // black or titles.
        let seek = if scene.duration > 0.0 {
            scene.duration * 0.2
        } else {
            1.0
        };
        let width = if scene.thumbnail_width > 0 {
            scene.thumbnail_width
        } else {
            320
        };

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-ss")
            .arg(format!("{seek:.2}"))
            .arg("-i")
            .arg(&scene.stored_path)
            .arg("-frames:v")
            .arg("1")
            .arg("-vf")
            .arg(format!("scale={width}:-2"))
            .arg(&output);
        run_command(cmd, ctx, 0.0).await?;
        ctx.report_progress(100);

        Ok(json!({ "thumbnail": output }))
    }
}

// ---------------------------------------------------------------------
// Sprite sheet + WebVTT index

const SPRITE_COLUMNS: u32 = 10;
const SPRITE_ROWS: u32 = 10;
const SPRITE_TILE_WIDTH: u32 = 160;
const SPRITE_TILE_HEIGHT: u32 = 90;

struct SpriteExtractor {
    ffmpeg_path: String,
    artifacts_dir: PathBuf,
}

#[async_trait]
impl Extractor for SpriteExtractor {
    async fn execute(&self, request: &ExtractionRequest, ctx: &JobContext) -> Result<Value> {
        let scene = &request.scene;
        if scene.duration <= 0.0 {
            return Err(ProcessError::Validation(format!(
                "scene {} has no duration yet; metadata phase must run first",
                scene.id
            )));
        }
        let dir = scene_artifact_dir(&self.artifacts_dir, scene)?;
        let sheet = dir.join("sprites.jpg");
        let vtt = dir.join("sprites.vtt");

        let tiles = (SPRITE_COLUMNS * SPRITE_ROWS) as f64;
        let interval = scene.duration / tiles;

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(&scene.stored_path)
            .arg("-vf")
            .arg(format!(
                "fps=1/{interval:.4},scale={SPRITE_TILE_WIDTH}:{SPRITE_TILE_HEIGHT},tile={SPRITE_COLUMNS}x{SPRITE_ROWS}"
            ))
            .arg("-frames:v")
            .arg("1")
            .arg(&sheet);
        run_command(cmd, ctx, scene.duration).await?;

        let index = build_sprite_vtt("sprites.jpg", scene.duration, interval);
        tokio::fs::write(&vtt, index).await?;
        ctx.report_progress(100);

        Ok(json!({ "sprites": sheet, "index": vtt }))
    }
}

/// WebVTT index mapping time ranges onto sprite-sheet tiles via the
/// `#xywh` media-fragment syntax.
fn build_sprite_vtt(sheet_name: &str, duration: f64, interval: f64) -> String {
    let mut vtt = String::from("WEBVTT\n\n");
    for tile in 0..SPRITE_COLUMNS * SPRITE_ROWS {
        let start = f64::from(tile) * interval;
        if start >= duration {
            break;
        }
        let end = (start + interval).min(duration);
        let x = (tile % SPRITE_COLUMNS) * SPRITE_TILE_WIDTH;
        let y = (tile / SPRITE_COLUMNS) * SPRITE_TILE_HEIGHT;
        vtt.push_str(&format!(
            "{} --> {}\n{sheet_name}#xywh={x},{y},{SPRITE_TILE_WIDTH},{SPRITE_TILE_HEIGHT}\n\n",
            format_vtt_time(start),
            format_vtt_time(end),
        ));
    }
    vtt
}

fn format_vtt_time(seconds: f64) -> String {
    let total_millis = (seconds * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

// ---------------------------------------------------------------------
// Animated preview

struct PreviewExtractor {
    ffmpeg_path: String,
    artifacts_dir: PathBuf,
}

#[async_trait]
impl Extractor for PreviewExtractor {
    async fn execute(&self, request: &ExtractionRequest, ctx: &JobContext) -> Result<Value> {
        let scene = &request.scene;
        let dir = scene_artifact_dir(&self.artifacts_dir, scene)?;
        let output = dir.join("preview.webp");

        let seek = if scene.duration > 0.0 {
            scene.duration * 0.25
        } else {
            0.0
        };

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-ss")
            .arg(format!("{seek:.2}"))
            .arg("-t")
            .arg("3")
            .arg("-i")
            .arg(&scene.stored_path)
            .arg("-vf")
            .arg("fps=12,scale=320:-2")
            .arg("-loop")
            .arg("0")
            .arg("-an")
            .arg(&output);
        run_command(cmd, ctx, 0.0).await?;
        ctx.report_progress(100);

        Ok(json!({ "preview": output }))
    }
}
