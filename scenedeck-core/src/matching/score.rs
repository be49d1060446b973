use scenedeck_model::Scene;

/// Ranks duplicate-group members for best-variant election: longer,
/// higher-resolution, better-codec, higher-bitrate variants win, in that
/// order of magnitude.
pub fn score_scene(scene: &Scene) -> i64 {
    let codec_bonus = match scene.video_codec.to_ascii_lowercase().as_str() {
        "av1" => 3_000_000,
        "hevc" | "h265" => 2_000_000,
        "h264" => 1_000_000,
        _ => 0,
    };
    (scene.duration * 1000.0) as i64
        + i64::from(scene.width) * i64::from(scene.height)
        + codec_bonus
        + scene.bit_rate / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scenedeck_model::{SceneId, StoragePathId};

    fn scene(duration: f64, width: i32, height: i32, codec: &str, bit_rate: i64) -> Scene {
        Scene {
            id: SceneId(1),
            title: "t".into(),
            stored_path: "/media/t.mp4".into(),
            storage_path_id: StoragePathId(1),
            duration,
            width,
            height,
            video_codec: codec.into(),
            bit_rate,
            thumbnail_width: 0,
            thumbnail_height: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn score_formula_matches_weights() {
        let s = scene(60.0, 1920, 1080, "h264", 4_000_000);
        assert_eq!(score_scene(&s), 60_000 + 1920 * 1080 + 1_000_000 + 4_000);
    }

    #[test]
    fn better_codec_outranks_bitrate() {
        let hevc = scene(60.0, 1920, 1080, "hevc", 1_000_000);
        let h264 = scene(60.0, 1920, 1080, "h264", 8_000_000);
        assert!(score_scene(&hevc) > score_scene(&h264));
    }

    #[test]
    fn av1_gets_the_top_bonus() {
        let av1 = scene(60.0, 1280, 720, "AV1", 0);
        let unknown = scene(60.0, 1280, 720, "mpeg2video", 0);
        assert_eq!(score_scene(&av1) - score_scene(&unknown), 3_000_000);
    }
}
