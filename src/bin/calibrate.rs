use anyhow::{bail, Context, Result};
use nalgebra::Vector2;
use serde::Deserialize;
use std::fs;

use hawkeye_tracker::calibration::{save_calibration, ExtrinsicCalibrator, IntrinsicParameters};
use hawkeye_tracker::config::Config;
use hawkeye_tracker::court::{full_catalogue, merged_catalogue, nearest_reference};

const CONFIG_PATH: &str = "config.toml";

/// コート画像から得たキーポイント
#[derive(Debug, Deserialize)]
struct Keypoints {
    /// 統合カタログ先頭4点 (0,0) (610,0) (606,472) (4,472) の順
    manual_corners: [[f64; 2]; 4],
    #[serde(default)]
    detections: Vec<[f64; 2]>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    // Usage: calibrate <intrinsics.json> <keypoints.json> [output.json]
    if args.len() < 3 {
        bail!("usage: {} <intrinsics.json> <keypoints.json> [output.json]", args[0]);
    }

    let config = Config::load_or_default(CONFIG_PATH);
    let cal_config = &config.calibration;
    let output = args.get(3).cloned().unwrap_or_else(|| cal_config.output_path.clone());

    println!("=== コート外部パラメータキャリブレーション ===");
    println!();
    println!("設定:");
    println!("  統合半径: {}px", cal_config.merge_radius);
    println!("  対応付け閾値: {}px", cal_config.match_threshold);
    println!("  最小対応点数: {}", cal_config.min_correspondences);
    println!("  出力先: {}", output);
    println!();

    println!("[1/3] 入力読み込み中...");
    let intrinsics = IntrinsicParameters::load(&args[1])?;
    let content = fs::read_to_string(&args[2])
        .with_context(|| format!("Failed to read keypoints {}", args[2]))?;
    let keypoints: Keypoints = serde_json::from_str(&content).context("Failed to parse keypoints")?;
    let manual = keypoints.manual_corners.map(|[x, y]| Vector2::new(x, y));
    let detected: Vec<Vector2<f64>> = keypoints
        .detections
        .iter()
        .map(|&[x, y]| Vector2::new(x, y))
        .collect();
    println!(
        "  画像: {}x{}, 検出キーポイント: {}",
        intrinsics.image_width,
        intrinsics.image_height,
        detected.len()
    );

    println!("[2/3] 参照点の対応付けとPnP...");
    let calibrator = ExtrinsicCalibrator::new(intrinsics, merged_catalogue(), cal_config);
    let outcome = calibrator.calibrate(&detected, &manual)?;
    let names = full_catalogue();
    for (idx, m) in &outcome.matches {
        let name = nearest_reference(&names, &m.world).map_or("", |r| r.label.as_str());
        println!(
            "  #{:<2} {:<14} <- ({:7.1}, {:7.1}){}  {}",
            idx,
            m.label,
            m.pixel.x,
            m.pixel.y,
            if m.manual { " [手動]" } else { "" },
            name
        );
    }
    let pos = outcome.profile.position();
    println!("  対応点: {}", outcome.matches.len());
    println!("  再投影誤差(RMS): {:.3}px", outcome.reprojection_error);
    println!("  カメラ位置: ({:.1}, {:.1}, {:.1}) cm", pos.x, pos.y, pos.z);

    println!("[3/3] 保存中...");
    save_calibration(&output, &outcome.to_artifact())?;
    println!("  保存しました: {}", output);

    Ok(())
}
