use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use hawkeye_tracker::batch::BatchController;
use hawkeye_tracker::calibration::load_profile;
use hawkeye_tracker::camera::{FramePair, QueuedSource, ThreadedProducer};
use hawkeye_tracker::config::Config;
use hawkeye_tracker::detect::{Detection2D, ObjectDetector};
use hawkeye_tracker::triangulation::StereoGeometry;

const CONFIG_PATH: &str = "config.toml";

/// 記録済み検出ログの1フレーム。カメラが欠けたフレームは null
#[derive(Debug, Deserialize)]
struct LoggedFrame {
    #[serde(default)]
    timestamp: Option<f64>,
    left: Option<Vec<Detection2D>>,
    right: Option<Vec<Detection2D>>,
}

#[derive(Debug, Deserialize)]
struct DetectionLog {
    frames: Vec<LoggedFrame>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    // Usage: hawkeye-tracker <left.json> <right.json> <detections.json>
    if args.len() != 4 {
        bail!("usage: {} <left_calibration.json> <right_calibration.json> <detections.json>", args[0]);
    }

    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Hawkeye Tracker - Replay ===");
    let left = load_profile(&args[1]).with_context(|| format!("left camera: {}", args[1]))?;
    let right = load_profile(&args[2]).with_context(|| format!("right camera: {}", args[2]))?;
    let stereo = Arc::new(StereoGeometry::new(left, right, &config.stereo));
    if !stereo.is_enabled() {
        bail!("カメラ配置が退化しているためステレオ処理できません");
    }
    let b = stereo.bounds();
    println!(
        "  有効範囲: x[{}, {}] y[{}, {}] z[{}, {}] cm",
        b.x_min, b.x_max, b.y_min, b.y_max, b.z_min, b.z_max
    );

    let content = fs::read_to_string(&args[3]).context("Failed to read detections log")?;
    let log: DetectionLog = serde_json::from_str(&content).context("Failed to parse detections log")?;
    println!("  フレーム数: {}", log.frames.len());

    // 再生時のフレームは検出結果そのもの
    let detector: Arc<dyn ObjectDetector<Vec<Detection2D>>> =
        Arc::new(|frame: Option<&Vec<Detection2D>>| frame.cloned().unwrap_or_default());
    let (controller, reports) = BatchController::new(&config, stereo, detector);
    let controller = Arc::new(controller);

    let pairs = log.frames.into_iter().map(|f| FramePair {
        left: f.left,
        right: f.right,
        timestamp: f.timestamp,
    });
    let producer = ThreadedProducer::start(QueuedSource::new(pairs), controller.clone(), None);
    while producer.is_running() {
        std::thread::sleep(Duration::from_millis(5));
    }
    producer.join();

    let info = controller.buffer_info();
    println!(
        "  バッファ: {}/{} ペア ({:.2}秒)",
        info.len, info.capacity, info.time_span
    );

    // 最後に受け取ったフレームの時刻でトリガーする
    let now = controller.latest_timestamp().unwrap_or(0.0);
    if let Err(reason) = controller.trigger(now) {
        bail!("トリガーが拒否されました: {}", reason);
    }

    let report = reports
        .recv_timeout(Duration::from_secs(60))
        .context("バッチ処理が完了しませんでした")?;
    println!(
        "  診断: 範囲外 {} / 低品質 {} / 三角測量失敗 {}",
        report.debug.out_of_bounds, report.debug.low_quality, report.debug.triangulation_failed
    );
    for record in controller.debug_records() {
        log::debug!("t={:.3} {:?}", record.timestamp(), record);
    }

    match report.outcome {
        Ok(result) => {
            let seg = &result.selection.segment;
            println!(
                "選択区間: {} 点 ({:?}, 信頼度 {:.2}, スコア {:.2}, トラック数 {})",
                seg.len(),
                result.selection.strategy,
                result.selection.confidence,
                seg.score,
                result.track_count
            );
            for p in &seg.points {
                println!(
                    "  t={:.3}  ({:.1}, {:.1}, {:.1})",
                    p.timestamp, p.position.x, p.position.y, p.position.z
                );
            }
        }
        Err(e) => println!("予測に使える軌跡がありません: {}", e),
    }

    Ok(())
}
