//! フレームペアのリングバッファとバッチ処理の状態機械
//!
//! プロデューサはロック1つで保護されたバッファへ追記し続け、トリガーが受理されると
//! バッファのスナップショットを別スレッドのワーカーで処理する。同時に走るバッチは高々1つ。

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde::Serialize;

use crate::config::{BufferConfig, Config, TrackerConfig};
use crate::debug::{DebugRecord, DebugSummary};
use crate::detect::{rank_detections, Detection2D, ObjectDetector};
use crate::error::{ProcessingError, ResetRefused, TriggerRejection};
use crate::predict::{BoundaryAnalyzer, GameType, PredictionOutcome, TrajectoryPredictor};
use crate::tracker::MultiObjectTracker;
use crate::trajectory::{SegmentSelection, SegmentSelector};
use crate::triangulation::{Point3D, StereoGeometry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SystemState {
    Buffering,
    Processing,
    /// 区間選択済み、予測待ち
    PredictionReady,
    /// 予測まで完了
    PredictionComplete,
}

/// バッファの状況
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferInfo {
    pub len: usize,
    pub capacity: usize,
    pub processing: bool,
    pub state: SystemState,
    /// 最古と最新のタイムスタンプの差（秒）
    pub time_span: f64,
}

/// 1バッチの成功結果
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub selection: SegmentSelection,
    /// 範囲内として受理された全3D点
    pub points: Vec<Point3D>,
    pub track_count: usize,
    pub prediction: Option<PredictionOutcome>,
    pub trigger_time: f64,
}

/// ワーカー完了時にチャネルへ送られる報告
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcome: Result<BatchResult, ProcessingError>,
    pub debug: DebugSummary,
    /// 処理したフレームペア数
    pub frames: usize,
}

struct Buffers<F> {
    left: VecDeque<Option<F>>,
    right: VecDeque<Option<F>>,
    timestamps: VecDeque<f64>,
    frame_index: u64,
    processing: bool,
    last_trigger: Option<f64>,
    state: SystemState,
    debug: Vec<DebugRecord>,
}

impl<F> Buffers<F> {
    fn new(capacity: usize) -> Self {
        Self {
            left: VecDeque::with_capacity(capacity),
            right: VecDeque::with_capacity(capacity),
            timestamps: VecDeque::with_capacity(capacity),
            frame_index: 0,
            processing: false,
            last_trigger: None,
            state: SystemState::Buffering,
            debug: Vec::new(),
        }
    }

    fn clear_frames(&mut self) {
        self.left.clear();
        self.right.clear();
        self.timestamps.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// トリガー時点のバッファのコピー
struct Snapshot<F> {
    left: Vec<Option<F>>,
    right: Vec<Option<F>>,
    timestamps: Vec<f64>,
}

/// ワーカーが使う処理段一式
struct Pipeline<F> {
    stereo: Arc<StereoGeometry>,
    detector: Arc<dyn ObjectDetector<F>>,
    tracker: TrackerConfig,
    selector: SegmentSelector,
    predictor: Option<Arc<dyn TrajectoryPredictor>>,
    boundary: Option<Arc<dyn BoundaryAnalyzer>>,
    game: GameType,
}

impl<F> Clone for Pipeline<F> {
    fn clone(&self) -> Self {
        Self {
            stereo: self.stereo.clone(),
            detector: self.detector.clone(),
            tracker: self.tracker.clone(),
            selector: self.selector.clone(),
            predictor: self.predictor.clone(),
            boundary: self.boundary.clone(),
            game: self.game,
        }
    }
}

impl<F> Pipeline<F> {
    fn detect_all(&self, frames: &[Option<F>]) -> Vec<Vec<Detection2D>> {
        frames
            .iter()
            .map(|f| rank_detections(self.detector.detect(f.as_ref())))
            .collect()
    }

    fn run(
        &self,
        snapshot: &Snapshot<F>,
        now: f64,
        shared: &Mutex<Buffers<F>>,
        debug: &mut Vec<DebugRecord>,
    ) -> Result<BatchResult, ProcessingError> {
        let left = self.detect_all(&snapshot.left);
        let right = self.detect_all(&snapshot.right);

        let batch = self
            .stereo
            .process_batch(&left, &right, &snapshot.timestamps)
            .map_err(|e| ProcessingError::CriticalProcessingError(e.to_string()))?;
        debug.extend(batch.debug);

        let mut tracker = MultiObjectTracker::new(&self.tracker);
        for frame in &batch.frames {
            let observations: Vec<_> = frame
                .points
                .iter()
                .map(|p| (p.position.xy(), p.confidence))
                .collect();
            let active = tracker.update(&observations, frame.timestamp);
            if active.len() > 1 {
                log::debug!("Frame {}: tracking {} objects", frame.frame_index, active.len());
            }
        }

        let selection = self
            .selector
            .select_with_fallback(&batch.points, &tracker, now, debug)?;
        log::info!(
            "Selected {} points ({:?}, confidence {:.2})",
            selection.segment.len(),
            selection.strategy,
            selection.confidence
        );
        lock(shared).state = SystemState::PredictionReady;

        let prediction = self.predictor.as_ref().and_then(|predictor| {
            let landing = predictor.predict(&selection.segment.points)?;
            let in_court = self
                .boundary
                .as_ref()
                .map(|b| b.is_in_court(&landing.position, self.game));
            Some(PredictionOutcome { landing, in_court })
        });
        if prediction.is_some() {
            lock(shared).state = SystemState::PredictionComplete;
        }

        Ok(BatchResult {
            selection,
            points: batch.points,
            track_count: tracker.len(),
            prediction,
            trigger_time: now,
        })
    }
}

/// ワーカー終了時（パニック含む）に処理中フラグを必ず解除する
struct ProcessingGuard<F> {
    shared: Arc<Mutex<Buffers<F>>>,
}

impl<F> Drop for ProcessingGuard<F> {
    fn drop(&mut self) {
        let mut buffers = lock(&self.shared);
        buffers.processing = false;
        buffers.state = SystemState::Buffering;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// フレームバッファとバッチトリガーの制御
pub struct BatchController<F> {
    shared: Arc<Mutex<Buffers<F>>>,
    pipeline: Pipeline<F>,
    config: BufferConfig,
    reports: Sender<BatchReport>,
}

impl<F: Clone + Send + 'static> BatchController<F> {
    /// 完了報告を受け取る Receiver と共に作成する
    pub fn new(
        config: &Config,
        stereo: Arc<StereoGeometry>,
        detector: Arc<dyn ObjectDetector<F>>,
    ) -> (Self, Receiver<BatchReport>) {
        let (tx, rx) = mpsc::channel();
        let capacity = config.buffer.capacity();
        log::info!(
            "Batch controller: {} frame pairs ({:.1}s at {:.0}fps)",
            capacity,
            config.buffer.duration_secs,
            config.buffer.fps
        );
        let controller = Self {
            shared: Arc::new(Mutex::new(Buffers::new(capacity))),
            pipeline: Pipeline {
                stereo,
                detector,
                tracker: config.tracker.clone(),
                selector: SegmentSelector::new(&config.segment, &config.quality),
                predictor: None,
                boundary: None,
                game: GameType::Singles,
            },
            config: config.buffer.clone(),
            reports: tx,
        };
        (controller, rx)
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn TrajectoryPredictor>) -> Self {
        self.pipeline.predictor = Some(predictor);
        self
    }

    pub fn with_boundary(mut self, boundary: Arc<dyn BoundaryAnalyzer>, game: GameType) -> Self {
        self.pipeline.boundary = Some(boundary);
        self.pipeline.game = game;
        self
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// フレームペアを追記し、採用したタイムスタンプを返す。
    /// 時刻が無ければ frame_index / fps を使う。処理中でも追記できる
    pub fn add_frame_pair(&self, left: Option<F>, right: Option<F>, timestamp: Option<f64>) -> f64 {
        let capacity = self.capacity();
        let mut buffers = lock(&self.shared);
        let ts = timestamp.unwrap_or(buffers.frame_index as f64 / self.config.fps);
        buffers.left.push_back(left);
        buffers.right.push_back(right);
        buffers.timestamps.push_back(ts);
        while buffers.timestamps.len() > capacity {
            buffers.left.pop_front();
            buffers.right.pop_front();
            buffers.timestamps.pop_front();
        }
        buffers.frame_index += 1;
        ts
    }

    /// バッチ処理を開始する。`now` はクールダウン判定と軌跡評価の基準時刻
    pub fn trigger(&self, now: f64) -> Result<(), TriggerRejection> {
        let snapshot = {
            let mut buffers = lock(&self.shared);
            if buffers.processing {
                return Err(TriggerRejection::ProcessingAlreadyInProgress);
            }
            if let Some(last) = buffers.last_trigger {
                let elapsed = now - last;
                if elapsed < self.config.cooldown_secs {
                    return Err(TriggerRejection::CooldownActive {
                        remaining_secs: self.config.cooldown_secs - elapsed,
                    });
                }
            }
            let have = buffers.timestamps.len();
            if have < self.config.min_frames_to_trigger {
                return Err(TriggerRejection::InsufficientBufferedFrames {
                    have,
                    needed: self.config.min_frames_to_trigger,
                });
            }

            buffers.processing = true;
            buffers.last_trigger = Some(now);
            buffers.state = SystemState::Processing;
            Snapshot {
                left: buffers.left.iter().cloned().collect(),
                right: buffers.right.iter().cloned().collect(),
                timestamps: buffers.timestamps.iter().copied().collect(),
            }
        };

        log::info!("Batch triggered at {:.3}s with {} frame pairs", now, snapshot.timestamps.len());
        let shared = self.shared.clone();
        let pipeline = self.pipeline.clone();
        let reports = self.reports.clone();
        thread::spawn(move || {
            let frames = snapshot.timestamps.len();
            let mut debug = Vec::new();
            let outcome = {
                let _guard = ProcessingGuard {
                    shared: shared.clone(),
                };
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.run(&snapshot, now, &shared, &mut debug)
                }));
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        log::error!("Batch worker panicked: {}", msg);
                        Err(ProcessingError::CriticalProcessingError(msg))
                    }
                };
                lock(&shared).debug = debug.clone();
                outcome
            };

            if let Err(e) = &outcome {
                log::warn!("Batch failed: {}", e);
            }
            let report = BatchReport {
                outcome,
                debug: DebugSummary::from_records(&debug),
                frames,
            };
            if reports.send(report).is_err() {
                log::debug!("Batch report receiver dropped");
            }
        });
        Ok(())
    }

    /// 処理中は拒否。それ以外はバッファと診断記録を消去して待機状態へ戻す
    pub fn reset(&self) -> Result<(), ResetRefused> {
        let mut buffers = lock(&self.shared);
        if buffers.processing {
            return Err(ResetRefused);
        }
        buffers.clear_frames();
        buffers.debug.clear();
        buffers.frame_index = 0;
        buffers.processing = false;
        buffers.state = SystemState::Buffering;
        log::info!("Batch controller reset");
        Ok(())
    }

    /// 処理中でなければフレームだけ消去する
    pub fn clear_buffer(&self) -> bool {
        let mut buffers = lock(&self.shared);
        if buffers.processing {
            return false;
        }
        buffers.clear_frames();
        true
    }

    pub fn state(&self) -> SystemState {
        lock(&self.shared).state
    }

    pub fn is_processing(&self) -> bool {
        lock(&self.shared).processing
    }

    pub fn buffer_info(&self) -> BufferInfo {
        let buffers = lock(&self.shared);
        let time_span = match (buffers.timestamps.front(), buffers.timestamps.back()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        BufferInfo {
            len: buffers.timestamps.len(),
            capacity: self.capacity(),
            processing: buffers.processing,
            state: buffers.state,
            time_span,
        }
    }

    /// バッファ内で最も新しいフレームの時刻
    pub fn latest_timestamp(&self) -> Option<f64> {
        lock(&self.shared).timestamps.back().copied()
    }

    /// 直近のバッチの診断記録
    pub fn debug_records(&self) -> Vec<DebugRecord> {
        lock(&self.shared).debug.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraProfile;
    use crate::config::StereoConfig;
    use crate::predict::LandingPrediction;
    use nalgebra::{Matrix3, Vector3};
    use std::sync::Condvar;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Side {
        Left,
        Right,
    }

    /// テスト用フレーム: どちらのカメラの何番目か
    type Frame = (Side, usize);

    fn stereo() -> Arc<StereoGeometry> {
        let k = Matrix3::new(1200.0, 0.0, 640.0, 0.0, 1200.0, 360.0, 0.0, 0.0, 1.0);
        let target = Vector3::new(305.0, 300.0, 0.0);
        let left = CameraProfile::looking_at(k, Vector3::new(-200.0, -500.0, 350.0), target, 1280, 720);
        let right = CameraProfile::looking_at(k, Vector3::new(810.0, -450.0, 300.0), target, 1280, 720);
        Arc::new(StereoGeometry::new(left, right, &StereoConfig::default()))
    }

    fn shuttle(i: usize) -> Vector3<f64> {
        let t = i as f64 / 30.0;
        Vector3::new(100.0 + 300.0 * t, 200.0 + 150.0 * t, 250.0 - 240.0 * t * t)
    }

    /// 放物線上の点を各カメラへ投影して返す検出器
    fn projecting_detector(stereo: Arc<StereoGeometry>) -> Arc<dyn ObjectDetector<Frame>> {
        Arc::new(move |frame: Option<&Frame>| {
            let Some(&(side, i)) = frame else {
                return Vec::new();
            };
            let camera = match side {
                Side::Left => stereo.left(),
                Side::Right => stereo.right(),
            };
            camera
                .project(&shuttle(i))
                .map(|px| vec![Detection2D::new(px.x, px.y, 0.9)])
                .unwrap_or_default()
        })
    }

    fn empty_detector() -> Arc<dyn ObjectDetector<Frame>> {
        Arc::new(|_: Option<&Frame>| Vec::new())
    }

    fn fill(controller: &BatchController<Frame>, n: usize) {
        for i in 0..n {
            controller.add_frame_pair(Some((Side::Left, i)), Some((Side::Right, i)), None);
        }
    }

    /// 開くまで detect をブロックするゲート
    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        cv: Condvar,
    }

    impl Gate {
        fn wait(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cv.wait(open).unwrap();
            }
        }

        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.cv.notify_all();
        }
    }

    #[test]
    fn test_timestamps_derived_from_frame_index() {
        let (c, _rx) = BatchController::new(&Config::default(), stereo(), empty_detector());
        assert_eq!(c.add_frame_pair(None, None, None), 0.0);
        assert!((c.add_frame_pair(None, None, None) - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(c.add_frame_pair(None, None, Some(7.5)), 7.5);
        assert_eq!(c.buffer_info().len, 3);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let (c, _rx) = BatchController::new(&Config::default(), stereo(), empty_detector());
        assert_eq!(c.capacity(), 150);
        fill(&c, 160);
        let info = c.buffer_info();
        assert_eq!(info.len, 150);
        assert!((info.time_span - 149.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_frames_rejected() {
        let (c, _rx) = BatchController::new(&Config::default(), stereo(), empty_detector());
        fill(&c, 9);
        assert_eq!(
            c.trigger(0.0),
            Err(TriggerRejection::InsufficientBufferedFrames { have: 9, needed: 10 })
        );
        assert_eq!(c.state(), SystemState::Buffering);
    }

    #[test]
    fn test_cooldown_scenario() {
        let (c, rx) = BatchController::new(&Config::default(), stereo(), empty_detector());
        fill(&c, 15);

        assert_eq!(c.trigger(0.0), Ok(()));
        let report = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(report.frames, 15);
        assert!(matches!(
            report.outcome,
            Err(ProcessingError::InsufficientTrajectoryQuality { .. })
        ));

        assert!(matches!(
            c.trigger(1.0),
            Err(TriggerRejection::CooldownActive { remaining_secs }) if (remaining_secs - 1.0).abs() < 1e-9
        ));
        assert_eq!(c.trigger(2.1), Ok(()));
        rx.recv_timeout(TIMEOUT).unwrap();
    }

    #[test]
    fn test_concurrent_triggers_rejected_while_processing() {
        let gate = Arc::new(Gate::default());
        let worker_gate = gate.clone();
        let detector: Arc<dyn ObjectDetector<Frame>> = Arc::new(move |_: Option<&Frame>| {
            worker_gate.wait();
            Vec::new()
        });
        let (c, rx) = BatchController::new(&Config::default(), stereo(), detector);
        let c = Arc::new(c);
        fill(&c, 15);

        assert_eq!(c.trigger(0.0), Ok(()));
        assert_eq!(c.state(), SystemState::Processing);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let c = c.clone();
                thread::spawn(move || c.trigger(5.0))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Err(TriggerRejection::ProcessingAlreadyInProgress));
        }
        assert_eq!(c.reset(), Err(ResetRefused));
        assert!(!c.clear_buffer());

        // 処理中も追記できる
        c.add_frame_pair(None, None, None);
        assert_eq!(c.buffer_info().len, 16);

        gate.open();
        let report = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(report.frames, 15);
        assert_eq!(c.state(), SystemState::Buffering);
        assert!(!c.is_processing());
        assert_eq!(c.trigger(5.0), Ok(()));
        rx.recv_timeout(TIMEOUT).unwrap();
    }

    #[test]
    fn test_panicking_detector_releases_flag() {
        let detector: Arc<dyn ObjectDetector<Frame>> =
            Arc::new(|_: Option<&Frame>| -> Vec<Detection2D> { panic!("detector exploded") });
        let (c, rx) = BatchController::new(&Config::default(), stereo(), detector);
        fill(&c, 12);

        assert_eq!(c.trigger(0.0), Ok(()));
        let report = rx.recv_timeout(TIMEOUT).unwrap();
        match report.outcome {
            Err(ProcessingError::CriticalProcessingError(msg)) => assert!(msg.contains("exploded")),
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.points.len())),
        }
        assert_eq!(c.state(), SystemState::Buffering);
        // バッファは調査用に残る
        assert_eq!(c.buffer_info().len, 12);
        assert_eq!(c.trigger(3.0), Ok(()));
        rx.recv_timeout(TIMEOUT).unwrap();
    }

    struct LastPointPredictor;

    impl TrajectoryPredictor for LastPointPredictor {
        fn predict(&self, points: &[Point3D]) -> Option<LandingPrediction> {
            let last = points.last()?;
            Some(LandingPrediction {
                position: Vector3::new(last.position.x, last.position.y, 0.0),
                time: last.timestamp,
                path: points.iter().map(|p| p.position).collect(),
            })
        }
    }

    struct HalfCourt;

    impl BoundaryAnalyzer for HalfCourt {
        fn is_in_court(&self, position: &Vector3<f64>, _game: GameType) -> bool {
            (0.0..=610.0).contains(&position.x) && (0.0..=670.0).contains(&position.y)
        }
    }

    #[test]
    fn test_full_pipeline_selects_and_predicts() {
        let stereo = stereo();
        let (c, rx) = BatchController::new(&Config::default(), stereo.clone(), projecting_detector(stereo));
        let c = c
            .with_predictor(Arc::new(LastPointPredictor))
            .with_boundary(Arc::new(HalfCourt), GameType::Doubles);
        fill(&c, 30);
        // 右カメラだけ欠損したフレーム
        c.add_frame_pair(Some((Side::Left, 30)), None, None);

        let now = 30.0 / 30.0;
        assert_eq!(c.trigger(now), Ok(()));
        let report = rx.recv_timeout(TIMEOUT).unwrap();
        let result = report.outcome.unwrap();

        assert_eq!(report.frames, 31);
        assert_eq!(result.points.len(), 30);
        assert_eq!(result.track_count, 1);
        assert!(result.selection.confidence >= 0.3);
        assert!(result.selection.segment.len() >= 5);

        let prediction = result.prediction.unwrap();
        assert_eq!(prediction.in_court, Some(true));
        let last = result.selection.segment.points.last().unwrap();
        assert!((prediction.landing.position.x - last.position.x).abs() < 1e-9);
        assert_eq!(c.state(), SystemState::Buffering);
    }

    #[test]
    fn test_reset_clears_buffers_and_debug() {
        let (c, rx) = BatchController::new(&Config::default(), stereo(), empty_detector());
        fill(&c, 12);
        c.trigger(0.0).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();

        assert_eq!(c.reset(), Ok(()));
        let info = c.buffer_info();
        assert_eq!(info.len, 0);
        assert_eq!(info.state, SystemState::Buffering);
        assert!(c.debug_records().is_empty());
        assert_eq!(c.add_frame_pair(None, None, None), 0.0);
    }
}
