use serde::Serialize;

use crate::config::{QualityConfig, SegmentConfig};
use crate::debug::{DebugRecord, LowQualityRecord};
use crate::error::ProcessingError;
use crate::tracker::MultiObjectTracker;
use crate::triangulation::Point3D;

use super::segment::{TrajectorySegment, TrajectorySegmentManager};

/// 予測用区間の選び方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SelectionStrategy {
    /// 最良トラックの時間窓に入る点を使う
    TrackBased,
    /// 全点に対するスライディングウィンドウ探索
    Traditional,
}

/// 選ばれた区間と、それを選んだ方法
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSelection {
    pub segment: TrajectorySegment,
    pub strategy: SelectionStrategy,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct SegmentSelector {
    manager: TrajectorySegmentManager,
    min_confidence: f64,
    high_velocity: f64,
    track_time_margin: f64,
    track_full_points: usize,
}

impl SegmentSelector {
    pub fn new(segment: &SegmentConfig, quality: &QualityConfig) -> Self {
        Self {
            manager: TrajectorySegmentManager::new(segment, quality),
            min_confidence: segment.min_confidence,
            high_velocity: segment.high_velocity,
            track_time_margin: segment.track_time_margin,
            track_full_points: segment.track_full_points.max(1),
        }
    }

    pub fn select(
        &self,
        strategy: SelectionStrategy,
        points: &[Point3D],
        tracker: &MultiObjectTracker,
        now: f64,
        debug: &mut Vec<DebugRecord>,
    ) -> Option<SegmentSelection> {
        match strategy {
            SelectionStrategy::TrackBased => self.select_track_based(points, tracker, now, debug),
            SelectionStrategy::Traditional => self.select_traditional(points, now, debug),
        }
    }

    /// トラックベースで選び、信頼度不足なら全点探索でやり直す
    pub fn select_with_fallback(
        &self,
        points: &[Point3D],
        tracker: &MultiObjectTracker,
        now: f64,
        debug: &mut Vec<DebugRecord>,
    ) -> Result<SegmentSelection, ProcessingError> {
        let tracked = self.select_track_window(points, tracker, now);
        if let Some(sel) = &tracked {
            if sel.confidence >= self.min_confidence {
                return Ok(sel.clone());
            }
            log::info!(
                "Track confidence {:.2} below {:.2}, falling back to traditional selection",
                sel.confidence,
                self.min_confidence
            );
        }

        match self.select_traditional(points, now, debug) {
            Some(sel) if sel.confidence >= self.min_confidence => Ok(sel),
            other => Err(self.insufficient(other.as_ref().or(tracked.as_ref()))),
        }
    }

    fn insufficient(&self, best: Option<&SegmentSelection>) -> ProcessingError {
        ProcessingError::InsufficientTrajectoryQuality {
            confidence: best.map_or(0.0, |s| s.confidence),
            required: self.min_confidence,
        }
    }

    fn select_traditional(
        &self,
        points: &[Point3D],
        now: f64,
        debug: &mut Vec<DebugRecord>,
    ) -> Option<SegmentSelection> {
        if points.len() < self.manager.min_segment_length() {
            return None;
        }
        self.record_high_velocity(points, debug);
        self.manager
            .find_best_segment(points, now)
            .map(|segment| SegmentSelection {
                confidence: segment.score,
                segment,
                strategy: SelectionStrategy::Traditional,
            })
    }

    fn record_high_velocity(&self, points: &[Point3D], debug: &mut Vec<DebugRecord>) {
        for w in points.windows(2) {
            let time_diff = w[1].timestamp - w[0].timestamp;
            if time_diff <= 0.0 {
                continue;
            }
            let distance = (w[1].position - w[0].position).norm();
            let velocity = distance / time_diff;
            if velocity > self.high_velocity {
                debug.push(DebugRecord::LowQuality(LowQualityRecord {
                    point: w[1].position,
                    timestamp: w[1].timestamp,
                    velocity,
                    distance,
                    time_diff,
                }));
            }
        }
    }

    fn select_track_based(
        &self,
        points: &[Point3D],
        tracker: &MultiObjectTracker,
        now: f64,
        debug: &mut Vec<DebugRecord>,
    ) -> Option<SegmentSelection> {
        self.select_track_window(points, tracker, now)
            .or_else(|| self.select_traditional(points, now, debug))
    }

    /// 複数トラックがある時だけ、最良トラックの時間窓 [作成時刻, 最終時刻 + 余裕] の点を集める
    fn select_track_window(
        &self,
        points: &[Point3D],
        tracker: &MultiObjectTracker,
        now: f64,
    ) -> Option<SegmentSelection> {
        if tracker.len() <= 1 {
            return None;
        }
        let track = tracker.best_track()?;
        let start = track.created_at;
        let end = track.last_timestamp().unwrap_or(now) + self.track_time_margin;
        log::debug!(
            "Best of {} tracks: id {} ({} points, missing {})",
            tracker.len(),
            track.id,
            track.positions.len(),
            track.missing_frames
        );

        let in_window = |p: &Point3D| p.timestamp >= start && p.timestamp <= end;
        let first = points.iter().position(in_window)?;
        let selected: Vec<Point3D> = points.iter().filter(|&p| in_window(p)).copied().collect();
        if selected.len() < self.manager.min_segment_length() {
            return None;
        }

        let confidence = (selected.len() as f64 / self.track_full_points as f64).min(1.0);
        log::info!("Using {} points from track {}", selected.len(), track.id);
        Some(SegmentSelection {
            segment: TrajectorySegment {
                score: self.manager.evaluator().evaluate(&selected, now),
                points: selected,
                start: first,
            },
            strategy: SelectionStrategy::TrackBased,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::trajectory::quality::tests::falling_trajectory;
    use nalgebra::{Vector2, Vector3};

    fn selector() -> SegmentSelector {
        SegmentSelector::new(&SegmentConfig::default(), &QualityConfig::default())
    }

    fn feed(tracker: &mut MultiObjectTracker, points: &[Point3D], decoy: bool) {
        for p in points {
            let mut obs = vec![(p.position.xy(), p.confidence)];
            if decoy {
                obs.insert(0, (Vector2::new(-400.0, -800.0), 0.2));
            }
            tracker.update(&obs, p.timestamp);
        }
    }

    #[test]
    fn test_traditional_records_high_velocity() {
        let mut pts = falling_trajectory(20, 0.0);
        pts[10].position.x += 500.0;
        let mut debug = Vec::new();
        let tracker = MultiObjectTracker::new(&TrackerConfig::default());
        let sel = selector()
            .select(SelectionStrategy::Traditional, &pts, &tracker, 1.0, &mut debug)
            .unwrap();
        assert_eq!(sel.strategy, SelectionStrategy::Traditional);
        // 跳ね上がりと戻りの2回
        assert_eq!(debug.len(), 2);
        assert!(debug.iter().all(|r| matches!(r, DebugRecord::LowQuality(q) if q.velocity > 2000.0)));
    }

    #[test]
    fn test_single_track_delegates_to_traditional() {
        let pts = falling_trajectory(20, 0.0);
        let mut tracker = MultiObjectTracker::new(&TrackerConfig::default());
        feed(&mut tracker, &pts, false);
        assert_eq!(tracker.len(), 1);

        let mut debug = Vec::new();
        let now = pts.last().unwrap().timestamp;
        let sel = selector()
            .select(SelectionStrategy::TrackBased, &pts, &tracker, now, &mut debug)
            .unwrap();
        assert_eq!(sel.strategy, SelectionStrategy::Traditional);
    }

    #[test]
    fn test_track_based_uses_best_track_window() {
        let pts = falling_trajectory(20, 0.0);
        let mut tracker = MultiObjectTracker::new(&TrackerConfig::default());
        feed(&mut tracker, &pts, true);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.best_track().unwrap().id, 1);

        let mut debug = Vec::new();
        let now = pts.last().unwrap().timestamp;
        let sel = selector()
            .select(SelectionStrategy::TrackBased, &pts, &tracker, now, &mut debug)
            .unwrap();
        assert_eq!(sel.strategy, SelectionStrategy::TrackBased);
        assert_eq!(sel.segment.len(), 20);
        assert_eq!(sel.segment.start, 0);
        assert!((sel.confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fallback_to_traditional_when_track_confidence_low() {
        // 5点だけのトラックは信頼度 0.25 < 0.3
        let pts = falling_trajectory(5, 0.0);
        let mut tracker = MultiObjectTracker::new(&TrackerConfig::default());
        feed(&mut tracker, &pts, true);

        let mut debug = Vec::new();
        let now = pts.last().unwrap().timestamp;
        let s = selector();
        let first = s
            .select(SelectionStrategy::TrackBased, &pts, &tracker, now, &mut debug)
            .unwrap();
        assert_eq!(first.strategy, SelectionStrategy::TrackBased);
        assert!((first.confidence - 0.25).abs() < 1e-12);

        let sel = s.select_with_fallback(&pts, &tracker, now, &mut debug).unwrap();
        assert_eq!(sel.strategy, SelectionStrategy::Traditional);
        assert!(sel.confidence >= 0.3);
    }

    #[test]
    fn test_insufficient_quality() {
        let pts: Vec<Point3D> = (0..3)
            .map(|i| Point3D::new(Vector3::new(0.0, 0.0, 100.0), i as f64, 1.0))
            .collect();
        let tracker = MultiObjectTracker::new(&TrackerConfig::default());
        let mut debug = Vec::new();
        let err = selector()
            .select_with_fallback(&pts, &tracker, 2.0, &mut debug)
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::InsufficientTrajectoryQuality { confidence, required }
                if confidence == 0.0 && (required - 0.3).abs() < 1e-12
        ));
    }
}
