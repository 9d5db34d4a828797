use crate::config::{QualityConfig, SegmentConfig};
use crate::triangulation::Point3D;

use super::quality::TrajectoryQualityEvaluator;

/// 連続した3D点の区間とその品質スコア
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySegment {
    pub points: Vec<Point3D>,
    /// 元の点列での開始インデックス
    pub start: usize,
    pub score: f64,
}

impl TrajectorySegment {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn end(&self) -> usize {
        self.start + self.points.len()
    }
}

/// スライディングウィンドウで最良の区間を探す
#[derive(Debug, Clone)]
pub struct TrajectorySegmentManager {
    evaluator: TrajectoryQualityEvaluator,
    min_segment_length: usize,
    overlap: f64,
}

impl TrajectorySegmentManager {
    pub fn new(segment: &SegmentConfig, quality: &QualityConfig) -> Self {
        Self {
            evaluator: TrajectoryQualityEvaluator::new(quality),
            min_segment_length: segment.min_segment_length.max(1),
            overlap: segment.overlap.clamp(0.0, 0.99),
        }
    }

    pub fn evaluator(&self) -> &TrajectoryQualityEvaluator {
        &self.evaluator
    }

    pub fn min_segment_length(&self) -> usize {
        self.min_segment_length
    }

    /// 窓長と刻み幅 (segment_length, step)
    pub fn window(&self, n: usize) -> (usize, usize) {
        let segment_length = self.min_segment_length.max(n / 3);
        let step = ((segment_length as f64 * (1.0 - self.overlap)).floor() as usize).max(1);
        (segment_length, step)
    }

    /// 時系列順の点列から最高スコアの区間を返す。スコア0の区間は選ばない
    pub fn find_best_segment(&self, points: &[Point3D], now: f64) -> Option<TrajectorySegment> {
        let n = points.len();
        if n < self.min_segment_length {
            return None;
        }
        let (segment_length, step) = self.window(n);

        let mut best: Option<TrajectorySegment> = None;
        let mut best_score = 0.0;
        for start in (0..=n - self.min_segment_length).step_by(step) {
            let end = (start + segment_length).min(n);
            let window = &points[start..end];
            let score = self.evaluator.evaluate(window, now);
            log::trace!("Segment [{}, {}) score {:.3}", start, end, score);
            if score > best_score {
                best_score = score;
                best = Some(TrajectorySegment {
                    points: window.to_vec(),
                    start,
                    score,
                });
            }
        }

        if let Some(seg) = &best {
            log::debug!(
                "Best segment [{}, {}) of {} points, score {:.3}",
                seg.start,
                seg.end(),
                n,
                seg.score
            );
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::quality::tests::falling_trajectory;
    use nalgebra::Vector3;

    fn manager() -> TrajectorySegmentManager {
        TrajectorySegmentManager::new(&SegmentConfig::default(), &QualityConfig::default())
    }

    #[test]
    fn test_too_few_points() {
        let pts = falling_trajectory(4, 0.0);
        assert!(manager().find_best_segment(&pts, 1.0).is_none());
    }

    #[test]
    fn test_window_sizes() {
        let m = manager();
        assert_eq!(m.window(5), (5, 3));
        assert_eq!(m.window(60), (20, 14));
        assert_eq!(m.window(90), (30, 21));
    }

    #[test]
    fn test_minimum_length_input_uses_whole_buffer() {
        let pts = falling_trajectory(5, 0.0);
        let seg = manager().find_best_segment(&pts, pts[4].timestamp).unwrap();
        assert_eq!(seg.start, 0);
        assert_eq!(seg.len(), 5);
    }

    #[test]
    fn test_selects_clean_region_after_noise() {
        // 40点のノイズの後に20点の放物線
        let mut pts: Vec<Point3D> = (0..40)
            .map(|i| {
                let x = if i % 2 == 0 { 200.0 } else { -200.0 };
                let z = if i % 2 == 0 { 400.0 } else { 50.0 };
                Point3D::new(Vector3::new(x, 0.0, z), i as f64 / 30.0, 0.5)
            })
            .collect();
        pts.extend(falling_trajectory(20, 40.0 / 30.0));
        let now = pts.last().unwrap().timestamp;

        let seg = manager().find_best_segment(&pts, now).unwrap();
        assert_eq!(seg.start, 42);
        assert_eq!(seg.end(), 60);
        assert!(seg.score > 0.8);
        assert!(seg.timestamps().iter().all(|&t| t >= 40.0 / 30.0));
    }

    #[test]
    fn test_all_windows_scoring_zero_yields_none() {
        let quality = QualityConfig {
            physics_weight: 0.0,
            continuity_weight: 0.0,
            completeness_weight: 0.0,
            temporal_weight: 0.0,
            ..QualityConfig::default()
        };
        let m = TrajectorySegmentManager::new(&SegmentConfig::default(), &quality);
        let pts = falling_trajectory(12, 0.0);
        assert!(m.find_best_segment(&pts, 1.0).is_none());
    }
}
