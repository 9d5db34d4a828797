use nalgebra::{DMatrix, DVector, Vector3};

use crate::config::QualityConfig;
use crate::triangulation::Point3D;

/// 各サブスコア（0〜1）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityBreakdown {
    pub physics: f64,
    pub continuity: f64,
    pub completeness: f64,
    pub temporal: f64,
    pub total: f64,
}

/// 最小二乗で y = a·t² + b·t + c を当てはめ、[a, b, c] を返す
pub fn fit_quadratic(t: &[f64], y: &[f64]) -> Option<[f64; 3]> {
    let n = t.len();
    if n < 3 || y.len() != n {
        return None;
    }
    let a = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => t[i] * t[i],
        1 => t[i],
        _ => 1.0,
    });
    let b = DVector::from_column_slice(y);
    let coeffs = a.svd(true, true).solve(&b, 1e-12).ok()?;
    if coeffs.iter().all(|c| c.is_finite()) {
        Some([coeffs[0], coeffs[1], coeffs[2]])
    } else {
        None
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 母標準偏差
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// 物理的妥当性・連続性・完全性・新しさによる軌跡品質評価
#[derive(Debug, Clone)]
pub struct TrajectoryQualityEvaluator {
    config: QualityConfig,
}

impl TrajectoryQualityEvaluator {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// 重み付き合計スコア。3点未満は0
    pub fn evaluate(&self, points: &[Point3D], now: f64) -> f64 {
        self.breakdown(points, now).total
    }

    pub fn breakdown(&self, points: &[Point3D], now: f64) -> QualityBreakdown {
        if points.len() < 3 {
            return QualityBreakdown::default();
        }
        let c = &self.config;
        let physics = self.physics_score(points);
        let continuity = self.continuity_score(points);
        let completeness = self.completeness_score(points);
        let temporal = self.temporal_score(points, now);
        QualityBreakdown {
            physics,
            continuity,
            completeness,
            temporal,
            total: physics * c.physics_weight
                + continuity * c.continuity_weight
                + completeness * c.completeness_weight
                + temporal * c.temporal_weight,
        }
    }

    /// 下降傾向・速度変化の滑らかさ・高さの放物線らしさ
    pub fn physics_score(&self, points: &[Point3D]) -> f64 {
        let c = &self.config;
        let velocities: Vec<Vector3<f64>> = points
            .windows(2)
            .filter_map(|w| {
                let dt = w[1].timestamp - w[0].timestamp;
                (dt > 0.0).then(|| (w[1].position - w[0].position) / dt)
            })
            .collect();
        if velocities.len() < 2 {
            return 0.0;
        }

        let vz: Vec<f64> = velocities.iter().map(|v| v.z).collect();
        let downward = if mean(&vz) < c.downward_velocity { 1.0 } else { 0.3 };

        let deltas: Vec<f64> = velocities.windows(2).map(|w| (w[1] - w[0]).norm()).collect();
        let smoothness = (1.0 - mean(&deltas) / c.max_speed_change).max(0.0);

        let t0 = points[0].timestamp;
        let t: Vec<f64> = points.iter().map(|p| p.timestamp - t0).collect();
        let z: Vec<f64> = points.iter().map(|p| p.position.z).collect();
        let parabola = match fit_quadratic(&t, &z) {
            Some([a, b, c0]) => {
                let residuals: Vec<f64> = t
                    .iter()
                    .zip(&z)
                    .map(|(&ti, &zi)| (zi - (a * ti * ti + b * ti + c0)).abs())
                    .collect();
                (1.0 - mean(&residuals) / c.parabola_error_scale).max(0.0)
            }
            None => 0.5,
        };

        (0.4 * downward + 0.3 * smoothness + 0.3 * parabola).clamp(0.0, 1.0)
    }

    /// フレーム間隔の一様さと移動距離の妥当性
    pub fn continuity_score(&self, points: &[Point3D]) -> f64 {
        if points.len() < 2 {
            return 0.0;
        }
        let c = &self.config;
        let intervals: Vec<f64> = points.windows(2).map(|w| w[1].timestamp - w[0].timestamp).collect();
        let time_consistency = (1.0 - std_dev(&intervals) / c.expected_interval).max(0.0);

        let distances: Vec<f64> = points
            .windows(2)
            .map(|w| (w[1].position - w[0].position).norm())
            .collect();
        let avg = mean(&distances);
        let distance_score = if (c.distance_min..=c.distance_max).contains(&avg) {
            1.0
        } else {
            (1.0 - (avg - c.distance_target).abs() / c.distance_scale).max(0.0)
        };

        0.6 * time_consistency + 0.4 * distance_score
    }

    /// 点数・高さの幅・地面への接近・時間幅
    pub fn completeness_score(&self, points: &[Point3D]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let c = &self.config;
        let length = (points.len() as f64 / c.min_trajectory_length.max(1) as f64).min(1.0);

        let (min_z, max_z) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.position.z), hi.max(p.position.z))
        });
        let height = ((max_z - min_z) / c.height_scale).min(1.0);
        let ground = (1.0 - min_z / c.ground_scale).max(0.0);

        let span = points[points.len() - 1].timestamp - points[0].timestamp;
        let time = (span / c.full_time_span).min(1.0);

        0.3 * length + 0.3 * height + 0.2 * ground + 0.2 * time
    }

    /// 最新点からの経過時間による指数減衰
    pub fn temporal_score(&self, points: &[Point3D], now: f64) -> f64 {
        match points.last() {
            Some(last) => (-(now - last.timestamp) / self.config.temporal_decay).exp(),
            None => 0.0,
        }
    }
}
