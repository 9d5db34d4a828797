use nalgebra::{Matrix3, Vector3};

use crate::camera::CameraProfile;
use crate::config::{CourtBounds, StereoConfig};
use crate::debug::{DebugRecord, OutOfBoundsRecord, TriangulationFailedRecord};
use crate::detect::Detection2D;
use crate::error::StereoError;

/// 三角測量された3D点（cm、秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub position: Vector3<f64>,
    pub timestamp: f64,
    pub confidence: f64,
}

impl Point3D {
    pub fn new(position: Vector3<f64>, timestamp: f64, confidence: f64) -> Self {
        Self { position, timestamp, confidence }
    }
}

/// 1フレーム内の左右検出の対応
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub left: Detection2D,
    pub right: Detection2D,
    /// エピポーラ線からの距離（ピクセル）
    pub residual: f64,
    pub confidence: f64,
}

impl CourtBounds {
    /// 境界を含む範囲判定
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (self.x_min..=self.x_max).contains(&p.x)
            && (self.y_min..=self.y_max).contains(&p.y)
            && (self.z_min..=self.z_max).contains(&p.z)
    }
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// 2台のカメラの外部パラメータから基礎行列 F を計算（x2ᵗ·F·x1 = 0）
pub fn fundamental_matrix(
    left: &CameraProfile,
    right: &CameraProfile,
) -> Result<Matrix3<f64>, StereoError> {
    if (right.position() - left.position()).norm() < 1e-9 {
        return Err(StereoError::DegenerateFundamentalMatrix(
            "zero baseline between cameras".into(),
        ));
    }

    let r_rel = right.rotation() * left.rotation().transpose();
    let t_rel = right.translation() - r_rel * left.translation();
    let e = skew(&t_rel) * r_rel;
    let k1_inv = left.intrinsic().try_inverse().ok_or_else(|| {
        StereoError::DegenerateFundamentalMatrix("left intrinsic matrix is singular".into())
    })?;
    let k2_inv = right.intrinsic().try_inverse().ok_or_else(|| {
        StereoError::DegenerateFundamentalMatrix("right intrinsic matrix is singular".into())
    })?;

    let f = k2_inv.transpose() * e * k1_inv;
    if !f.iter().all(|v| v.is_finite()) || f.norm() < 1e-15 {
        return Err(StereoError::DegenerateFundamentalMatrix(
            "non-finite or vanishing matrix".into(),
        ));
    }
    Ok(f)
}

/// 右画像上のエピポーラ線 l = F·[x, y, 1]ᵗ と点の距離
pub fn epipolar_distance(f: &Matrix3<f64>, left: &Detection2D, right: &Detection2D) -> f64 {
    let l = f * left.pixel().push(1.0);
    let norm = l.xy().norm();
    if norm < 1e-15 {
        return f64::INFINITY;
    }
    (l.xy().dot(&right.pixel()) + l.z).abs() / norm
}

/// エピポーラ拘束による左右検出のマッチング
///
/// 左検出ごとに閾値未満で距離最小の右検出を選ぶ（同距離は先勝ち）。
/// 対応が見つからない左検出は捨てる。
pub fn match_epipolar(
    f: &Matrix3<f64>,
    left: &[Detection2D],
    right: &[Detection2D],
    threshold: f64,
) -> Vec<Correspondence> {
    let mut matches = Vec::new();
    for l in left {
        let mut best: Option<(&Detection2D, f64)> = None;
        for r in right {
            let d = epipolar_distance(f, l, r);
            if d < threshold && best.map_or(true, |(_, min)| d < min) {
                best = Some((r, d));
            }
        }
        if let Some((r, residual)) = best {
            matches.push(Correspondence {
                left: *l,
                right: *r,
                residual,
                confidence: (l.confidence + r.confidence) / 2.0,
            });
        }
    }
    matches
}

/// 2本の光線の最近接点の中点
///
/// c1, c2: カメラ中心、d1, d2: 単位方向ベクトル
pub fn triangulate_rays(
    c1: &Vector3<f64>,
    d1: &Vector3<f64>,
    c2: &Vector3<f64>,
    d2: &Vector3<f64>,
    epsilon: f64,
) -> Result<Vector3<f64>, StereoError> {
    let n = d1.cross(d2);
    let cross_norm = n.norm();
    if cross_norm < epsilon {
        return Err(StereoError::TriangulationDegenerate { cross_norm });
    }

    let n1 = d1.cross(&n);
    let n2 = d2.cross(&n);
    let t1 = (c2 - c1).dot(&n2) / d1.dot(&n2);
    let t2 = (c1 - c2).dot(&n1) / d2.dot(&n1);

    let p1 = c1 + d1 * t1;
    let p2 = c2 + d2 * t2;
    Ok((p1 + p2) / 2.0)
}

/// 1フレームで受理された3D点
#[derive(Debug, Clone, Default)]
pub struct FramePoints {
    pub frame_index: usize,
    pub timestamp: f64,
    pub points: Vec<Point3D>,
}

/// バッチ三角測量の結果
#[derive(Debug, Clone, Default)]
pub struct StereoBatch {
    /// 受理された全点（時系列順）
    pub points: Vec<Point3D>,
    /// 受理点のあるフレームのみ
    pub frames: Vec<FramePoints>,
    pub debug: Vec<DebugRecord>,
}

/// キャリブレーション済みカメラ2台によるステレオ処理
///
/// 基礎行列が退化している場合はマッチングを無効化し、全ての処理が空の結果を返す。
#[derive(Debug, Clone)]
pub struct StereoGeometry {
    left: CameraProfile,
    right: CameraProfile,
    fundamental: Option<Matrix3<f64>>,
    config: StereoConfig,
}

impl StereoGeometry {
    pub fn new(left: CameraProfile, right: CameraProfile, config: &StereoConfig) -> Self {
        let fundamental = match fundamental_matrix(&left, &right) {
            Ok(f) => {
                log::info!("Fundamental matrix computed");
                Some(f)
            }
            Err(e) => {
                log::warn!("{}; stereo matching disabled", e);
                None
            }
        };
        Self {
            left,
            right,
            fundamental,
            config: config.clone(),
        }
    }

    pub fn fundamental(&self) -> Option<&Matrix3<f64>> {
        self.fundamental.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.fundamental.is_some()
    }

    pub fn left(&self) -> &CameraProfile {
        &self.left
    }

    pub fn right(&self) -> &CameraProfile {
        &self.right
    }

    pub fn bounds(&self) -> &CourtBounds {
        &self.config.bounds
    }

    pub fn is_in_bounds(&self, p: &Vector3<f64>) -> bool {
        self.config.bounds.contains(p)
    }

    /// 1フレームの左右検出をマッチング。無効時は空
    pub fn match_points(&self, left: &[Detection2D], right: &[Detection2D]) -> Vec<Correspondence> {
        match &self.fundamental {
            Some(f) => match_epipolar(f, left, right, self.config.epipolar_threshold),
            None => Vec::new(),
        }
    }

    /// 左右のピクセル座標から3D点を三角測量
    pub fn triangulate(
        &self,
        left: &Detection2D,
        right: &Detection2D,
    ) -> Result<Vector3<f64>, StereoError> {
        let d1 = self.left.world_ray(left.x, left.y);
        let d2 = self.right.world_ray(right.x, right.y);
        triangulate_rays(
            self.left.position(),
            &d1,
            self.right.position(),
            &d2,
            self.config.degeneracy_epsilon,
        )
    }

    /// フレーム列の検出をまとめて3D点に変換
    ///
    /// 三角測量失敗と範囲外の点はデバッグ記録に残してスキップする。
    pub fn process_batch(
        &self,
        detections_left: &[Vec<Detection2D>],
        detections_right: &[Vec<Detection2D>],
        timestamps: &[f64],
    ) -> Result<StereoBatch, StereoError> {
        if detections_left.len() != detections_right.len()
            || detections_left.len() != timestamps.len()
        {
            return Err(StereoError::LengthMismatch {
                left: detections_left.len(),
                right: detections_right.len(),
                timestamps: timestamps.len(),
            });
        }

        let mut batch = StereoBatch::default();

        for (frame_index, ((left, right), &timestamp)) in detections_left
            .iter()
            .zip(detections_right)
            .zip(timestamps)
            .enumerate()
        {
            let mut frame = FramePoints {
                frame_index,
                timestamp,
                points: Vec::new(),
            };

            for m in self.match_points(left, right) {
                let position = match self.triangulate(&m.left, &m.right) {
                    Ok(p) => p,
                    Err(_) => {
                        batch.debug.push(DebugRecord::TriangulationFailed(
                            TriangulationFailedRecord {
                                left: m.left,
                                right: m.right,
                                timestamp,
                                frame_index,
                            },
                        ));
                        continue;
                    }
                };

                if self.is_in_bounds(&position) {
                    frame.points.push(Point3D::new(position, timestamp, m.confidence));
                } else {
                    batch.debug.push(DebugRecord::OutOfBounds(OutOfBoundsRecord {
                        point: position,
                        timestamp,
                        frame_index,
                        match_confidence: m.confidence,
                        match_distance: m.residual,
                    }));
                }
            }

            if !frame.points.is_empty() {
                batch.points.extend_from_slice(&frame.points);
                batch.frames.push(frame);
            }
        }

        log::info!(
            "Stereo batch: {} frames -> {} points, {} debug records",
            timestamps.len(),
            batch.points.len(),
            batch.debug.len()
        );
        Ok(batch)
    }
}
