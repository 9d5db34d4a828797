use anyhow::{Context, Result};
use kornia_pnp::PnPMethod;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DMatrix, DVector, Dyn, Matrix3, Owned, SymmetricEigen, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::camera::profile::rvec_from_rotation;
use crate::camera::CameraProfile;
use crate::config::CalibrationConfig;
use crate::court::{CourtReferencePoint, MANUAL_CORNER_INDICES};
use crate::error::CalibrationError;

// --- データ構造 ---

/// 既存の内部パラメータ（チェッカーボード等で別途求めたもの）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicParameters {
    /// K (row-major 3x3)
    pub camera_matrix: [[f64; 3]; 3],
    /// 歪み係数 (k1, k2, p1, p2, k3)
    pub distortion_coefficients: Vec<f64>,
    pub image_width: u32,
    pub image_height: u32,
}

impl IntrinsicParameters {
    pub fn matrix(&self) -> Matrix3<f64> {
        from_rows3(&self.camera_matrix)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read intrinsics {}", path.display()))?;
        let intrinsics = serde_json::from_str(&content).context("Failed to parse intrinsics")?;
        Ok(intrinsics)
    }
}

/// 外部パラメータキャリブレーション結果（永続化形式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicCalibration {
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion_coefficients: Vec<f64>,
    /// 回転ベクトル (Rodrigues)
    pub rotation_vector: [f64; 3],
    pub translation_vector: [f64; 3],
    /// K·[R|t] (row-major 3x4)
    pub projection_matrix: [[f64; 4]; 3],
    pub image_width: u32,
    pub image_height: u32,
    pub calibration_date: String,
    /// RMS再投影誤差（ピクセル）
    pub reprojection_error: f64,
}

impl ExtrinsicCalibration {
    pub fn from_profile(profile: &CameraProfile, reprojection_error: f64) -> Self {
        let p = profile.projection();
        let r = profile.rvec();
        let t = profile.translation();
        Self {
            camera_matrix: to_rows3(profile.intrinsic()),
            distortion_coefficients: profile.dist_coeffs().to_vec(),
            rotation_vector: [r.x, r.y, r.z],
            translation_vector: [t.x, t.y, t.z],
            projection_matrix: [
                [p[(0, 0)], p[(0, 1)], p[(0, 2)], p[(0, 3)]],
                [p[(1, 0)], p[(1, 1)], p[(1, 2)], p[(1, 3)]],
                [p[(2, 0)], p[(2, 1)], p[(2, 2)], p[(2, 3)]],
            ],
            image_width: profile.image_width,
            image_height: profile.image_height,
            calibration_date: chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
            reprojection_error,
        }
    }

    /// 射影行列と位置は保存値ではなく R, t から再計算する
    pub fn to_profile(&self) -> CameraProfile {
        CameraProfile::new(
            from_rows3(&self.camera_matrix),
            &self.distortion_coefficients,
            Vector3::from(self.rotation_vector),
            Vector3::from(self.translation_vector),
            self.image_width,
            self.image_height,
        )
    }
}

fn to_rows3(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

fn from_rows3(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| rows[r][c])
}

// --- Save / Load ---

pub fn save_calibration<P: AsRef<Path>>(path: P, cal: &ExtrinsicCalibration) -> Result<()> {
    let json = serde_json::to_string_pretty(cal)?;
    fs::write(path, json).context("Failed to write calibration file")?;
    Ok(())
}

pub fn load_calibration<P: AsRef<Path>>(path: P) -> Result<ExtrinsicCalibration> {
    let content = fs::read_to_string(path).context("Failed to read calibration file")?;
    let cal: ExtrinsicCalibration = serde_json::from_str(&content)?;
    Ok(cal)
}

/// 保存済みキャリブレーションからカメラを復元
pub fn load_profile<P: AsRef<Path>>(path: P) -> Result<CameraProfile> {
    Ok(load_calibration(path)?.to_profile())
}

// --- コーナー統合 ---

/// 近接する検出点をまとめる
///
/// 各点は既存クラスタのいずれかのメンバーと半径未満なら最初に見つかったクラスタへ入り、
/// そうでなければ新しいクラスタを作る。クラスタは平均へ縮約する。
/// 手動点は、半径内に統合済みの点が無い場合だけ追加する。
pub fn consolidate_corners(
    detected: &[Vector2<f64>],
    manual: &[Vector2<f64>],
    radius: f64,
) -> Vec<Vector2<f64>> {
    let mut clusters: Vec<Vec<Vector2<f64>>> = Vec::new();
    for p in detected {
        let home = clusters
            .iter_mut()
            .find(|cluster| cluster.iter().any(|q| (p - q).norm() < radius));
        match home {
            Some(cluster) => cluster.push(*p),
            None => clusters.push(vec![*p]),
        }
    }

    let mut points: Vec<Vector2<f64>> = clusters
        .iter()
        .map(|c| c.iter().sum::<Vector2<f64>>() / c.len() as f64)
        .collect();

    for m in manual {
        if !points.iter().any(|p| (p - m).norm() < radius) {
            points.push(*m);
        }
    }
    points
}

// --- ホモグラフィ ---

/// 重心を原点へ移し、平均距離が √2 になる正規化変換
fn normalize_points(pts: &[Vector2<f64>]) -> (Matrix3<f64>, Vec<Vector2<f64>>) {
    let n = pts.len() as f64;
    let centroid = pts.iter().sum::<Vector2<f64>>() / n;
    let mean_dist = pts.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * centroid.x, 0.0, s, -s * centroid.y, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| (p - centroid) * s).collect();
    (t, normalized)
}

/// 最小固有値に対応する固有ベクトル（AᵀA の零空間の近似）
fn smallest_eigenvector(a: &DMatrix<f64>) -> DVector<f64> {
    let eig = SymmetricEigen::new(a.transpose() * a);
    let mut min_idx = 0;
    for i in 1..eig.eigenvalues.len() {
        if eig.eigenvalues[i] < eig.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    eig.eigenvectors.column(min_idx).into_owned()
}

/// 4点以上の対応から dst ≈ H·src となるホモグラフィをDLTで推定
pub fn estimate_homography(
    src: &[Vector2<f64>],
    dst: &[Vector2<f64>],
) -> Result<Matrix3<f64>, CalibrationError> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(CalibrationError::DegenerateCorners(format!(
            "homography needs 4 or more matching pairs, got {} and {}",
            n,
            dst.len()
        )));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
        a[(2 * i, 3)] = -s.x;
        a[(2 * i, 4)] = -s.y;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = d.y * s.x;
        a[(2 * i, 7)] = d.y * s.y;
        a[(2 * i, 8)] = d.y;

        a[(2 * i + 1, 0)] = s.x;
        a[(2 * i + 1, 1)] = s.y;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -d.x * s.x;
        a[(2 * i + 1, 7)] = -d.x * s.y;
        a[(2 * i + 1, 8)] = -d.x;
    }

    let h = smallest_eigenvector(&a);
    let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let t_dst_inv = t_dst.try_inverse().ok_or_else(|| {
        CalibrationError::DegenerateCorners("destination points are coincident".into())
    })?;
    let mut hm = t_dst_inv * h_n * t_src;

    let scale = hm[(2, 2)];
    if scale.abs() > 1e-15 {
        hm /= scale;
    }
    if hm.iter().any(|v| !v.is_finite()) || hm.determinant().abs() < 1e-15 {
        return Err(CalibrationError::DegenerateCorners("singular homography".into()));
    }
    Ok(hm)
}

/// H·[x, y, 1] を非同次化
pub fn apply_homography(h: &Matrix3<f64>, p: &Vector2<f64>) -> Option<Vector2<f64>> {
    let q = h * Vector3::new(p.x, p.y, 1.0);
    if q.z.abs() < 1e-15 {
        return None;
    }
    Some(Vector2::new(q.x / q.z, q.y / q.z))
}

// --- 対応付け ---

/// 参照点と画像上の点の対応
#[derive(Debug, Clone, PartialEq)]
pub struct CourtMatch {
    pub label: String,
    pub pixel: Vector2<f64>,
    pub world: Vector3<f64>,
    /// 手動指定の4隅なら true
    pub manual: bool,
}

/// 手動の4隅によるホモグラフィで参照点の予想位置を求め、検出点を最も近い参照点へ割り当てる
///
/// 戻り値は参照点インデックス → 対応。同じ参照点に複数の検出が割り当てられた場合は後勝ち。
/// 4隅は常に上書きで割り当てる。
pub fn match_corners(
    detected: &[Vector2<f64>],
    manual: &[Vector2<f64>; 4],
    catalogue: &[CourtReferencePoint],
    threshold: f64,
) -> Result<BTreeMap<usize, CourtMatch>, CalibrationError> {
    if let Some(&idx) = MANUAL_CORNER_INDICES.iter().find(|&&i| i >= catalogue.len()) {
        return Err(CalibrationError::DegenerateCorners(format!(
            "catalogue has no reference point {}",
            idx
        )));
    }
    let court: Vec<Vector2<f64>> = MANUAL_CORNER_INDICES
        .iter()
        .map(|&i| catalogue[i].position.xy())
        .collect();
    let court_to_image = estimate_homography(&court, manual)?;

    let expected: Vec<Option<Vector2<f64>>> = catalogue
        .iter()
        .map(|r| apply_homography(&court_to_image, &r.position.xy()))
        .collect();

    let mut matches = BTreeMap::new();
    for p in detected {
        let mut best: Option<(usize, f64)> = None;
        for (idx, e) in expected.iter().enumerate() {
            let Some(e) = e else { continue };
            let d = (p - e).norm();
            if d < threshold && best.map_or(true, |(_, min)| d < min) {
                best = Some((idx, d));
            }
        }
        if let Some((idx, _)) = best {
            matches.insert(
                idx,
                CourtMatch {
                    label: catalogue[idx].label.clone(),
                    pixel: *p,
                    world: catalogue[idx].position,
                    manual: false,
                },
            );
        }
    }

    for (corner, &idx) in manual.iter().zip(&MANUAL_CORNER_INDICES) {
        matches.insert(
            idx,
            CourtMatch {
                label: catalogue[idx].label.clone(),
                pixel: *corner,
                world: catalogue[idx].position,
                manual: true,
            },
        );
    }

    Ok(matches)
}

// --- PnP ---

/// 姿勢推定の結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnPSolution {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    /// RMS再投影誤差（ピクセル）
    pub rms: f64,
    pub iterations: usize,
}

fn pnp_failed(msg: impl Into<String>) -> CalibrationError {
    CalibrationError::PnPSolveFailed(msg.into())
}

/// 近似回転行列を最も近い回転へ射影
fn nearest_rotation(m: &Matrix3<f64>) -> Result<Matrix3<f64>, CalibrationError> {
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(pnp_failed("SVD failed"));
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let flip = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        r = u * flip * v_t;
    }
    Ok(r)
}

/// 平面上の点（Z 一定）: 正規化座標へのホモグラフィ H ∝ [r1 r2 t'] を分解
fn planar_initial_pose(
    world: &[Vector3<f64>],
    normalized: &[Vector2<f64>],
) -> Result<(Matrix3<f64>, Vector3<f64>), CalibrationError> {
    let z0 = world[0].z;
    let src: Vec<Vector2<f64>> = world.iter().map(|p| p.xy()).collect();
    let h = estimate_homography(&src, normalized)?;

    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm < 1e-15 {
        return Err(pnp_failed("degenerate plane homography"));
    }
    let mut lambda = 1.0 / norm;

    // 点群の重心がカメラ前方に来る符号を選ぶ
    let centroid = src.iter().sum::<Vector2<f64>>() / src.len() as f64;
    let depth = (h1 * centroid.x + h2 * centroid.y + h3).z;
    if depth < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let rotation = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]))?;
    let t = h3 * lambda - rotation.column(2) * z0;
    Ok((rotation, t))
}

/// 一般配置の点: EPnP で初期姿勢を求める
///
/// 歪みを除いたピクセル座標を渡す。共面の点では解が退化するので使わない。
fn epnp_initial_pose(
    world: &[Vector3<f64>],
    normalized: &[Vector2<f64>],
    intrinsic: &Matrix3<f64>,
) -> Result<(Matrix3<f64>, Vector3<f64>), CalibrationError> {
    let world_f32: Vec<[f32; 3]> = world
        .iter()
        .map(|p| [p.x as f32, p.y as f32, p.z as f32])
        .collect();
    let image_f32: Vec<[f32; 2]> = normalized
        .iter()
        .map(|m| {
            let px = intrinsic * Vector3::new(m.x, m.y, 1.0);
            [px.x as f32, px.y as f32]
        })
        .collect();
    let mut k = [[0f32; 3]; 3];
    for (r, row) in k.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = intrinsic[(r, c)] as f32;
        }
    }

    let result = kornia_pnp::solve_pnp(&world_f32, &image_f32, &k, None, PnPMethod::EPnPDefault)
        .map_err(|e| pnp_failed(format!("EPnP: {}", e)))?;
    let r = result.rotation;
    let rotation = Matrix3::from_fn(|i, j| r[i][j] as f64);
    let t = Vector3::new(
        result.translation[0] as f64,
        result.translation[1] as f64,
        result.translation[2] as f64,
    );
    if rotation.iter().chain(t.iter()).any(|v| !v.is_finite()) {
        return Err(pnp_failed("non-finite EPnP pose"));
    }
    Ok((nearest_rotation(&rotation)?, t))
}

/// カメラ後方に回った点の残差。LMの試行ステップを棄却させる
const BEHIND_CAMERA_PENALTY: f64 = 1e6;

/// 再投影誤差の最小化問題。パラメータは [rvec; tvec]
struct PoseRefinement<'a> {
    intrinsic: Matrix3<f64>,
    dist_coeffs: &'a [f64],
    world: &'a [Vector3<f64>],
    image: &'a [Vector2<f64>],
    params: DVector<f64>,
}

impl PoseRefinement<'_> {
    fn profile_at(&self, x: &DVector<f64>) -> CameraProfile {
        CameraProfile::new(
            self.intrinsic,
            self.dist_coeffs,
            Vector3::new(x[0], x[1], x[2]),
            Vector3::new(x[3], x[4], x[5]),
            0,
            0,
        )
    }

    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let profile = self.profile_at(x);
        let mut r = DVector::zeros(2 * self.world.len());
        for (i, (w, p)) in self.world.iter().zip(self.image).enumerate() {
            let (du, dv) = match profile.project(w) {
                Some(q) => (q.x - p.x, q.y - p.y),
                None => (BEHIND_CAMERA_PENALTY, BEHIND_CAMERA_PENALTY),
            };
            r[2 * i] = du;
            r[2 * i + 1] = dv;
        }
        r
    }

    fn all_in_front(&self) -> bool {
        let profile = self.profile_at(&self.params);
        self.world.iter().all(|w| profile.project(w).is_some())
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseRefinement<'_> {
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.residuals_at(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    /// 中心差分。並進は座標の大きさに合わせて刻みを広げる
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let x = &self.params;
        let t_scale = x.rows(3, 3).amax().max(1.0);
        let mut j = DMatrix::zeros(2 * self.world.len(), 6);
        for c in 0..6 {
            let h = if c < 3 { 1e-6 } else { 1e-6 * t_scale };
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[c] += h;
            xm[c] -= h;
            let col = (self.residuals_at(&xp) - self.residuals_at(&xm)) / (2.0 * h);
            j.set_column(c, &col);
        }
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

/// 3D-2D対応からカメラ姿勢を求める（歪み考慮）
///
/// 平面上の点はホモグラフィ分解、それ以外は EPnP で初期値を作り、LMで再投影誤差を最小化する。
pub fn solve_pnp(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    intrinsic: &Matrix3<f64>,
    dist_coeffs: &[f64],
    max_iters: usize,
) -> Result<PnPSolution, CalibrationError> {
    if world.len() != image.len() {
        return Err(pnp_failed(format!(
            "{} world points but {} image points",
            world.len(),
            image.len()
        )));
    }
    if world.len() < 6 {
        return Err(CalibrationError::InsufficientCorrespondences {
            needed: 6,
            got: world.len(),
        });
    }

    let lens = CameraProfile::new(*intrinsic, dist_coeffs, Vector3::zeros(), Vector3::zeros(), 0, 0);
    let normalized: Vec<Vector2<f64>> = image
        .iter()
        .map(|p| {
            let (x, y) = lens.undistort_normalized(p.x, p.y);
            Vector2::new(x, y)
        })
        .collect();

    let z0 = world[0].z;
    let planar = world.iter().all(|p| (p.z - z0).abs() < 1e-9);
    let (rotation, t) = if planar {
        planar_initial_pose(world, &normalized)?
    } else {
        epnp_initial_pose(world, &normalized, intrinsic)?
    };
    let rvec = rvec_from_rotation(&rotation);
    log::debug!(
        "PnP initial pose ({}): rvec={:?}, t={:?}",
        if planar { "planar" } else { "EPnP" },
        rvec.as_slice(),
        t.as_slice()
    );

    let problem = PoseRefinement {
        intrinsic: *intrinsic,
        dist_coeffs,
        world,
        image,
        params: DVector::from_column_slice(&[rvec.x, rvec.y, rvec.z, t.x, t.y, t.z]),
    };
    if !problem.all_in_front() {
        return Err(pnp_failed("initial pose places points behind the camera"));
    }
    let (refined, report) = LevenbergMarquardt::new()
        .with_patience(max_iters.max(1))
        .minimize(problem);
    if report.termination.was_usage_issue() || matches!(report.termination, TerminationReason::User(_)) {
        return Err(pnp_failed(format!("LM refinement aborted: {:?}", report.termination)));
    }
    if !report.termination.was_successful() {
        log::warn!("LM refinement stopped early: {:?}", report.termination);
    }

    let x = refined.params();
    if x.iter().any(|v| !v.is_finite()) || !refined.all_in_front() {
        return Err(pnp_failed("non-finite pose"));
    }
    let rms = (refined.residuals_at(&x).norm_squared() / world.len() as f64).sqrt();
    Ok(PnPSolution {
        rvec: Vector3::new(x[0], x[1], x[2]),
        tvec: Vector3::new(x[3], x[4], x[5]),
        rms,
        iterations: report.number_of_evaluations,
    })
}

// --- 外部パラメータキャリブレーション ---

/// キャリブレーション結果
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub profile: CameraProfile,
    pub matches: BTreeMap<usize, CourtMatch>,
    pub reprojection_error: f64,
}

impl CalibrationOutcome {
    pub fn to_artifact(&self) -> ExtrinsicCalibration {
        ExtrinsicCalibration::from_profile(&self.profile, self.reprojection_error)
    }
}

/// コート参照点を使った1台分の外部パラメータ推定
#[derive(Debug, Clone)]
pub struct ExtrinsicCalibrator {
    intrinsics: IntrinsicParameters,
    catalogue: Vec<CourtReferencePoint>,
    config: CalibrationConfig,
}

impl ExtrinsicCalibrator {
    pub fn new(
        intrinsics: IntrinsicParameters,
        catalogue: Vec<CourtReferencePoint>,
        config: &CalibrationConfig,
    ) -> Self {
        Self {
            intrinsics,
            catalogue,
            config: config.clone(),
        }
    }

    /// 検出キーポイントと手動の4隅（統合カタログの先頭4点の順）から推定
    pub fn calibrate(
        &self,
        detected: &[Vector2<f64>],
        manual: &[Vector2<f64>; 4],
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let corners = consolidate_corners(detected, manual, self.config.merge_radius);
        log::info!(
            "Consolidated {} keypoints into {} corners",
            detected.len(),
            corners.len()
        );

        let matches = match_corners(&corners, manual, &self.catalogue, self.config.match_threshold)?;
        let needed = self.config.min_correspondences.max(6);
        if matches.len() < needed {
            return Err(CalibrationError::InsufficientCorrespondences {
                needed,
                got: matches.len(),
            });
        }
        for (idx, m) in &matches {
            log::debug!(
                "Reference {} {} <- ({:.1}, {:.1}){}",
                idx,
                m.label,
                m.pixel.x,
                m.pixel.y,
                if m.manual { " [manual]" } else { "" }
            );
        }

        let world: Vec<Vector3<f64>> = matches.values().map(|m| m.world).collect();
        let image: Vec<Vector2<f64>> = matches.values().map(|m| m.pixel).collect();
        let k = self.intrinsics.matrix();
        let dist = &self.intrinsics.distortion_coefficients;
        let solution = solve_pnp(&world, &image, &k, dist, self.config.pnp_iterations)?;

        let profile = CameraProfile::new(
            k,
            dist,
            solution.rvec,
            solution.tvec,
            self.intrinsics.image_width,
            self.intrinsics.image_height,
        );
        let pos = profile.position();
        log::info!(
            "Extrinsics solved from {} correspondences: RMS {:.3}px, camera at ({:.1}, {:.1}, {:.1})",
            matches.len(),
            solution.rms,
            pos.x,
            pos.y,
            pos.z
        );

        Ok(CalibrationOutcome {
            profile,
            matches,
            reprojection_error: solution.rms,
        })
    }
}
