use nalgebra::{Matrix3, Matrix3x4, Rotation3, UnitQuaternion, Vector2, Vector3};

/// 単一カメラの内部・外部パラメータ（ワールド→カメラ: X_c = R·X_w + t）
///
/// 一度構築したら変更しない。射影行列とカメラ位置は構築時に導出する。
#[derive(Debug, Clone, PartialEq)]
pub struct CameraProfile {
    intrinsic: Matrix3<f64>,
    /// 歪み係数 [k1, k2, p1, p2, k3]
    dist_coeffs: [f64; 5],
    rvec: Vector3<f64>,
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    position: Vector3<f64>,
    projection: Matrix3x4<f64>,
    pub image_width: u32,
    pub image_height: u32,
}

/// Rodrigues 回転ベクトル → 回転行列
pub fn rotation_from_rvec(rvec: &Vector3<f64>) -> Matrix3<f64> {
    *Rotation3::from_scaled_axis(*rvec).matrix()
}

/// 回転行列 → Rodrigues 回転ベクトル
///
/// 四元数経由で求める。回転角 π 付近でも軸が崩れない。
pub fn rvec_from_rotation(rotation: &Matrix3<f64>) -> Vector3<f64> {
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*rotation)).scaled_axis()
}

impl CameraProfile {
    /// 内部パラメータと (rvec, tvec) から構築
    ///
    /// 歪み係数は OpenCV 順 (k1, k2, p1, p2, k3, ...)。5個未満は0で埋め、6個目以降は無視する。
    pub fn new(
        intrinsic: Matrix3<f64>,
        dist_coeffs: &[f64],
        rvec: Vector3<f64>,
        translation: Vector3<f64>,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let mut dc = [0.0; 5];
        for (dst, src) in dc.iter_mut().zip(dist_coeffs) {
            *dst = *src;
        }

        let rotation = rotation_from_rvec(&rvec);
        let position = -(rotation.transpose() * translation);

        // P = K * [R | t]
        let mut rt = Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        rt.set_column(3, &translation);
        let projection = intrinsic * rt;

        Self {
            intrinsic,
            dist_coeffs: dc,
            rvec,
            rotation,
            translation,
            position,
            projection,
            image_width,
            image_height,
        }
    }

    /// ワールド座標の eye から target を向くカメラ（ワールドZ軸が上、画像y軸が下）
    pub fn looking_at(
        intrinsic: Matrix3<f64>,
        eye: Vector3<f64>,
        target: Vector3<f64>,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let forward = (target - eye).normalize();
        let mut right = forward.cross(&Vector3::z());
        if right.norm() < 1e-9 {
            // 真上・真下を向く場合
            right = Vector3::x();
        }
        let right = right.normalize();
        let down = forward.cross(&right);

        let rotation = Matrix3::from_rows(&[
            right.transpose(),
            down.transpose(),
            forward.transpose(),
        ]);
        let translation = -(rotation * eye);
        Self::new(
            intrinsic,
            &[],
            rvec_from_rotation(&rotation),
            translation,
            image_width,
            image_height,
        )
    }

    pub fn intrinsic(&self) -> &Matrix3<f64> {
        &self.intrinsic
    }

    pub fn dist_coeffs(&self) -> &[f64; 5] {
        &self.dist_coeffs
    }

    pub fn rvec(&self) -> &Vector3<f64> {
        &self.rvec
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// カメラ中心のワールド座標 -Rᵗ·t
    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub fn projection(&self) -> &Matrix3x4<f64> {
        &self.projection
    }

    fn has_distortion(&self) -> bool {
        self.dist_coeffs.iter().any(|&c| c != 0.0)
    }

    /// 正規化カメラ座標に歪みモデルを適用
    pub fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.dist_coeffs;
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        (
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// 正規化座標 → ピクセル座標（歪みあり）
    pub fn normalized_to_pixel(&self, x: f64, y: f64) -> Vector2<f64> {
        let (xd, yd) = self.distort_normalized(x, y);
        let k = &self.intrinsic;
        Vector2::new(
            k[(0, 0)] * xd + k[(0, 1)] * yd + k[(0, 2)],
            k[(1, 1)] * yd + k[(1, 2)],
        )
    }

    /// ワールド点をピクセルへ投影。カメラの後方にある点は None
    pub fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        let pc = self.rotation * point + self.translation;
        if pc.z <= 1e-9 {
            return None;
        }
        Some(self.normalized_to_pixel(pc.x / pc.z, pc.y / pc.z))
    }

    /// 歪んだピクセル座標 → 歪み補正済みの正規化カメラ座標
    /// Newton-Raphson法による歪み補正（大きな歪み係数でも収束）
    pub fn undistort_normalized(&self, u_dist: f64, v_dist: f64) -> (f64, f64) {
        let fx = self.intrinsic[(0, 0)];
        let fy = self.intrinsic[(1, 1)];
        let skew = self.intrinsic[(0, 1)];
        let cx = self.intrinsic[(0, 2)];
        let cy = self.intrinsic[(1, 2)];

        // ピクセル→正規化カメラ座標（歪みあり = ターゲット）
        let yd = (v_dist - cy) / fy;
        let xd = (u_dist - cx - skew * yd) / fx;

        if !self.has_distortion() {
            return (xd, yd);
        }

        let [k1, k2, p1, p2, k3] = self.dist_coeffs;
        let mut x = xd;
        let mut y = yd;
        let mut best_x = x;
        let mut best_y = y;
        let mut best_residual = f64::MAX;

        for _ in 0..30 {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
            let dr_dr2 = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;

            let fx_val = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x) - xd;
            let fy_val = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y - yd;

            let residual = fx_val * fx_val + fy_val * fy_val;
            if residual < best_residual {
                best_residual = residual;
                best_x = x;
                best_y = y;
            }
            if residual < 1e-24 {
                break;
            }

            // ヤコビアン
            let j00 = radial + 2.0 * x * x * dr_dr2 + 2.0 * p1 * y + 6.0 * p2 * x;
            let j01 = 2.0 * x * y * dr_dr2 + 2.0 * p1 * x + 2.0 * p2 * y;
            let j10 = j01;
            let j11 = radial + 2.0 * y * y * dr_dr2 + 6.0 * p1 * y + 2.0 * p2 * x;

            let det = j00 * j11 - j01 * j10;
            if det.abs() < 1e-12 {
                break; // 特異ヤコビアン → best値を使用
            }

            x -= (j11 * fx_val - j01 * fy_val) / det;
            y -= (-j10 * fx_val + j00 * fy_val) / det;
        }

        (best_x, best_y)
    }

    /// ピクセルを通る視線のワールド方向（単位ベクトル）
    pub fn world_ray(&self, u: f64, v: f64) -> Vector3<f64> {
        let (x, y) = self.undistort_normalized(u, v);
        (self.rotation.transpose() * Vector3::new(x, y, 1.0)).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn k() -> Matrix3<f64> {
        Matrix3::new(1000.0, 0.0, 640.0, 0.0, 1000.0, 360.0, 0.0, 0.0, 1.0)
    }

    #[test]
    fn test_rodrigues_round_trip() {
        let rvec = Vector3::new(0.3, -1.2, 0.5);
        let r = rotation_from_rvec(&rvec);
        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(rvec_from_rotation(&r), rvec, epsilon = 1e-10);
        assert_relative_eq!(rotation_from_rvec(&Vector3::zeros()), Matrix3::identity());
    }

    #[test]
    fn test_rodrigues_round_trip_near_half_turn() {
        let axis = Vector3::new(0.6, -0.8, 0.0);
        let rvec = axis * (std::f64::consts::PI - 1e-6);
        let r = rotation_from_rvec(&rvec);
        let back = rvec_from_rotation(&r);
        assert!(back.iter().all(|v| v.is_finite()));
        assert_relative_eq!(back, rvec, epsilon = 1e-8);
        assert_relative_eq!(rotation_from_rvec(&back), r, epsilon = 1e-12);
    }

    #[test]
    fn test_rodrigues_half_turn_rebuilds_rotation() {
        // 角度 π では rvec の符号が不定なので行列で比べる
        for axis in [Vector3::x(), Vector3::new(0.0, 0.6, 0.8), Vector3::new(1.0, 1.0, 1.0).normalize()] {
            let r = rotation_from_rvec(&(axis * std::f64::consts::PI));
            let back = rvec_from_rotation(&r);
            assert!(back.iter().all(|v| v.is_finite()));
            assert_relative_eq!(back.norm(), std::f64::consts::PI, epsilon = 1e-9);
            assert_relative_eq!(rotation_from_rvec(&back), r, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_looking_at_from_far_baseline_keeps_position() {
        // 奥のベースライン裏から手前側を見ると回転角がちょうど π になる
        let eye = Vector3::new(305.0, 1400.0, 20.0);
        let target = Vector3::new(305.0, 236.0, 0.0);
        let cam = CameraProfile::looking_at(k(), eye, target, 1280, 720);
        assert!(cam.rvec().iter().all(|v| v.is_finite()));
        assert_relative_eq!(*cam.position(), eye, epsilon = 1e-9);
        let px = cam.project(&target).unwrap();
        assert_relative_eq!(px, Vector2::new(640.0, 360.0), epsilon = 1e-6);
    }

    #[test]
    fn test_position_is_minus_rt_t() {
        let eye = Vector3::new(100.0, -400.0, 300.0);
        let cam = CameraProfile::looking_at(k(), eye, Vector3::new(300.0, 300.0, 0.0), 1280, 720);
        assert_relative_eq!(*cam.position(), eye, epsilon = 1e-9);
    }

    #[test]
    fn test_looking_at_projects_target_to_principal_point() {
        let target = Vector3::new(305.0, 236.0, 0.0);
        let cam = CameraProfile::looking_at(k(), Vector3::new(305.0, -500.0, 400.0), target, 1280, 720);
        let px = cam.project(&target).unwrap();
        assert_relative_eq!(px, Vector2::new(640.0, 360.0), epsilon = 1e-6);

        // ワールドの上方向は画像の上（v が小さい）へ写る
        let above = cam.project(&(target + Vector3::new(0.0, 0.0, 50.0))).unwrap();
        assert!(above.y < 360.0);
    }

    #[test]
    fn test_projection_matrix_matches_project() {
        let cam = CameraProfile::looking_at(k(), Vector3::new(0.0, -600.0, 500.0), Vector3::zeros(), 1280, 720);
        let p = Vector3::new(120.0, 80.0, 30.0);
        let h = cam.projection() * p.push(1.0);
        let px = cam.project(&p).unwrap();
        assert_relative_eq!(h.x / h.z, px.x, epsilon = 1e-9);
        assert_relative_eq!(h.y / h.z, px.y, epsilon = 1e-9);
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let cam = CameraProfile::new(
            k(),
            &[-0.25, 0.08, 0.001, -0.0005, 0.0],
            Vector3::zeros(),
            Vector3::zeros(),
            1280,
            720,
        );
        let (x, y) = (0.31, -0.22);
        let px = cam.normalized_to_pixel(x, y);
        let (ux, uy) = cam.undistort_normalized(px.x, px.y);
        assert_relative_eq!(ux, x, epsilon = 1e-9);
        assert_relative_eq!(uy, y, epsilon = 1e-9);
    }

    #[test]
    fn test_point_behind_camera_not_projected() {
        let cam = CameraProfile::new(k(), &[], Vector3::zeros(), Vector3::zeros(), 1280, 720);
        assert!(cam.project(&Vector3::new(0.0, 0.0, -10.0)).is_none());
    }
}
