use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// システム全体の設定。トップレベルで一度だけ構築し、各コンポーネントへ参照で渡す
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub stereo: StereoConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub segment: SegmentConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// フレームバッファとバッチ処理トリガーの設定
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// バッファ保持時間（秒）
    #[serde(default = "default_buffer_duration")]
    pub duration_secs: f64,
    /// ソースのフレームレート
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// トリガー間の最小間隔（秒）
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: f64,
    /// トリガーに必要な最小フレームペア数
    #[serde(default = "default_min_frames")]
    pub min_frames_to_trigger: usize,
}

fn default_buffer_duration() -> f64 { 5.0 }
fn default_fps() -> f64 { 30.0 }
fn default_cooldown() -> f64 { 2.0 }
fn default_min_frames() -> usize { 10 }

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_buffer_duration(),
            fps: default_fps(),
            cooldown_secs: default_cooldown(),
            min_frames_to_trigger: default_min_frames(),
        }
    }
}

impl BufferConfig {
    /// リングバッファ容量 = 保持時間 × fps（最低1）
    pub fn capacity(&self) -> usize {
        ((self.duration_secs * self.fps) as usize).max(1)
    }
}

/// コート外側まで広げた3D点の許容範囲（cm、境界を含む）
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CourtBounds {
    #[serde(default = "default_x_min")]
    pub x_min: f64,
    #[serde(default = "default_x_max")]
    pub x_max: f64,
    #[serde(default = "default_y_min")]
    pub y_min: f64,
    #[serde(default = "default_y_max")]
    pub y_max: f64,
    #[serde(default = "default_z_min")]
    pub z_min: f64,
    #[serde(default = "default_z_max")]
    pub z_max: f64,
}

fn default_x_min() -> f64 { -500.0 }
fn default_x_max() -> f64 { 500.0 }
fn default_y_min() -> f64 { -900.0 }
fn default_y_max() -> f64 { 900.0 }
fn default_z_min() -> f64 { 0.0 }
fn default_z_max() -> f64 { 800.0 }

impl Default for CourtBounds {
    fn default() -> Self {
        Self {
            x_min: default_x_min(),
            x_max: default_x_max(),
            y_min: default_y_min(),
            y_max: default_y_max(),
            z_min: default_z_min(),
            z_max: default_z_max(),
        }
    }
}

/// ステレオマッチングと三角測量の設定
#[derive(Debug, Clone, Deserialize)]
pub struct StereoConfig {
    /// エピポーラ線からの最大距離（ピクセル）
    #[serde(default = "default_epipolar_threshold")]
    pub epipolar_threshold: f64,
    /// 光線が平行とみなす外積ノルム
    #[serde(default = "default_degeneracy_epsilon")]
    pub degeneracy_epsilon: f64,
    #[serde(default)]
    pub bounds: CourtBounds,
}

fn default_epipolar_threshold() -> f64 { 18.0 }
fn default_degeneracy_epsilon() -> f64 { 1e-10 }

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            epipolar_threshold: default_epipolar_threshold(),
            degeneracy_epsilon: default_degeneracy_epsilon(),
            bounds: CourtBounds::default(),
        }
    }
}

/// マルチオブジェクトトラッカーの設定
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_max_objects")]
    pub max_objects: usize,
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    #[serde(default = "default_max_missing_frames")]
    pub max_missing_frames: u32,
    /// トラックごとの履歴上限
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_objects() -> usize { 2 }
fn default_distance_threshold() -> f64 { 100.0 }
fn default_max_missing_frames() -> u32 { 10 }
fn default_max_history() -> usize { 50 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_objects: default_max_objects(),
            distance_threshold: default_distance_threshold(),
            max_missing_frames: default_max_missing_frames(),
            max_history: default_max_history(),
        }
    }
}

/// 軌跡品質評価の重みと閾値（単位は cm / 秒）
#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_physics_weight")]
    pub physics_weight: f64,
    #[serde(default = "default_continuity_weight")]
    pub continuity_weight: f64,
    #[serde(default = "default_completeness_weight")]
    pub completeness_weight: f64,
    #[serde(default = "default_temporal_weight")]
    pub temporal_weight: f64,
    /// 下降傾向とみなす平均垂直速度（cm/s、負値）
    #[serde(default = "default_downward_velocity")]
    pub downward_velocity: f64,
    /// 速度変化のスケール（cm/s）
    #[serde(default = "default_max_speed_change")]
    pub max_speed_change: f64,
    /// 放物線フィット誤差のスケール（cm）
    #[serde(default = "default_parabola_error_scale")]
    pub parabola_error_scale: f64,
    /// 期待フレーム間隔（秒）
    #[serde(default = "default_expected_interval")]
    pub expected_interval: f64,
    /// 妥当なフレーム間移動距離の範囲（cm）
    #[serde(default = "default_distance_min")]
    pub distance_min: f64,
    #[serde(default = "default_distance_max")]
    pub distance_max: f64,
    #[serde(default = "default_distance_target")]
    pub distance_target: f64,
    #[serde(default = "default_distance_scale")]
    pub distance_scale: f64,
    #[serde(default = "default_min_trajectory_length")]
    pub min_trajectory_length: usize,
    #[serde(default = "default_height_scale")]
    pub height_scale: f64,
    #[serde(default = "default_ground_scale")]
    pub ground_scale: f64,
    /// 満点となる時間幅（秒）
    #[serde(default = "default_full_time_span")]
    pub full_time_span: f64,
    /// 新しさの減衰時定数（秒）
    #[serde(default = "default_temporal_decay")]
    pub temporal_decay: f64,
}

fn default_physics_weight() -> f64 { 0.3 }
fn default_continuity_weight() -> f64 { 0.25 }
fn default_completeness_weight() -> f64 { 0.25 }
fn default_temporal_weight() -> f64 { 0.2 }
fn default_downward_velocity() -> f64 { -50.0 }
fn default_max_speed_change() -> f64 { 1000.0 }
fn default_parabola_error_scale() -> f64 { 100.0 }
fn default_expected_interval() -> f64 { 1.0 / 30.0 }
fn default_distance_min() -> f64 { 1.0 }
fn default_distance_max() -> f64 { 50.0 }
fn default_distance_target() -> f64 { 25.0 }
fn default_distance_scale() -> f64 { 100.0 }
fn default_min_trajectory_length() -> usize { 8 }
fn default_height_scale() -> f64 { 100.0 }
fn default_ground_scale() -> f64 { 200.0 }
fn default_full_time_span() -> f64 { 1.0 }
fn default_temporal_decay() -> f64 { 2.0 }

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            physics_weight: default_physics_weight(),
            continuity_weight: default_continuity_weight(),
            completeness_weight: default_completeness_weight(),
            temporal_weight: default_temporal_weight(),
            downward_velocity: default_downward_velocity(),
            max_speed_change: default_max_speed_change(),
            parabola_error_scale: default_parabola_error_scale(),
            expected_interval: default_expected_interval(),
            distance_min: default_distance_min(),
            distance_max: default_distance_max(),
            distance_target: default_distance_target(),
            distance_scale: default_distance_scale(),
            min_trajectory_length: default_min_trajectory_length(),
            height_scale: default_height_scale(),
            ground_scale: default_ground_scale(),
            full_time_span: default_full_time_span(),
            temporal_decay: default_temporal_decay(),
        }
    }
}

/// 軌跡セグメント選択の設定
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentConfig {
    #[serde(default = "default_min_segment_length")]
    pub min_segment_length: usize,
    /// 窓の重なり率
    #[serde(default = "default_overlap")]
    pub overlap: f64,
    /// 予測に使う最低スコア
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// 低品質とみなす点間速度（cm/s）
    #[serde(default = "default_high_velocity")]
    pub high_velocity: f64,
    /// トラック終端後に含める時間の余裕（秒）
    #[serde(default = "default_track_time_margin")]
    pub track_time_margin: f64,
    /// トラック由来の信頼度が1になる点数
    #[serde(default = "default_track_full_points")]
    pub track_full_points: usize,
}

fn default_min_segment_length() -> usize { 5 }
fn default_overlap() -> f64 { 0.3 }
fn default_min_confidence() -> f64 { 0.3 }
fn default_high_velocity() -> f64 { 2000.0 }
fn default_track_time_margin() -> f64 { 0.1 }
fn default_track_full_points() -> usize { 20 }

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_segment_length: default_min_segment_length(),
            overlap: default_overlap(),
            min_confidence: default_min_confidence(),
            high_velocity: default_high_velocity(),
            track_time_margin: default_track_time_margin(),
            track_full_points: default_track_full_points(),
        }
    }
}

/// 外部パラメータキャリブレーションの設定
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    /// コーナー統合の半径（ピクセル）
    #[serde(default = "default_merge_radius")]
    pub merge_radius: f64,
    /// 参照点との対応付けの最大距離（ピクセル）
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_min_correspondences")]
    pub min_correspondences: usize,
    /// LM最適化の最大反復回数
    #[serde(default = "default_pnp_iterations")]
    pub pnp_iterations: usize,
    /// 保存先パス
    #[serde(default = "default_calibration_output")]
    pub output_path: String,
}

fn default_merge_radius() -> f64 { 30.0 }
fn default_match_threshold() -> f64 { 50.0 }
fn default_min_correspondences() -> usize { 6 }
fn default_pnp_iterations() -> usize { 50 }
fn default_calibration_output() -> String { "extrinsic_parameters.json".to_string() }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            merge_radius: default_merge_radius(),
            match_threshold: default_match_threshold(),
            min_correspondences: default_min_correspondences(),
            pnp_iterations: default_pnp_iterations(),
            output_path: default_calibration_output(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 設定ファイルがなければデフォルト値で起動する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{:#}; using default configuration", e);
                Self::default()
            }
        }
    }
}
