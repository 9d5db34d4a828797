//! 落下点予測とイン/アウト判定の外部インターフェース

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::triangulation::Point3D;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameType {
    Singles,
    Doubles,
}

/// 外部予測器が返す落下点
#[derive(Debug, Clone, PartialEq)]
pub struct LandingPrediction {
    pub position: Vector3<f64>,
    pub time: f64,
    pub path: Vec<Vector3<f64>>,
}

/// 軌跡セグメントから落下点を外挿する外部コンポーネント
pub trait TrajectoryPredictor: Send + Sync {
    /// 予測できなければ None
    fn predict(&self, points: &[Point3D]) -> Option<LandingPrediction>;
}

/// コート境界判定の外部コンポーネント
pub trait BoundaryAnalyzer: Send + Sync {
    fn is_in_court(&self, position: &Vector3<f64>, game: GameType) -> bool;
}

/// 予測と判定の結果
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    pub landing: LandingPrediction,
    /// 判定器が未設定なら None
    pub in_court: Option<bool>,
}
