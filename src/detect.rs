use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// 1カメラ・1フレームのシャトル検出（ピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection2D {
    pub x: f64,
    pub y: f64,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f64,
}

impl Detection2D {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self { x, y, confidence }
    }

    pub fn pixel(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

/// 外部の2D物体検出器
///
/// 欠損フレーム（None）に対しては空リストを返すこと。
pub trait ObjectDetector<F>: Send + Sync {
    fn detect(&self, frame: Option<&F>) -> Vec<Detection2D>;
}

impl<F, D> ObjectDetector<F> for D
where
    D: Fn(Option<&F>) -> Vec<Detection2D> + Send + Sync,
{
    fn detect(&self, frame: Option<&F>) -> Vec<Detection2D> {
        self(frame)
    }
}

/// 信頼度の降順に並べ替え、有限でない検出を除外する
pub fn rank_detections(mut detections: Vec<Detection2D>) -> Vec<Detection2D> {
    detections.retain(|d| d.x.is_finite() && d.y.is_finite() && d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_detections_orders_and_filters() {
        let ranked = rank_detections(vec![
            Detection2D::new(1.0, 1.0, 0.4),
            Detection2D::new(f64::NAN, 2.0, 0.99),
            Detection2D::new(3.0, 3.0, 0.9),
            Detection2D::new(4.0, 4.0, 0.6),
        ]);
        let confs: Vec<f64> = ranked.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.6, 0.4]);
    }

    #[test]
    fn test_closure_detector_handles_missing_frame() {
        let detector = |frame: Option<&u32>| match frame {
            Some(_) => vec![Detection2D::new(10.0, 20.0, 0.8)],
            None => Vec::new(),
        };
        assert_eq!(ObjectDetector::detect(&detector, Some(&7)).len(), 1);
        assert!(ObjectDetector::<u32>::detect(&detector, None).is_empty());
    }
}
