//! バドミントンコートの参照点カタログ（手前半面、Z=0平面、単位cm）

use nalgebra::Vector3;

/// ラベル付きのコート参照点
#[derive(Debug, Clone, PartialEq)]
pub struct CourtReferencePoint {
    pub label: String,
    pub position: Vector3<f64>,
}

impl CourtReferencePoint {
    pub fn new(label: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            label: label.into(),
            position: Vector3::new(x, y, 0.0),
        }
    }
}

/// 手動選択される4隅の統合カタログ上のインデックス
pub const MANUAL_CORNER_INDICES: [usize; 4] = [0, 1, 2, 3];

const FULL_POINTS: [(&str, f64, f64); 42] = [
    // ベースライン
    ("Bottom Left Outer", 0.0, 0.0),
    ("Bottom Right Outer", 610.0, 0.0),
    ("Bottom Left Inner", 4.0, 4.0),
    ("Bottom Right Inner", 606.0, 4.0),
    ("Left Singles Bottom Left", 46.0, 4.0),
    ("Left Singles Bottom Right", 50.0, 4.0),
    ("Center Line Bottom Left", 303.0, 4.0),
    ("Center Line Bottom Right", 307.0, 4.0),
    ("Right Singles Bottom Left", 560.0, 4.0),
    ("Right Singles Bottom Right", 564.0, 4.0),
    // ダブルス後方サービスライン
    ("Left Doubles Back Service Bottom", 4.0, 76.0),
    ("Left Doubles Back Service Top", 4.0, 80.0),
    ("Left Singles Back Service Bottom Left", 46.0, 76.0),
    ("Left Singles Back Service Bottom Right", 50.0, 76.0),
    ("Left Singles Back Service Top Left", 46.0, 80.0),
    ("Left Singles Back Service Top Right", 50.0, 80.0),
    ("Center Line Back Service Bottom Left", 303.0, 76.0),
    ("Center Line Back Service Bottom Right", 307.0, 76.0),
    ("Center Line Back Service Top Left", 303.0, 80.0),
    ("Center Line Back Service Top Right", 307.0, 80.0),
    ("Right Singles Back Service Bottom Left", 560.0, 76.0),
    ("Right Singles Back Service Bottom Right", 564.0, 76.0),
    ("Right Singles Back Service Top Left", 560.0, 80.0),
    ("Right Singles Back Service Top Right", 564.0, 80.0),
    ("Right Doubles Back Service Bottom", 606.0, 76.0),
    ("Right Doubles Back Service Top", 606.0, 80.0),
    // ショートサービスライン
    ("Left Doubles Front Service Bottom", 4.0, 468.0),
    ("Left Doubles Front Service Top", 4.0, 472.0),
    ("Left Singles Front Service Bottom Left", 46.0, 468.0),
    ("Left Singles Front Service Bottom Right", 50.0, 468.0),
    ("Left Singles Front Service Top Left", 46.0, 472.0),
    ("Left Singles Front Service Top Right", 50.0, 472.0),
    ("Center Line Front Service Bottom Left", 303.0, 468.0),
    ("Center Line Front Service Bottom Right", 307.0, 468.0),
    ("Center Line Front Service Top Left", 303.0, 472.0),
    ("Center Line Front Service Top Right", 307.0, 472.0),
    ("Right Singles Front Service Bottom Left", 560.0, 468.0),
    ("Right Singles Front Service Bottom Right", 564.0, 468.0),
    ("Right Singles Front Service Top Left", 560.0, 472.0),
    ("Right Singles Front Service Top Right", 564.0, 472.0),
    ("Right Doubles Front Service Bottom", 606.0, 468.0),
    ("Right Doubles Front Service Top", 606.0, 472.0),
];

/// 近接する十字交点を1点にまとめた座標。先頭4点は手動選択の4隅
const MERGED_POINTS: [(f64, f64); 19] = [
    (0.0, 0.0),
    (610.0, 0.0),
    (606.0, 472.0),
    (4.0, 472.0),
    (610.0, 472.0),
    (0.0, 472.0),
    (48.0, 4.0),
    (305.0, 4.0),
    (562.0, 4.0),
    (4.0, 78.0),
    (48.0, 78.0),
    (305.0, 78.0),
    (562.0, 78.0),
    (606.0, 78.0),
    // (4, 472) と (606, 472) は手動点なのでここには含めない
    (4.0, 470.0),
    (48.0, 470.0),
    (305.0, 470.0),
    (562.0, 470.0),
    (606.0, 470.0),
];

/// 全参照点カタログ
pub fn full_catalogue() -> Vec<CourtReferencePoint> {
    FULL_POINTS
        .iter()
        .map(|&(label, x, y)| CourtReferencePoint::new(label, x, y))
        .collect()
}

/// カタログ中で最も近い参照点（コート平面上の距離）
pub fn nearest_reference<'a>(
    catalogue: &'a [CourtReferencePoint],
    position: &Vector3<f64>,
) -> Option<&'a CourtReferencePoint> {
    catalogue.iter().min_by(|a, b| {
        let da = (a.position.xy() - position.xy()).norm();
        let db = (b.position.xy() - position.xy()).norm();
        da.total_cmp(&db)
    })
}

/// 統合カタログ。ラベルは座標文字列
pub fn merged_catalogue() -> Vec<CourtReferencePoint> {
    MERGED_POINTS
        .iter()
        .map(|&(x, y)| CourtReferencePoint::new(format!("({}, {}, 0)", x, y), x, y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_sizes() {
        assert_eq!(full_catalogue().len(), 42);
        assert_eq!(merged_catalogue().len(), 19);
    }

    #[test]
    fn test_merged_catalogue_is_planar_and_starts_with_corners() {
        let merged = merged_catalogue();
        assert!(merged.iter().all(|p| p.position.z == 0.0));
        assert_eq!(merged[0].position, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(merged[2].label, "(606, 472, 0)");
        for &idx in &MANUAL_CORNER_INDICES {
            assert!(idx < merged.len());
        }
    }

    #[test]
    fn test_nearest_reference_names_merged_points() {
        let full = full_catalogue();
        let merged = merged_catalogue();
        for p in &merged {
            let named = nearest_reference(&full, &p.position).unwrap();
            assert!((named.position - p.position).norm() <= 4.0, "{} -> {}", p.label, named.label);
        }
        assert!(nearest_reference(&[], &Vector3::zeros()).is_none());
    }
}
