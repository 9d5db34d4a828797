use nalgebra::Vector3;

use crate::detect::Detection2D;

/// 範囲外として棄却された三角測量点
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfBoundsRecord {
    pub point: Vector3<f64>,
    pub timestamp: f64,
    pub frame_index: usize,
    pub match_confidence: f64,
    pub match_distance: f64,
}

/// 直前の点からの速度が異常に大きい点
#[derive(Debug, Clone, PartialEq)]
pub struct LowQualityRecord {
    pub point: Vector3<f64>,
    pub timestamp: f64,
    pub velocity: f64,
    pub distance: f64,
    pub time_diff: f64,
}

/// 光線が平行で三角測量できなかったペア
#[derive(Debug, Clone, PartialEq)]
pub struct TriangulationFailedRecord {
    pub left: Detection2D,
    pub right: Detection2D,
    pub timestamp: f64,
    pub frame_index: usize,
}

/// 1バッチ分の診断記録。リセットで消去される
#[derive(Debug, Clone, PartialEq)]
pub enum DebugRecord {
    OutOfBounds(OutOfBoundsRecord),
    LowQuality(LowQualityRecord),
    TriangulationFailed(TriangulationFailedRecord),
}

impl DebugRecord {
    pub fn timestamp(&self) -> f64 {
        match self {
            Self::OutOfBounds(r) => r.timestamp,
            Self::LowQuality(r) => r.timestamp,
            Self::TriangulationFailed(r) => r.timestamp,
        }
    }
}

/// 種類ごとの件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugSummary {
    pub out_of_bounds: usize,
    pub low_quality: usize,
    pub triangulation_failed: usize,
}

impl DebugSummary {
    pub fn from_records(records: &[DebugRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record {
                DebugRecord::OutOfBounds(_) => summary.out_of_bounds += 1,
                DebugRecord::LowQuality(_) => summary.low_quality += 1,
                DebugRecord::TriangulationFailed(_) => summary.triangulation_failed += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_and_timestamps() {
        let d = Detection2D::new(640.0, 360.0, 0.5);
        let records = vec![
            DebugRecord::OutOfBounds(OutOfBoundsRecord {
                point: Vector3::new(0.0, 0.0, -10.0),
                timestamp: 0.1,
                frame_index: 3,
                match_confidence: 0.8,
                match_distance: 2.0,
            }),
            DebugRecord::TriangulationFailed(TriangulationFailedRecord {
                left: d,
                right: d,
                timestamp: 0.2,
                frame_index: 6,
            }),
            DebugRecord::OutOfBounds(OutOfBoundsRecord {
                point: Vector3::new(900.0, 0.0, 10.0),
                timestamp: 0.3,
                frame_index: 9,
                match_confidence: 0.6,
                match_distance: 1.0,
            }),
        ];

        let summary = DebugSummary::from_records(&records);
        assert_eq!(
            summary,
            DebugSummary {
                out_of_bounds: 2,
                low_quality: 0,
                triangulation_failed: 1,
            }
        );
        let times: Vec<f64> = records.iter().map(DebugRecord::timestamp).collect();
        assert_eq!(times, vec![0.1, 0.2, 0.3]);
        assert_eq!(DebugSummary::from_records(&[]), DebugSummary::default());
    }
}
