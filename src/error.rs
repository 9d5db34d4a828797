use thiserror::Error;

/// 外部パラメータキャリブレーションの失敗
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("insufficient correspondences: need {needed}, got {got}")]
    InsufficientCorrespondences { needed: usize, got: usize },
    #[error("PnP solve failed: {0}")]
    PnPSolveFailed(String),
    #[error("degenerate point configuration: {0}")]
    DegenerateCorners(String),
}

/// ステレオ幾何の失敗。三角測量の失敗はペア単位で回復可能
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StereoError {
    #[error("degenerate fundamental matrix: {0}")]
    DegenerateFundamentalMatrix(String),
    #[error("rays are parallel or degenerate (|d1 x d2| = {cross_norm:e})")]
    TriangulationDegenerate { cross_norm: f64 },
    #[error("batch length mismatch: left={left}, right={right}, timestamps={timestamps}")]
    LengthMismatch {
        left: usize,
        right: usize,
        timestamps: usize,
    },
}

/// トリガー拒否理由。呼び出し側は後で再試行できる
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TriggerRejection {
    #[error("processing already in progress")]
    ProcessingAlreadyInProgress,
    #[error("cooldown active: {remaining_secs:.1}s remaining")]
    CooldownActive { remaining_secs: f64 },
    #[error("insufficient buffered frames: have {have}, need {needed}")]
    InsufficientBufferedFrames { have: usize, needed: usize },
}

/// バッチ処理の結果としての失敗
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("trajectory quality insufficient (confidence {confidence:.2}, need {required:.2})")]
    InsufficientTrajectoryQuality { confidence: f64, required: f64 },
    #[error("critical processing error: {0}")]
    CriticalProcessingError(String),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cannot reset while processing")]
pub struct ResetRefused;
