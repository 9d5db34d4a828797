pub mod quality;
pub mod segment;
pub mod selection;

pub use quality::{QualityBreakdown, TrajectoryQualityEvaluator};
pub use segment::{TrajectorySegment, TrajectorySegmentManager};
pub use selection::{SegmentSelection, SegmentSelector, SelectionStrategy};
