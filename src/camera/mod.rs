pub mod capture;
pub mod profile;

pub use capture::{FramePair, FrameSource, QueuedSource, ThreadedProducer};
pub use profile::CameraProfile;
