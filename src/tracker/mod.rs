pub mod multi;

pub use multi::{MultiObjectTracker, Track};
