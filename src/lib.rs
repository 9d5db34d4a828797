pub mod batch;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod court;
pub mod debug;
pub mod detect;
pub mod error;
pub mod predict;
pub mod tracker;
pub mod trajectory;
pub mod triangulation;
