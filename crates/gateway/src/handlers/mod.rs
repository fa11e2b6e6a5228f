pub mod camera;
pub mod control;
pub mod detections;
pub mod stream;
pub mod upload;
