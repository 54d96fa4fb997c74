pub mod constants;
pub mod detection;
pub mod error;
pub mod frame;
pub mod geometry;
