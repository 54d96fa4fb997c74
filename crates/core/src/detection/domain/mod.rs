pub mod detection_engine;
pub mod landmark_topology;
