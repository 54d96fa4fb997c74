pub mod coordinate_mapper;
pub mod overlay_renderer;
pub mod overlay_surface;
