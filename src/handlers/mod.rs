pub mod health_handlers;
pub mod material_handlers;
