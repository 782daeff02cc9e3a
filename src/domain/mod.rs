// Domain layer: registration model, document definitions and ports (interfaces).

pub mod documents;
pub mod model;
pub mod ports;
