// Domain layer: bootstrap models and ports (interfaces) to the service binary.

pub mod model;
pub mod ports;
