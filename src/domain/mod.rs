// Domain layer: schema rows, estimate results and the ports the engine persists through.

pub mod model;
pub mod ports;
pub mod value;
