// Domain layer: the pipeline's value types and the seams where implementations can be swapped.

pub mod model;
pub mod ports;
