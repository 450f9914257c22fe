// Control plane: connection lifecycle. Data plane: cache operations.
pub mod control;
pub mod data;
