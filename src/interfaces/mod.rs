//! Outer surfaces: CSV roster files and the station gateway.

pub mod csv;
pub mod station;
