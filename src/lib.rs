pub mod config;
pub mod disease;
pub mod distributions;
pub mod error;
pub mod exposure;
pub mod intervention;
pub mod mortality;
pub mod observers;
pub mod population;
pub mod randomness;
pub mod screening;
pub mod simulation;
pub mod summary;
pub mod tables;
pub mod types;
