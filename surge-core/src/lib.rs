pub mod runner;

pub use surge_metrics as metrics;
