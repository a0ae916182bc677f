pub mod coerce;
pub mod config;
pub mod director;
pub mod fallback;
pub mod genai;
pub mod model;
pub mod stages;
