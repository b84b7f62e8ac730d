pub mod analytics;
pub mod classes;
pub mod core;
pub mod scores;
pub mod students;
pub mod weeks;
