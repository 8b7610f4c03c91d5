pub mod delegation;
pub mod history;
pub mod series;
pub mod submission;
pub mod workflow;
