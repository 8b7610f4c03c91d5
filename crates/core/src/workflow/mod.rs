pub mod delegation;
pub mod gate;
pub mod history;
