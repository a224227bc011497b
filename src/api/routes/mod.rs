pub mod agents;
pub mod health;
pub mod overview;
pub mod tasks;
