// Route handler modules

pub mod generate;
pub mod health;
