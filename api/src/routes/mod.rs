pub mod gateway;
pub mod health;
pub mod policy;
pub mod tools;
