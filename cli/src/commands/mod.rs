pub mod cache;
pub mod health;
pub mod policy;
pub mod route;
pub mod tools;
