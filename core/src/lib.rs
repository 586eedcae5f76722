pub mod auth;
pub mod authz;
pub mod cache;
pub mod error;
pub mod leads;
pub mod policy;
pub mod rate_limit;
pub mod routes;
pub mod sanitizer;
pub mod validate;
