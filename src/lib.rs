pub mod app;
pub mod authz;
pub mod db;
pub mod deployment;
pub mod docs;
pub mod errors;
pub mod jwt;
pub mod resources;
pub mod routes;

pub use app::create_app;
