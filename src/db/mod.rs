pub mod backup;
mod generations;
mod repository;
mod schema;

pub use repository::Repository;
