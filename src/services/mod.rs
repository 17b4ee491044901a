pub mod auth_service;
pub mod persistence;

pub use persistence::PersistenceAdapter;
