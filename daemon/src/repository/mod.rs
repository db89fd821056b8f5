//! Concrete [`cnc_broker_core::Repository`] implementations.

mod postgres;

pub use postgres::PostgresRepository;
