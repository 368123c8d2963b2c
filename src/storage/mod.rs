pub mod memory;
pub mod postgres;

pub use memory::InMemoryTaskRepository;
pub use postgres::PgTaskRepository;
