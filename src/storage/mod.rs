pub mod rocksdb;
pub mod schema;
pub mod sink;
pub mod traits;
