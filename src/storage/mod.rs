pub mod cache;
pub mod db;

pub use cache::OfflineCache;
pub use db::Database;
