mod albums;
pub mod db;
mod media;
pub mod models;
mod tables;
mod transaction;

pub use db::{Database, DatabaseError, PurgeStats};
pub use media::KeyReservation;
pub use tables::*;
pub use transaction::RecordTransaction;
