pub mod backfill;
pub mod cache;
pub mod catalog;
pub mod db;
pub mod decode;
pub mod exchange;
pub mod filters;
pub mod migrations;
pub mod models;
pub mod snapshot;
pub mod sync;
pub mod tcgdex;
