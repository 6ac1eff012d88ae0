pub mod aggregate;
pub mod app;
pub mod clean;
pub mod config;
pub mod domain;
pub mod error;
pub mod geo;
pub mod join;
pub mod metadata;
pub mod normalize;
pub mod output;
pub mod resolve;
pub mod store;
pub mod summary;
pub mod table;
pub mod table_io;
pub mod validate;
