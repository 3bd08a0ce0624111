pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod mqtt;
pub mod payload;
pub mod pipeline;
pub mod rollup;
pub mod source;
pub mod store;
