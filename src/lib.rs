pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod estimator;
pub mod framer;
pub mod handler;
pub mod http_connection_context;
pub mod http_object;
pub mod http_status;
pub mod http_type;
pub mod pages;
pub mod protocol;
pub mod registry;
pub mod request_parser;
pub mod response_writer;
pub mod server;
pub mod static_files;
pub mod stats;
pub mod worker;
