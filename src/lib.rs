pub mod config;
pub mod errors;
pub mod page;
pub mod security;
pub mod terminal_view;
pub mod uploader;
