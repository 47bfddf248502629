pub mod bisect;
pub mod canlog;
pub mod config;
pub mod replay;
pub mod vision;
