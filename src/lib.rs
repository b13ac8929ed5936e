pub mod conf;
pub mod init;
pub mod utils;
