pub mod db;
pub mod o11y;
pub mod testing;
