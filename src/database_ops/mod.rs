pub mod db;
pub mod products;
pub mod rankings;
pub mod retention;
