pub mod db;
pub mod hash;
pub mod seed;
