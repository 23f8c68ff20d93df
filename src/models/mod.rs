pub mod caption;
pub mod job;
