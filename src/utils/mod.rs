pub mod cancel;
pub mod statistics;
