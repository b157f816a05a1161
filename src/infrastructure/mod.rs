pub mod disk;
pub mod postgres;
