pub mod audit;
pub mod metadata;
pub mod thread;
pub mod ticket;
