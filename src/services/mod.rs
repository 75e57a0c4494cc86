pub mod conflict;
pub mod lifecycle;
pub mod reservation;
pub mod store;
