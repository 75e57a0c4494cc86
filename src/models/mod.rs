pub mod actor;
pub mod page;
pub mod provider;
pub mod reservation;

pub use actor::{Actor, ActorRole};
pub use page::{Page, PageRequest};
pub use provider::{CounterDelta, Provider, ProviderCounters, MAX_HOURLY_RATE_CENTS};
pub use reservation::{
    Payment, Reservation, ReservationFilter, ReservationStatus, ServiceDetails, StatusChange, Window,
};
