pub mod config;
mod envelope;
mod filter;
#[cfg(any(test, feature = "memory"))]
mod memory;
mod payment;
mod status;
mod store;

pub use envelope::Envelope;
pub use filter::{
    Direction, Page, Pageable, PaymentFilter, SortError, SortField, SortOrder, SqlFilter, SqlParam,
};
#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryPaymentStore;
pub use payment::{OrderCreatedEvent, Payment, PaymentCreatedEvent};
pub use status::{PaymentStatus, UnknownStatus};
pub use store::{PaymentStore, PgPaymentStore, StoreError};
