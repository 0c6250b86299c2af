pub mod auth;
pub mod compactor;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod oracle;
pub mod recurrence;
pub mod wal;
pub mod wire;

pub use coordinator::BookingCoordinator;
pub use error::{Error, ErrorKind, Result};
pub use ledger::{Ledger, LedgerOptions};
