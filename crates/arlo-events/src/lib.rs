//! # Arlo Events
//!
//! Server-push side of the client. One [`EventBus`] per session holds the
//! push stream open and demultiplexes its events by correlation key into a
//! [`PendingTable`]; the [`CommandCorrelator`] sends device commands and
//! awaits their confirmations there.
//!
//! ```text
//! notify() ──POST──▶ cloud ──▶ device
//!    │                           │
//!    └── wait(transId) ◀── EventBus ◀── push stream
//! ```

pub mod bus;
pub mod correlator;
pub mod errors;
pub mod frame;
pub mod pending;
pub mod session;

pub use bus::{CloudEventSource, ConnectionState, EventBus, EventSource, STATUS_KEY, SUBSCRIBE_PATH};
pub use correlator::{
    generate_transaction_id, CommandCorrelator, NotifyOutcome, WaitFor, NOTIFY_PATH,
};
pub use errors::{EventError, Result};
pub use frame::{FrameDecoder, StreamEvent, MAX_FRAME_LEN};
pub use pending::{Delivery, PendingTable};
pub use session::{Session, SESSION_PATH};
