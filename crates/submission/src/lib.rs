//! Background HTTP form submission queue.
//!
//! Callers enqueue [`Form`]s on a [`FormManager`]; a single worker task drains
//! the queue in order, POSTs each form and publishes a [`FormResponse`] on the
//! manager's event channel. The in-flight submission can be cancelled.

pub mod cookies;
pub mod encoding;
mod executor;
pub mod manager;
pub mod transport;

pub use common::{SubmitError, SubmitterConfig};
pub use contracts::{Form, FormFile, FormResponse, SubmissionId, STATUS_SEND_FAILED};
pub use cookies::CookieJar;
pub use encoding::FormBody;
pub use manager::{FormManager, ManagerStatus};
pub use transport::{OutgoingRequest, RawResponse, ReqwestTransport, Transport, TransportError};
