// Value objects shared between the queue and its callers
pub mod form;
pub mod response;

pub use form::{Form, FormFile, DEFAULT_FILE_CONTENT_TYPE};
pub use response::{FormResponse, SubmissionId, STATUS_SEND_FAILED};
