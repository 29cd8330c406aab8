//! Business logic between the HTTP surface and the divvyd connection.

pub mod assembler;
pub mod idempotency;
pub mod payments;
pub mod submission;

pub use payments::{PaymentService, SubmitPaymentRequest};
pub use submission::ConfirmationRouter;
