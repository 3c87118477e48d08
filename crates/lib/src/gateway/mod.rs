//! Gateway: the relay's HTTP surface.
//!
//! Single port serves platform webhooks (`/webhook`, GET verification and POST events) and the
//! aggregator's reply intake (`/receptor`).

pub mod protocol;
mod server;

pub use protocol::{ReplyEnvelope, ReplyTags, VerifyQuery, WebhookPayload, EVENT_RECEIVED};
pub use server::{http_client, router, run_server, RelayState};
