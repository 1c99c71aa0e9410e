//! Live SMTP probing: the conversation engine and reply classification.

pub mod probe;
pub mod reply;

pub use probe::{ProbeSettings, SmtpProbe};
pub use reply::{ReplyCategory, SmtpReply};
