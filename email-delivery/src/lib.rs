pub mod smtp;

pub use smtp::{build_message, SmtpDispatcher, SmtpSettings};
