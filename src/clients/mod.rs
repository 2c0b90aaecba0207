//! Outbound integrations: Telegram Bot API and transactional email.
//!
//! Each client sits behind a trait so services can be driven by fakes in
//! tests. Errors classify themselves as transient or permanent, which
//! decides whether a fulfillment job is rescheduled or dead-lettered.

mod email;
mod telegram;

pub use email::{EmailError, Mailer, ResendMailer};
pub use telegram::{BotApiClient, TelegramApi, TelegramError};
