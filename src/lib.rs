//! Social Triggers - paid Telegram group invitations settled on-chain
//!
//! Buyers record a purchase intent and pay the invitation contract from
//! their own wallet. `InvitationBought` logs arrive through a Moralis
//! Streams webhook or the log poller, land in an idempotent ledger, and a
//! worker turns each one into a single-use Telegram invite link emailed to
//! the buyer.

pub mod chain;
pub mod clients;
pub mod config;
pub mod handlers;
pub mod model;
pub mod services;
pub mod storage;
pub mod test_utils;
pub mod utils;
