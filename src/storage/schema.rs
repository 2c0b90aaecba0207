//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building,
//! plus the DDL executed at startup.

use sea_query::{ColumnDef, Iden, Index, IndexCreateStatement, Table, TableCreateStatement};

/// Linked Telegram groups (InvitationConfig).
#[derive(Iden)]
pub enum Groups {
    Table,
    #[iden = "group_id"]
    GroupId,
    #[iden = "chat_id"]
    ChatId,
    #[iden = "owner_address"]
    OwnerAddress,
    #[iden = "price"]
    Price,
    #[iden = "referral_commission"]
    ReferralCommission,
    #[iden = "description"]
    Description,
    /// Highest owner-update nonce accepted so far.
    #[iden = "last_nonce"]
    LastNonce,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Purchase attempts.
#[derive(Iden)]
pub enum Invitations {
    Table,
    #[iden = "group_id"]
    GroupId,
    #[iden = "email"]
    Email,
    #[iden = "group_id_hash"]
    GroupIdHash,
    #[iden = "buyer_address"]
    BuyerAddress,
    #[iden = "referral_address"]
    ReferralAddress,
    #[iden = "status"]
    Status,
    #[iden = "invite_link"]
    InviteLink,
    #[iden = "failure_reason"]
    FailureReason,
    #[iden = "event_key"]
    EventKey,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Fulfillment ledger: one row per observed purchase log.
#[derive(Iden)]
pub enum FulfillmentJobs {
    Table,
    #[iden = "event_key"]
    EventKey,
    #[iden = "chain_id"]
    ChainId,
    #[iden = "tx_hash"]
    TxHash,
    #[iden = "log_index"]
    LogIndex,
    #[iden = "block_number"]
    BlockNumber,
    #[iden = "group_id_hash"]
    GroupIdHash,
    #[iden = "buyer_address"]
    BuyerAddress,
    #[iden = "referrer_address"]
    ReferrerAddress,
    #[iden = "price"]
    Price,
    #[iden = "source"]
    Source,
    #[iden = "state"]
    State,
    #[iden = "attempts"]
    Attempts,
    #[iden = "next_attempt_at"]
    NextAttemptAt,
    #[iden = "last_error"]
    LastError,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Named block watermarks.
#[derive(Iden)]
pub enum Positions {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "block"]
    Block,
    #[iden = "updated_at"]
    UpdatedAt,
}

pub fn create_groups_table() -> TableCreateStatement {
    Table::create()
        .table(Groups::Table)
        .if_not_exists()
        .col(ColumnDef::new(Groups::GroupId).text().not_null().primary_key())
        .col(ColumnDef::new(Groups::ChatId).big_integer().null().unique_key())
        .col(ColumnDef::new(Groups::OwnerAddress).text().not_null())
        .col(ColumnDef::new(Groups::Price).text().not_null())
        .col(ColumnDef::new(Groups::ReferralCommission).integer().null())
        .col(ColumnDef::new(Groups::Description).text().null())
        .col(ColumnDef::new(Groups::LastNonce).big_integer().null())
        .col(ColumnDef::new(Groups::CreatedAt).text().not_null())
        .col(ColumnDef::new(Groups::UpdatedAt).text().not_null())
        .to_owned()
}

pub fn create_invitations_table() -> TableCreateStatement {
    Table::create()
        .table(Invitations::Table)
        .if_not_exists()
        .col(ColumnDef::new(Invitations::GroupId).text().not_null())
        .col(ColumnDef::new(Invitations::Email).text().not_null())
        .col(ColumnDef::new(Invitations::GroupIdHash).text().not_null())
        .col(ColumnDef::new(Invitations::BuyerAddress).text().not_null())
        .col(ColumnDef::new(Invitations::ReferralAddress).text().null())
        .col(ColumnDef::new(Invitations::Status).text().not_null())
        .col(ColumnDef::new(Invitations::InviteLink).text().null())
        .col(ColumnDef::new(Invitations::FailureReason).text().null())
        .col(ColumnDef::new(Invitations::EventKey).text().null())
        .col(ColumnDef::new(Invitations::CreatedAt).text().not_null())
        .col(ColumnDef::new(Invitations::UpdatedAt).text().not_null())
        .primary_key(
            Index::create()
                .col(Invitations::GroupId)
                .col(Invitations::Email),
        )
        .to_owned()
}

/// Lookup path for matching purchase events to pending invitations.
pub fn create_invitations_match_index() -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name("idx_invitations_match")
        .table(Invitations::Table)
        .col(Invitations::GroupIdHash)
        .col(Invitations::BuyerAddress)
        .col(Invitations::Status)
        .to_owned()
}

pub fn create_fulfillment_jobs_table() -> TableCreateStatement {
    Table::create()
        .table(FulfillmentJobs::Table)
        .if_not_exists()
        .col(ColumnDef::new(FulfillmentJobs::EventKey).text().not_null().primary_key())
        .col(ColumnDef::new(FulfillmentJobs::ChainId).big_integer().not_null())
        .col(ColumnDef::new(FulfillmentJobs::TxHash).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::LogIndex).big_integer().not_null())
        .col(ColumnDef::new(FulfillmentJobs::BlockNumber).big_integer().null())
        .col(ColumnDef::new(FulfillmentJobs::GroupIdHash).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::BuyerAddress).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::ReferrerAddress).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::Price).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::Source).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::State).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::Attempts).integer().not_null())
        .col(ColumnDef::new(FulfillmentJobs::NextAttemptAt).big_integer().not_null())
        .col(ColumnDef::new(FulfillmentJobs::LastError).text().null())
        .col(ColumnDef::new(FulfillmentJobs::CreatedAt).text().not_null())
        .col(ColumnDef::new(FulfillmentJobs::UpdatedAt).text().not_null())
        .to_owned()
}

/// Due-job scan.
pub fn create_fulfillment_jobs_due_index() -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name("idx_fulfillment_jobs_due")
        .table(FulfillmentJobs::Table)
        .col(FulfillmentJobs::State)
        .col(FulfillmentJobs::NextAttemptAt)
        .to_owned()
}

pub fn create_positions_table() -> TableCreateStatement {
    Table::create()
        .table(Positions::Table)
        .if_not_exists()
        .col(ColumnDef::new(Positions::Name).text().not_null().primary_key())
        .col(ColumnDef::new(Positions::Block).big_integer().not_null())
        .col(ColumnDef::new(Positions::UpdatedAt).text().not_null())
        .to_owned()
}
