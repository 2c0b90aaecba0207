//! Test utilities and mock implementations.
//!
//! In-memory stand-ins for the chain, Telegram and the mailer, plus helpers
//! that build SQLite-backed stores on a private in-memory database.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::chain::{group_id_hash, ChainError, ChainReader, GroupTerms};
use crate::clients::{EmailError, Mailer, TelegramApi, TelegramError};
use crate::config::StorageConfig;
use crate::model::{GroupId, InvitationConfig, PurchaseEvent};
use crate::storage::{init_storage, StorageError, Stores};

/// How a mocked outbound call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Rate limited or server error: retried.
    Transient,
    /// Rejected request: never retried.
    Permanent,
}

/// In-memory chain with a settable head, logs and group terms.
#[derive(Default)]
pub struct MockChain {
    head: RwLock<u64>,
    logs: RwLock<Vec<PurchaseEvent>>,
    terms: RwLock<HashMap<B256, GroupTerms>>,
    fail: RwLock<bool>,
    log_queries: RwLock<Vec<(u64, u64)>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_head(&self, block: u64) {
        *self.head.write().await = block;
    }

    pub async fn push_log(&self, event: PurchaseEvent) {
        self.logs.write().await.push(event);
    }

    /// Register a group on the mock contract.
    pub async fn register_group(&self, group_id: &GroupId, owner: Address, price: U256, commission: u64) {
        self.terms.write().await.insert(
            group_id_hash(group_id),
            GroupTerms {
                owner,
                price,
                commission: U256::from(commission),
            },
        );
    }

    /// Make every call fail with a transport error.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    /// Block ranges passed to `purchase_logs`, in call order.
    pub async fn log_queries(&self) -> Vec<(u64, u64)> {
        self.log_queries.read().await.clone()
    }

    async fn check(&self) -> Result<(), ChainError> {
        if *self.fail.read().await {
            return Err(ChainError::Transport("mock chain unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.check().await?;
        Ok(*self.head.read().await)
    }

    async fn purchase_logs(&self, from: u64, to: u64) -> Result<Vec<PurchaseEvent>, ChainError> {
        self.check().await?;
        self.log_queries.write().await.push((from, to));
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .filter(|e| e.block_number.is_some_and(|b| b >= from && b <= to))
            .cloned()
            .collect())
    }

    async fn group_terms(&self, group_id_hash: B256) -> Result<GroupTerms, ChainError> {
        self.check().await?;
        let terms = self.terms.read().await;
        Ok(terms.get(&group_id_hash).cloned().unwrap_or(GroupTerms {
            owner: Address::ZERO,
            price: U256::ZERO,
            commission: U256::ZERO,
        }))
    }
}

/// A link issued by [`MockTelegram`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedLink {
    pub chat_id: i64,
    pub name: String,
    pub expire_date: Option<i64>,
    pub link: String,
}

/// In-memory Telegram bot.
#[derive(Default)]
pub struct MockTelegram {
    admins: RwLock<HashSet<(i64, i64)>>,
    links: RwLock<Vec<IssuedLink>>,
    messages: RwLock<Vec<(i64, String)>>,
    link_failures: RwLock<Option<(u32, FailMode)>>,
}

impl MockTelegram {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_admin(&self, chat_id: i64, user_id: i64) {
        self.admins.write().await.insert((chat_id, user_id));
    }

    /// Fail the next `times` link creations.
    pub async fn fail_links(&self, times: u32, mode: FailMode) {
        *self.link_failures.write().await = Some((times, mode));
    }

    pub async fn links(&self) -> Vec<IssuedLink> {
        self.links.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<(i64, String)> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl TelegramApi for MockTelegram {
    async fn create_invite_link(
        &self,
        chat_id: i64,
        name: &str,
        expire_date: Option<i64>,
    ) -> Result<String, TelegramError> {
        {
            let mut failures = self.link_failures.write().await;
            if let Some((remaining, mode)) = failures.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(match mode {
                        FailMode::Transient => TelegramError::Api {
                            code: 429,
                            description: "Too Many Requests".to_string(),
                        },
                        FailMode::Permanent => TelegramError::Api {
                            code: 400,
                            description: "Bad Request: chat not found".to_string(),
                        },
                    });
                }
            }
        }

        let mut links = self.links.write().await;
        let link = format!("https://t.me/+mock{}", links.len() + 1);
        links.push(IssuedLink {
            chat_id,
            name: name.to_string(),
            expire_date,
            link: link.clone(),
        });
        Ok(link)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        self.messages.write().await.push((chat_id, text.to_string()));
        Ok(())
    }

    async fn is_chat_admin(&self, chat_id: i64, user_id: i64) -> Result<bool, TelegramError> {
        Ok(self.admins.read().await.contains(&(chat_id, user_id)))
    }
}

/// An email recorded by [`MockMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub group_id: GroupId,
    pub link: String,
    pub idempotency_key: String,
}

/// In-memory mailer.
#[derive(Default)]
pub struct MockMailer {
    sent: RwLock<Vec<SentEmail>>,
    failures: RwLock<Option<(u32, FailMode)>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` sends.
    pub async fn fail_sends(&self, times: u32, mode: FailMode) {
        *self.failures.write().await = Some((times, mode));
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send_invitation(
        &self,
        to: &str,
        group: &InvitationConfig,
        link: &str,
        idempotency_key: &str,
    ) -> Result<(), EmailError> {
        {
            let mut failures = self.failures.write().await;
            if let Some((remaining, mode)) = failures.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(match mode {
                        FailMode::Transient => EmailError::Api {
                            status: 503,
                            message: "service unavailable".to_string(),
                        },
                        FailMode::Permanent => EmailError::Api {
                            status: 422,
                            message: "invalid recipient".to_string(),
                        },
                    });
                }
            }
        }

        self.sent.write().await.push(SentEmail {
            to: to.to_string(),
            group_id: group.group_id,
            link: link.to_string(),
            idempotency_key: idempotency_key.to_string(),
        });
        Ok(())
    }
}

/// Stores on a fresh in-memory SQLite database.
pub async fn memory_stores() -> Result<Stores, StorageError> {
    let config = StorageConfig {
        storage_type: "sqlite".to_string(),
        path: ":memory:".to_string(),
    };
    init_storage(&config).await
}

/// A linked group row for `chat_id` owned by `owner`.
pub fn linked_group(chat_id: i64, owner: Address) -> InvitationConfig {
    let now = chrono::Utc::now().to_rfc3339();
    InvitationConfig {
        group_id: GroupId::new(),
        chat_id: Some(chat_id),
        owner_address: format!("{:#x}", owner),
        price: "0".to_string(),
        referral_commission: None,
        description: None,
        created_at: now.clone(),
        updated_at: now,
    }
}

/// An `InvitationBought` event for `group_id` paid by `buyer`.
pub fn purchase_event(group_id: &GroupId, buyer: Address, log_index: u64, block: u64) -> PurchaseEvent {
    PurchaseEvent {
        chain_id: 43113,
        tx_hash: B256::with_last_byte(block as u8),
        log_index,
        block_number: Some(block),
        group_id_hash: group_id_hash(group_id),
        buyer,
        referrer: Address::ZERO,
        price: U256::from(1_000u64),
        owner_fee: U256::from(900u64),
        referrer_fee: U256::ZERO,
        protocol_fee: U256::from(100u64),
    }
}

/// Shared handles to all mocks, for wiring services in tests.
pub struct Mocks {
    pub chain: Arc<MockChain>,
    pub telegram: Arc<MockTelegram>,
    pub mailer: Arc<MockMailer>,
}

impl Mocks {
    pub fn new() -> Self {
        Self {
            chain: Arc::new(MockChain::new()),
            telegram: Arc::new(MockTelegram::new()),
            mailer: Arc::new(MockMailer::new()),
        }
    }
}

impl Default for Mocks {
    fn default() -> Self {
        Self::new()
    }
}
