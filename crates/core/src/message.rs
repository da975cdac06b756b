use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::ids::MessageId;

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

static LAST_TIMESTAMP_MS: AtomicU64 = AtomicU64::new(0);

/// Creation time in milliseconds since the Unix epoch.
///
/// Values handed out by [`Timestamp::now`] strictly increase within a process,
/// even when the wall clock stalls or steps backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let wall = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = LAST_TIMESTAMP_MS.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last.saturating_add(1));
            match LAST_TIMESTAMP_MS.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(next),
                Err(actual) => last = actual,
            }
        }
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn to_local(&self) -> Option<DateTime<Local>> {
        let millis = i64::try_from(self.0).ok()?;
        Local.timestamp_millis_opt(millis).single()
    }
}

/// One entry of a space's history. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub role: Role,
    pub timestamp: Timestamp,
    /// Producing model; only set on assistant messages.
    pub model: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            content: content.into(),
            role: Role::User,
            timestamp: Timestamp::now(),
            model: None,
        }
    }

    pub fn assistant(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            content: content.into(),
            role: Role::Assistant,
            timestamp: Timestamp::now(),
            model: Some(model.into()),
        }
    }
}
