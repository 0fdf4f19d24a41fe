//! The durable, at-least-once notification delivery record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typeshare::typeshare;

use crate::enums::{NotificationChannel, NotificationStatus, NotificationTemplateKey};
use crate::ids::{NotificationId, TicketId};
use crate::user::UserRef;

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationOutboxEntry {
    pub notification_id: NotificationId,
    pub ticket_id: TicketId,
    pub template_key: NotificationTemplateKey,
    pub channel: NotificationChannel,
    pub recipients: Vec<UserRef>,
    pub payload: HashMap<String, Value>,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl NotificationOutboxEntry {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == NotificationStatus::Pending
    }
}
