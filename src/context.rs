//! Per-invocation execution context handed to host functions and tools.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

use crate::attachments::AttachmentRegistry;
use crate::db::Database;
use crate::tools::ToolProvider;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Advance by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Everything a script invocation may reach on the host side.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Conversation the invocation belongs to.
    pub conversation_id: String,
    /// Turn within the conversation, if any.
    pub turn_id: Option<String>,
    /// IANA timezone name used as the default for time functions.
    pub timezone: String,
    /// Database handle for tools that need one.
    pub database: Option<Database>,
    /// Tools visible to scripts.
    pub tool_provider: Option<Arc<dyn ToolProvider>>,
    /// Attachment storage.
    pub attachments: Option<Arc<dyn AttachmentRegistry>>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("conversation_id", &self.conversation_id)
            .field("turn_id", &self.turn_id)
            .field("timezone", &self.timezone)
            .field("database", &self.database.is_some())
            .field("tool_provider", &self.tool_provider.is_some())
            .field("attachments", &self.attachments.is_some())
            .field("clock", &self.clock)
            .finish()
    }
}

impl ExecutionContext {
    /// Context with UTC, the system clock and no collaborators.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turn_id: None,
            timezone: "UTC".to_string(),
            database: None,
            tool_provider: None,
            attachments: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the turn id.
    pub fn with_turn_id(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    /// Set the default timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Attach a database.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Attach a tool provider.
    pub fn with_tool_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.tool_provider = Some(provider);
        self
    }

    /// Attach an attachment registry.
    pub fn with_attachments(mut self, registry: Arc<dyn AttachmentRegistry>) -> Self {
        self.attachments = Some(registry);
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Parsed default timezone; unknown names fall back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("valid");
        let clock = FixedClock::new(start);
        clock.advance(chrono::Duration::minutes(90));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(90));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let ctx = ExecutionContext::new("c1").with_timezone("Mars/Olympus_Mons");
        assert_eq!(ctx.tz(), Tz::UTC);
        let ctx = ExecutionContext::new("c1").with_timezone("Europe/London");
        assert_eq!(ctx.tz(), chrono_tz::Europe::London);
    }
}
