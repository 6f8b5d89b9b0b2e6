//! Report event and user types for ps360.
//!
//! K_i: These types represent the core data flow from RAS to the users table.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Report workflow events that count as user activity.
///
/// K_i: Closed set. Anything else RAS reports (views, prints...) is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Sign,
    Edit,
    QueueForSignature,
    Overread,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sign => "Sign",
            Self::Edit => "Edit",
            Self::QueueForSignature => "QueueForSignature",
            Self::Overread => "Overread",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Sign" => Ok(Self::Sign),
            "Edit" => Ok(Self::Edit),
            "QueueForSignature" => Ok(Self::QueueForSignature),
            "Overread" => Ok(Self::Overread),
            _ => Err(()),
        }
    }
}

/// The most recent activity of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLastEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<FixedOffset>,
    pub workstation: String,
    pub additional_info: String,
}

/// A RAS account and its latest tracked event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// RAS account ID (matches `users.ps360`)
    pub id: i64,
    pub name: String,
    pub last_event: UserLastEvent,
}

/// One row of a BrowseOrders result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSummary {
    pub report_id: i64,
    pub accession: Option<String>,
    /// Signing radiologist; None when the report was never signed
    pub signer: Option<String>,
    pub last_modified: Option<String>,
}

/// One row of a GetReportEvents result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEvent {
    /// Raw RAS event type
    pub event_type: String,
    pub event_time: DateTime<FixedOffset>,
    pub workstation: String,
    pub additional_info: String,
    pub account_id: i64,
    pub account_name: String,
}

impl ReportEvent {
    /// Convert to a tracked event, or None for event types we ignore.
    pub fn to_last_event(&self) -> Option<UserLastEvent> {
        let event_type = self.event_type.parse().ok()?;
        Some(UserLastEvent {
            event_type,
            timestamp: self.event_time,
            workstation: self.workstation.clone(),
            additional_info: self.additional_info.clone(),
        })
    }
}

/// Result of a successful SignIn.
#[derive(Debug, Clone, PartialEq)]
pub struct SignInResult {
    pub account_id: i64,
    pub first_name: String,
    pub last_name: String,
}

/// Statistics for a single poll pass.
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    /// Orders returned by BrowseOrders
    pub orders: usize,

    /// Reports whose events were fetched
    pub reports_scanned: usize,

    /// Events returned across all reports
    pub events_seen: usize,

    /// Events that replaced a user's last event
    pub events_applied: usize,

    /// Rows updated in the users table
    pub users_uploaded: u64,

    pub duration: Duration,
}

/// Parse an `xs:dateTime` value.
///
/// Values without an offset are taken as local time, as RAS reports them in
/// the server's zone.
pub fn parse_xs_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Format a timestamp the way BrowseOrders expects (ms precision + offset).
pub fn format_xs_datetime(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
}
