//! Usage analytics
//!
//! Events are counted by type, resource and client. The [`Analytics`] trait is
//! the seam for a real backend; [`InMemoryAnalytics`] keeps everything in
//! process memory and is what the binary runs with.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::limiter::BackendError;

/// Kinds of events the service accepts
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Download,
    ViewPresentation,
    ViewTutorial,
    PageView,
}

impl EventType {
    /// Wire names of every accepted event type
    pub fn allowed() -> Vec<String> {
        EventType::iter().map(|t| t.to_string()).collect()
    }
}

/// A single recorded event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    pub event_type: EventType,
    /// Path or identifier of what the event is about
    pub resource: String,
    /// Client identifier (forwarded IP)
    pub client: String,
    /// Free-form, already parsed JSON
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl TrackedEvent {
    pub fn new(
        event_type: EventType,
        resource: impl Into<String>,
        client: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            resource: resource.into(),
            client: client.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate counts over all recorded events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_events: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_resource: BTreeMap<String, usize>,
    pub unique_clients: usize,
}

/// Event counting backend
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Analytics: Send + Sync {
    /// Record one event
    async fn track(&self, event: TrackedEvent) -> Result<(), BackendError>;

    /// Aggregate counts
    async fn stats(&self) -> Result<Stats, BackendError>;
}

/// Event log kept in process memory
#[derive(Default)]
pub struct InMemoryAnalytics {
    events: Mutex<Vec<TrackedEvent>>,
}

impl InMemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Analytics for InMemoryAnalytics {
    async fn track(&self, event: TrackedEvent) -> Result<(), BackendError> {
        self.events
            .lock()
            .map_err(|e| -> BackendError { format!("analytics lock poisoned: {}", e).into() })?
            .push(event);
        Ok(())
    }

    async fn stats(&self) -> Result<Stats, BackendError> {
        let events = self
            .events
            .lock()
            .map_err(|e| -> BackendError { format!("analytics lock poisoned: {}", e).into() })?;

        let mut stats = Stats {
            total_events: events.len(),
            // every known type shows up, even at zero
            by_type: EventType::iter().map(|t| (t.to_string(), 0)).collect(),
            ..Stats::default()
        };
        let mut clients = HashSet::new();

        for event in events.iter() {
            *stats.by_type.entry(event.event_type.to_string()).or_default() += 1;
            *stats.by_resource.entry(event.resource.clone()).or_default() += 1;
            clients.insert(event.client.as_str());
        }
        stats.unique_clients = clients.len();

        Ok(stats)
    }
}
