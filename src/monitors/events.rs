use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::gateway::Gateway;
use crate::models::{EventDetail, EventItem};
use crate::project::ProjectContext;
use crate::resource::{FetchOutcome, FilterFields, ResourceKind, ResourceStore, Slot, SlotState};

use super::{load_stats, TimeRange};

const DETAIL_FAILED: &str = "failed to load event detail";
const STATS_FAILED: &str = "failed to load event stats";
const BREAKDOWN_FAILED: &str = "failed to load distribution";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    EventType(Option<String>),
    Keyword(Option<String>),
    Browser(Option<String>),
    Os(Option<String>),
    DeviceType(Option<String>),
}

impl FilterFields for EventFields {
    type Change = EventFilter;

    fn apply(&mut self, change: EventFilter) {
        match change {
            EventFilter::EventType(v) => self.event_type = v,
            EventFilter::Keyword(v) => self.keyword = v,
            EventFilter::Browser(v) => self.browser = v,
            EventFilter::Os(v) => self.os = v,
            EventFilter::DeviceType(v) => self.device_type = v,
        }
    }
}

pub struct Events;

impl ResourceKind for Events {
    type Fields = EventFields;
    type Item = EventItem;

    const NAME: &'static str = "events";
    const PATH: &'static str = "/api/events";
    const FETCH_FAILED: &'static str = "failed to load event list";
}

/// Distribution views under `/api/events/stats/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Breakdown {
    Browser,
    Os,
    Device,
    ErrorType,
    Performance,
    RequestError,
}

impl Breakdown {
    pub const ALL: [Breakdown; 6] = [
        Breakdown::Browser,
        Breakdown::Os,
        Breakdown::Device,
        Breakdown::ErrorType,
        Breakdown::Performance,
        Breakdown::RequestError,
    ];

    pub fn segment(self) -> &'static str {
        match self {
            Breakdown::Browser => "browser",
            Breakdown::Os => "os",
            Breakdown::Device => "device",
            Breakdown::ErrorType => "error-type",
            Breakdown::Performance => "performance",
            Breakdown::RequestError => "request-error",
        }
    }

    pub fn path(self) -> String {
        format!("/api/events/stats/{}", self.segment())
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Raw tracked events across every type. Stats payloads are kept as JSON since their
/// shape depends on the dimension.
pub struct EventMonitor {
    gateway: Arc<Gateway>,
    projects: Arc<ProjectContext>,
    pub list: ResourceStore<Events>,
    detail: Slot<EventDetail>,
    stats: Slot<Value>,
    breakdowns: [Slot<Value>; 6],
}

impl EventMonitor {
    pub fn new(gateway: Arc<Gateway>, projects: Arc<ProjectContext>) -> Self {
        EventMonitor {
            list: ResourceStore::new(gateway.clone(), projects.clone()),
            detail: Slot::new("event detail"),
            stats: Slot::new("event stats"),
            breakdowns: Breakdown::ALL.map(|b| Slot::new(b.segment())),
            gateway,
            projects,
        }
    }

    pub fn detail(&self) -> SlotState<EventDetail> {
        self.detail.snapshot()
    }

    pub fn stats(&self) -> SlotState<Value> {
        self.stats.snapshot()
    }

    pub fn breakdown(&self, dimension: Breakdown) -> SlotState<Value> {
        self.breakdowns[dimension.index()].snapshot()
    }

    pub async fn fetch_detail(&self, id: u64) -> FetchOutcome {
        let path = format!("/api/events/{}", id);
        self.detail
            .load(self.gateway.get::<EventDetail, _>(&path, &()), DETAIL_FAILED)
            .await
    }

    pub async fn fetch_stats(&self, range: TimeRange) -> FetchOutcome {
        load_stats(
            &self.stats,
            &self.gateway,
            &self.projects,
            "/api/events/stats",
            range,
            STATS_FAILED,
        )
        .await
    }

    pub async fn fetch_breakdown(&self, dimension: Breakdown, range: TimeRange) -> FetchOutcome {
        load_stats(
            &self.breakdowns[dimension.index()],
            &self.gateway,
            &self.projects,
            &dimension.path(),
            range,
            BREAKDOWN_FAILED,
        )
        .await
    }

    pub async fn refresh(&self) -> FetchOutcome {
        self.list.fetch().await
    }

    pub fn clear(&self) {
        self.list.clear();
        self.detail.clear();
        self.stats.clear();
        for slot in &self.breakdowns {
            slot.clear();
        }
    }
}
