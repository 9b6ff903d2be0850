use std::sync::Arc;

use serde::Serialize;

use crate::gateway::Gateway;
use crate::models::{PerformanceSample, PerformanceStats, ResourceTiming};
use crate::project::ProjectContext;
use crate::resource::{FetchOutcome, FilterFields, ResourceKind, ResourceStore, Slot, SlotState};

use super::{load_stats, TimeRange};

const STATS_FAILED: &str = "failed to load performance stats";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageFields {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub sample_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFilter {
    Type(Option<String>),
}

impl FilterFields for PageFields {
    type Change = PageFilter;

    fn apply(&mut self, change: PageFilter) {
        match change {
            PageFilter::Type(v) => self.sample_type = v,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFilter {
    ResourceType(Option<String>),
}

impl FilterFields for ResourceFields {
    type Change = ResourceFilter;

    fn apply(&mut self, change: ResourceFilter) {
        match change {
            ResourceFilter::ResourceType(v) => self.resource_type = v,
        }
    }
}

/// Page load timings.
pub struct PageSamples;

impl ResourceKind for PageSamples {
    type Fields = PageFields;
    type Item = PerformanceSample;

    const NAME: &'static str = "performance";
    const PATH: &'static str = "/api/performance";
    const FETCH_FAILED: &'static str = "failed to load performance data";
}

/// Individual resource (script, image, xhr...) timings.
pub struct ResourceTimings;

impl ResourceKind for ResourceTimings {
    type Fields = ResourceFields;
    type Item = ResourceTiming;

    const NAME: &'static str = "performance resources";
    const PATH: &'static str = "/api/performance/resources";
    const FETCH_FAILED: &'static str = "failed to load resource performance data";
}

pub struct PerformanceMonitor {
    gateway: Arc<Gateway>,
    projects: Arc<ProjectContext>,
    pub pages: ResourceStore<PageSamples>,
    pub resources: ResourceStore<ResourceTimings>,
    stats: Slot<PerformanceStats>,
}

impl PerformanceMonitor {
    pub fn new(gateway: Arc<Gateway>, projects: Arc<ProjectContext>) -> Self {
        PerformanceMonitor {
            pages: ResourceStore::new(gateway.clone(), projects.clone()),
            resources: ResourceStore::new(gateway.clone(), projects.clone()),
            stats: Slot::new("performance stats"),
            gateway,
            projects,
        }
    }

    pub fn stats(&self) -> SlotState<PerformanceStats> {
        self.stats.snapshot()
    }

    pub async fn fetch_stats(&self, range: TimeRange) -> FetchOutcome {
        load_stats(
            &self.stats,
            &self.gateway,
            &self.projects,
            "/api/performance/stats",
            range,
            STATS_FAILED,
        )
        .await
    }

    /// Refetch both lists. Returns the page samples outcome first.
    pub async fn refresh(&self) -> (FetchOutcome, FetchOutcome) {
        tokio::join!(self.pages.fetch(), self.resources.fetch())
    }

    pub fn clear(&self) {
        self.pages.clear();
        self.resources.clear();
        self.stats.clear();
    }
}
