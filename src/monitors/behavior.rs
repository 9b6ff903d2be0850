use std::sync::Arc;

use crate::gateway::Gateway;
use crate::models::{BehaviorStats, Click, PageView};
use crate::project::ProjectContext;
use crate::resource::{FetchOutcome, NoFields, ResourceKind, ResourceStore, Slot, SlotState};

use super::{load_stats, TimeRange};

const STATS_FAILED: &str = "failed to load behavior stats";

pub struct PageViews;

impl ResourceKind for PageViews {
    type Fields = NoFields;
    type Item = PageView;

    const NAME: &'static str = "page views";
    const PATH: &'static str = "/api/behavior/pv";
    const FETCH_FAILED: &'static str = "failed to load page views";
}

pub struct Clicks;

impl ResourceKind for Clicks {
    type Fields = NoFields;
    type Item = Click;

    const NAME: &'static str = "clicks";
    const PATH: &'static str = "/api/behavior/clicks";
    const FETCH_FAILED: &'static str = "failed to load click data";
}

/// Page views and clicks. Both lists filter by time range only.
pub struct BehaviorMonitor {
    gateway: Arc<Gateway>,
    projects: Arc<ProjectContext>,
    pub page_views: ResourceStore<PageViews>,
    pub clicks: ResourceStore<Clicks>,
    stats: Slot<BehaviorStats>,
}

impl BehaviorMonitor {
    pub fn new(gateway: Arc<Gateway>, projects: Arc<ProjectContext>) -> Self {
        BehaviorMonitor {
            page_views: ResourceStore::new(gateway.clone(), projects.clone()),
            clicks: ResourceStore::new(gateway.clone(), projects.clone()),
            stats: Slot::new("behavior stats"),
            gateway,
            projects,
        }
    }

    pub fn stats(&self) -> SlotState<BehaviorStats> {
        self.stats.snapshot()
    }

    pub async fn fetch_stats(&self, range: TimeRange) -> FetchOutcome {
        load_stats(
            &self.stats,
            &self.gateway,
            &self.projects,
            "/api/behavior/stats",
            range,
            STATS_FAILED,
        )
        .await
    }

    pub async fn refresh(&self) -> (FetchOutcome, FetchOutcome) {
        tokio::join!(self.page_views.fetch(), self.clicks.fetch())
    }

    pub fn clear(&self) {
        self.page_views.clear();
        self.clicks.clear();
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::fixture::{pairs, parts};
    use crate::resource::FilterChange;
    use crate::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn time_range_only_filters() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(200, r#"{"total":2,"list":[{"id":1,"pageUrl":"/a"},{"id":2,"pageUrl":"/b"}]}"#);
        let parts = parts(transport.clone());
        let monitor = BehaviorMonitor::new(parts.gateway, parts.projects);

        monitor
            .page_views
            .set_filters([FilterChange::StartTime(Some(5)), FilterChange::EndTime(Some(9))])
            .await;

        assert_eq!(monitor.page_views.total(), 2);
        assert!(!monitor.clicks.has_items());
        assert_eq!(
            transport.requests()[0].query,
            pairs(&[
                ("endTime", "9"),
                ("page", "1"),
                ("pageSize", "10"),
                ("projectId", "3"),
                ("startTime", "5")
            ])
        );
    }

    #[tokio::test]
    async fn failed_stats_keep_previous_payload() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(200, r#"{"pvStats":{"totalPV":30},"clickStats":{},"pvTrend":[]}"#);
        transport.respond(500, r#"{"message":""}"#);
        let parts = parts(transport);
        let monitor = BehaviorMonitor::new(parts.gateway, parts.projects);

        monitor.fetch_stats(TimeRange::default()).await;
        monitor.fetch_stats(TimeRange::default()).await;

        let stats = monitor.stats();
        assert_eq!(stats.data.map(|s| s.page_views.total_pv), Some(30));
        assert_eq!(stats.error.as_deref(), Some(STATS_FAILED));
    }
}
