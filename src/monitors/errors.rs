use std::sync::Arc;

use serde::Serialize;

use crate::gateway::Gateway;
use crate::models::{ErrorDetail, ErrorGroup, ErrorStats};
use crate::project::ProjectContext;
use crate::resource::{FetchOutcome, FilterFields, ResourceKind, ResourceStore, Slot, SlotState};

use super::{load_stats, TimeRange};

const DETAIL_FAILED: &str = "failed to load error detail";
const STATS_FAILED: &str = "failed to load error stats";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorFilter {
    ErrorType(Option<String>),
    Severity(Option<String>),
}

impl FilterFields for ErrorFields {
    type Change = ErrorFilter;

    fn apply(&mut self, change: ErrorFilter) {
        match change {
            ErrorFilter::ErrorType(v) => self.error_type = v,
            ErrorFilter::Severity(v) => self.severity = v,
        }
    }
}

pub struct ErrorGroups;

impl ResourceKind for ErrorGroups {
    type Fields = ErrorFields;
    type Item = ErrorGroup;

    const NAME: &'static str = "errors";
    const PATH: &'static str = "/api/errors";
    const FETCH_FAILED: &'static str = "failed to load error list";
}

/// Grouped JavaScript errors for the active project.
pub struct ErrorMonitor {
    gateway: Arc<Gateway>,
    projects: Arc<ProjectContext>,
    pub groups: ResourceStore<ErrorGroups>,
    detail: Slot<ErrorDetail>,
    stats: Slot<ErrorStats>,
}

impl ErrorMonitor {
    pub fn new(gateway: Arc<Gateway>, projects: Arc<ProjectContext>) -> Self {
        ErrorMonitor {
            groups: ResourceStore::new(gateway.clone(), projects.clone()),
            detail: Slot::new("error detail"),
            stats: Slot::new("error stats"),
            gateway,
            projects,
        }
    }

    pub fn detail(&self) -> SlotState<ErrorDetail> {
        self.detail.snapshot()
    }

    pub fn stats(&self) -> SlotState<ErrorStats> {
        self.stats.snapshot()
    }

    /// One error group with its most recent occurrences.
    pub async fn fetch_detail(&self, id: u64) -> FetchOutcome {
        let path = format!("/api/errors/{}", id);
        self.detail
            .load(self.gateway.get::<ErrorDetail, _>(&path, &()), DETAIL_FAILED)
            .await
    }

    pub async fn fetch_stats(&self, range: TimeRange) -> FetchOutcome {
        load_stats(
            &self.stats,
            &self.gateway,
            &self.projects,
            "/api/errors/stats",
            range,
            STATS_FAILED,
        )
        .await
    }

    pub async fn refresh(&self) -> FetchOutcome {
        self.groups.fetch().await
    }

    pub fn clear(&self) {
        self.groups.clear();
        self.detail.clear();
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::fixture::{pairs, parts};
    use crate::resource::FilterChange;
    use crate::testing::{DeferredTransport, ScriptedTransport};
    use pretty_assertions::assert_eq;

    fn monitor(transport: Arc<ScriptedTransport>) -> ErrorMonitor {
        let parts = parts(transport);
        ErrorMonitor::new(parts.gateway, parts.projects)
    }

    #[tokio::test]
    async fn severity_filter_restarts_pagination() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(200, r#"{"total":40,"list":[{"id":1,"errorType":"TypeError","count":3}]}"#);
        transport.respond(200, r#"{"total":1,"list":[{"id":9,"severity":"high"}]}"#);
        let monitor = monitor(transport.clone());

        monitor.groups.set_filters([FilterChange::Page(4)]).await;
        assert_eq!(monitor.groups.filters().page, 4);

        let outcome = monitor
            .groups
            .set_filters([FilterChange::Field(ErrorFilter::Severity(Some("high".into())))])
            .await;

        assert!(outcome.is_loaded());
        assert_eq!(monitor.groups.filters().page, 1);
        assert_eq!(monitor.groups.list()[0].id, 9);
        assert_eq!(
            transport.requests()[1].query,
            pairs(&[
                ("page", "1"),
                ("pageSize", "10"),
                ("projectId", "3"),
                ("severity", "high")
            ])
        );
    }

    #[tokio::test]
    async fn detail_and_stats_do_not_touch_filters() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            200,
            r#"{"group":{"id":5,"errorMessage":"x is undefined"},"events":null,"total":0}"#,
        );
        transport.respond(
            200,
            r#"{"stats":{"totalErrors":7,"typeDistribution":{"TypeError":7}},"trend":[{"date":"2024-05-02","count":7}]}"#,
        );
        let monitor = monitor(transport.clone());

        assert!(monitor.fetch_detail(5).await.is_loaded());
        assert!(monitor
            .fetch_stats(TimeRange::new(Some(10), None))
            .await
            .is_loaded());

        let detail = monitor.detail().data.unwrap();
        assert_eq!(detail.group.error_message, "x is undefined");
        assert!(detail.events.is_empty());
        assert_eq!(monitor.stats().data.unwrap().stats.total_errors, 7);

        let sent = transport.requests();
        assert_eq!(sent[0].path, "/api/errors/5");
        assert!(sent[0].query.is_empty());
        assert_eq!(sent[1].query, pairs(&[("projectId", "3"), ("startTime", "10")]));
        assert_eq!(monitor.groups.filters(), Default::default());
    }

    #[tokio::test]
    async fn failed_detail_uses_fallback_message() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(404, "");
        let monitor = monitor(transport);

        let outcome = monitor.fetch_detail(1).await;

        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        assert_eq!(monitor.detail().error.as_deref(), Some(DETAIL_FAILED));
    }

    #[tokio::test]
    async fn older_detail_response_cannot_overwrite_newer_one() {
        let transport = Arc::new(DeferredTransport::new());
        let parts = parts(transport.clone());
        let monitor = ErrorMonitor::new(parts.gateway, parts.projects);

        let (first, second, _) = tokio::join!(monitor.fetch_detail(1), monitor.fetch_detail(2), async {
            transport.wait_for_requests(2).await;
            transport.resolve(1, 200, r#"{"group":{"id":2,"errorMessage":"b"},"events":[],"total":0}"#);
            transport.resolve(0, 200, r#"{"group":{"id":1,"errorMessage":"a"},"events":[],"total":0}"#);
        });

        assert_eq!(first, FetchOutcome::Superseded);
        assert_eq!(second, FetchOutcome::Loaded);
        let detail = monitor.detail();
        assert_eq!(detail.data.unwrap().group.id, 2);
        assert!(!detail.loading);

        let paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/api/errors/1", "/api/errors/2"]);
    }
}
