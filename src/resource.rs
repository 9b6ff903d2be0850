//! Filter, pagination and fetch discipline shared by every monitor kind.
//!
//! Each store owns one [`Filters`] value and the last page it loaded. Any filter edit
//! triggers a fetch; every fetch takes a new generation number when it is issued, and a
//! response is applied only if its generation is still the newest one when it arrives.
//! Failures leave the previously loaded page in place.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::models::Page;
use crate::project::ProjectContext;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Kind-specific filter keys layered on top of pagination and the time range.
pub trait FilterFields: Default + Clone + PartialEq + Debug + Serialize + Send + Sync + 'static {
    type Change: Clone + Debug + Send + Sync + 'static;

    fn apply(&mut self, change: Self::Change);
}

/// For kinds that only filter by page and time range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoFields {}

impl FilterFields for NoFields {
    type Change = std::convert::Infallible;

    fn apply(&mut self, change: Self::Change) {
        match change {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters<X> {
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(flatten)]
    pub extra: X,
}

impl<X: Default> Default for Filters<X> {
    fn default() -> Self {
        Filters {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            start_time: None,
            end_time: None,
            extra: X::default(),
        }
    }
}

/// One key of a partial filter update. `None` clears an optional key.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterChange<C> {
    Page(u32),
    PageSize(u32),
    StartTime(Option<i64>),
    EndTime(Option<i64>),
    Field(C),
}

impl<C> FilterChange<C> {
    pub fn is_pagination(&self) -> bool {
        matches!(self, FilterChange::Page(_) | FilterChange::PageSize(_))
    }
}

impl<X: FilterFields> Filters<X> {
    /// Merge `changes`. If anything other than page or page size changed, pagination
    /// restarts at page 1.
    pub fn apply<I>(&mut self, changes: I)
    where
        I: IntoIterator<Item = FilterChange<X::Change>>,
    {
        let mut restart = false;
        for change in changes {
            restart |= !change.is_pagination();
            match change {
                FilterChange::Page(page) => self.page = page,
                FilterChange::PageSize(size) => self.page_size = size,
                FilterChange::StartTime(t) => self.start_time = t,
                FilterChange::EndTime(t) => self.end_time = t,
                FilterChange::Field(field) => self.extra.apply(field),
            }
        }
        if restart {
            self.page = 1;
        }
    }
}

/// A paginated monitor endpoint.
pub trait ResourceKind: Send + Sync + 'static {
    type Fields: FilterFields;
    type Item: DeserializeOwned + Clone + Debug + Send + Sync + 'static;

    const NAME: &'static str;
    const PATH: &'static str;
    /// Shown when the server gives no message of its own.
    const FETCH_FAILED: &'static str;
}

pub type ChangeOf<K> = FilterChange<<<K as ResourceKind>::Fields as FilterFields>::Change>;

#[derive(Debug, Clone, PartialEq)]
pub struct Collection<I, X> {
    pub list: Vec<I>,
    pub total: u64,
    pub loading: bool,
    pub error: Option<String>,
    pub filters: Filters<X>,
}

impl<I, X: Default> Default for Collection<I, X> {
    fn default() -> Self {
        Collection {
            list: Vec::new(),
            total: 0,
            loading: false,
            error: None,
            filters: Filters::default(),
        }
    }
}

impl<I, X> Collection<I, X> {
    pub fn has_items(&self) -> bool {
        !self.list.is_empty()
    }

    pub fn total_pages(&self) -> u64 {
        total_pages(self.total, self.filters.page_size)
    }
}

/// `ceil(total / page_size)`, with a zero page size giving zero pages.
pub fn total_pages(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size))
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded,
    Failed(ApiError),
    /// A newer fetch was issued while this one was in flight; its response was dropped.
    Superseded,
    /// No active project, nothing was requested.
    NoProject,
}

impl FetchOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, FetchOutcome::Loaded)
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            FetchOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery<'a, X> {
    project_id: u64,
    #[serde(flatten)]
    filters: &'a Filters<X>,
}

struct Inner<K: ResourceKind> {
    collection: Collection<K::Item, K::Fields>,
    generation: u64,
}

pub struct ResourceStore<K: ResourceKind> {
    gateway: Arc<Gateway>,
    projects: Arc<ProjectContext>,
    inner: Mutex<Inner<K>>,
}

impl<K: ResourceKind> ResourceStore<K> {
    pub fn new(gateway: Arc<Gateway>, projects: Arc<ProjectContext>) -> Self {
        ResourceStore {
            gateway,
            projects,
            inner: Mutex::new(Inner {
                collection: Collection::default(),
                generation: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> Collection<K::Item, K::Fields> {
        self.inner.lock().collection.clone()
    }

    pub fn filters(&self) -> Filters<K::Fields> {
        self.inner.lock().collection.filters.clone()
    }

    pub fn list(&self) -> Vec<K::Item> {
        self.inner.lock().collection.list.clone()
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().collection.total
    }

    pub fn total_pages(&self) -> u64 {
        self.inner.lock().collection.total_pages()
    }

    pub fn has_items(&self) -> bool {
        self.inner.lock().collection.has_items()
    }

    pub fn loading(&self) -> bool {
        self.inner.lock().collection.loading
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().collection.error.clone()
    }

    /// Load the page described by the current filters for the active project.
    pub async fn fetch(&self) -> FetchOutcome {
        let Some(project) = self.projects.current_project() else {
            debug!(kind = K::NAME, "no active project, skipping fetch");
            return FetchOutcome::NoProject;
        };

        let (generation, filters) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.collection.loading = true;
            inner.collection.error = None;
            (inner.generation, inner.collection.filters.clone())
        };
        debug!(kind = K::NAME, generation, project_id = project.id, ?filters, "fetch");

        let query = ListQuery {
            project_id: project.id,
            filters: &filters,
        };
        let result = self.gateway.get::<Page<K::Item>, _>(K::PATH, &query).await;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(
                kind = K::NAME,
                generation,
                latest = inner.generation,
                "discarding superseded response"
            );
            return FetchOutcome::Superseded;
        }

        inner.collection.loading = false;
        match result {
            Ok(page) => {
                inner.collection.list = page.list;
                inner.collection.total = page.total;
                FetchOutcome::Loaded
            }
            Err(err) => {
                warn!(kind = K::NAME, error = %err, "fetch failed");
                inner.collection.error = Some(err.user_message(K::FETCH_FAILED));
                FetchOutcome::Failed(err)
            }
        }
    }

    pub async fn set_filters<I>(&self, changes: I) -> FetchOutcome
    where
        I: IntoIterator<Item = ChangeOf<K>>,
    {
        self.inner.lock().collection.filters.apply(changes);
        self.fetch().await
    }

    pub async fn reset_filters(&self) -> FetchOutcome {
        self.inner.lock().collection.filters = Filters::default();
        self.fetch().await
    }

    /// Back to an empty collection with default filters. Any in-flight response is dropped.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.collection = Collection::default();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for SlotState<T> {
    fn default() -> Self {
        SlotState {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// Holder for a detail or stats payload. Same loading, stale-on-error and
/// newest-request-wins rules as [`ResourceStore`], without filters.
pub struct Slot<T> {
    name: &'static str,
    inner: Mutex<(SlotState<T>, u64)>,
}

impl<T: Clone> Slot<T> {
    pub fn new(name: &'static str) -> Self {
        Slot {
            name,
            inner: Mutex::new((SlotState::default(), 0)),
        }
    }

    pub fn snapshot(&self) -> SlotState<T> {
        self.inner.lock().0.clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.lock().0.data.clone()
    }

    pub async fn load<F>(&self, request: F, fallback: &str) -> FetchOutcome
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let generation = {
            let mut inner = self.inner.lock();
            inner.1 += 1;
            inner.0.loading = true;
            inner.0.error = None;
            inner.1
        };

        let result = request.await;

        let mut inner = self.inner.lock();
        if inner.1 != generation {
            debug!(slot = self.name, generation, "discarding superseded response");
            return FetchOutcome::Superseded;
        }

        let state = &mut inner.0;
        state.loading = false;
        match result {
            Ok(data) => {
                state.data = Some(data);
                FetchOutcome::Loaded
            }
            Err(err) => {
                warn!(slot = self.name, error = %err, "fetch failed");
                state.error = Some(err.user_message(fallback));
                FetchOutcome::Failed(err)
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.1 += 1;
        inner.0 = SlotState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::gateway::Transport;
    use crate::models::Project;
    use crate::navigation::{HistoryNavigator, Route};
    use crate::session::Session;
    use crate::testing::{DeferredTransport, ScriptedTransport};
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct WidgetFields {
        #[serde(skip_serializing_if = "Option::is_none")]
        severity: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum WidgetChange {
        Severity(Option<String>),
    }

    impl FilterFields for WidgetFields {
        type Change = WidgetChange;

        fn apply(&mut self, change: WidgetChange) {
            match change {
                WidgetChange::Severity(s) => self.severity = s,
            }
        }
    }

    struct Widgets;

    impl ResourceKind for Widgets {
        type Fields = WidgetFields;
        type Item = Value;

        const NAME: &'static str = "widgets";
        const PATH: &'static str = "/api/widgets";
        const FETCH_FAILED: &'static str = "failed to load widgets";
    }

    fn severity(s: &str) -> ChangeOf<Widgets> {
        FilterChange::Field(WidgetChange::Severity(Some(s.to_string())))
    }

    struct Fixture {
        session: Arc<Session>,
        navigator: Arc<HistoryNavigator>,
        store: Arc<ResourceStore<Widgets>>,
    }

    fn fixture(transport: Arc<dyn Transport>, with_project: bool) -> Fixture {
        let storage = Arc::new(Database::open_in_memory().unwrap());
        let session = Arc::new(Session::restore(storage.clone()));
        session.establish("tok", None, 0);
        let navigator = Arc::new(HistoryNavigator::new());
        let gateway = Arc::new(Gateway::new(transport, session.clone(), navigator.clone()));
        let projects = Arc::new(ProjectContext::new(gateway.clone(), storage));
        if with_project {
            projects.set_current_project(Project {
                id: 7,
                name: "shop".into(),
                description: String::new(),
                app_key: String::new(),
            });
        }
        let store = Arc::new(ResourceStore::new(gateway, projects));
        Fixture {
            session,
            navigator,
            store,
        }
    }

    fn page(total: u64, ids: std::ops::Range<u64>) -> String {
        let list: Vec<Value> = ids.map(|id| serde_json::json!({ "id": id })).collect();
        serde_json::json!({ "total": total, "list": list }).to_string()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn total_pages_rounds_up_and_tolerates_zero_page_size() {
        assert_eq!(total_pages(25, 10), 3);
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(47, 10), 5);
        assert_eq!(total_pages(25, 0), 0);
    }

    #[test]
    fn pagination_only_changes_keep_the_page() {
        let mut filters = Filters::<WidgetFields>::default();
        filters.apply([FilterChange::Page(2)]);
        assert_eq!(filters.page, 2);

        filters.apply([FilterChange::PageSize(50)]);
        assert_eq!(filters.page, 2);
        assert_eq!(filters.page_size, 50);
    }

    #[test]
    fn other_changes_restart_pagination() {
        let mut filters = Filters::<WidgetFields>::default();
        filters.apply([FilterChange::Page(4)]);
        filters.apply([severity("high")]);
        assert_eq!(filters.page, 1);
        assert_eq!(filters.extra.severity.as_deref(), Some("high"));

        filters.apply([FilterChange::Page(3), FilterChange::StartTime(Some(100))]);
        assert_eq!(filters.page, 1);
        assert_eq!(filters.start_time, Some(100));
    }

    #[tokio::test]
    async fn fetch_without_project_is_a_no_op() {
        let transport = Arc::new(ScriptedTransport::new());
        let f = fixture(transport.clone(), false);

        assert_eq!(f.store.fetch().await, FetchOutcome::NoProject);
        assert!(transport.requests().is_empty());
        assert!(!f.store.loading());
    }

    #[tokio::test]
    async fn filter_change_scenario() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(200, &page(47, 0..10));
        transport.respond(200, &page(47, 20..30));
        transport.respond(200, &page(3, 0..3));
        let f = fixture(transport.clone(), true);

        assert!(f.store.fetch().await.is_loaded());
        assert_eq!(f.store.total_pages(), 5);
        assert_eq!(f.store.list().len(), 10);

        assert!(f.store.set_filters([FilterChange::Page(3)]).await.is_loaded());
        assert_eq!(f.store.filters().page, 3);

        let outcome = f.store.set_filters([FilterChange::StartTime(Some(100))]).await;
        assert_eq!(outcome, FetchOutcome::Loaded);
        assert_eq!(f.store.filters().page, 1);
        assert_eq!(f.store.total(), 3);
        assert_eq!(f.store.total_pages(), 1);
        assert_eq!(f.store.list().len(), 3);

        let requests = transport.requests();
        assert_eq!(
            requests[0].query,
            pairs(&[("page", "1"), ("pageSize", "10"), ("projectId", "7")])
        );
        assert_eq!(
            requests[2].query,
            pairs(&[
                ("page", "1"),
                ("pageSize", "10"),
                ("projectId", "7"),
                ("startTime", "100")
            ])
        );
        assert_eq!(requests[0].path, "/api/widgets");
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            transport.respond(200, &page(0, 0..0));
        }
        let f = fixture(transport, true);

        f.store
            .set_filters([
                FilterChange::PageSize(25),
                FilterChange::EndTime(Some(9)),
                severity("low"),
            ])
            .await;
        f.store.set_filters([FilterChange::Page(6)]).await;
        f.store.reset_filters().await;

        assert_eq!(f.store.filters(), Filters::default());
    }

    #[tokio::test]
    async fn failure_keeps_previous_page() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(200, &page(12, 0..10));
        transport.respond(500, r#"{"message":"db down"}"#);
        transport.respond(503, "");
        transport.fail(ApiError::Network("connection reset".into()));
        let f = fixture(transport, true);

        f.store.fetch().await;
        let outcome = f.store.fetch().await;

        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        let snapshot = f.store.snapshot();
        assert_eq!(snapshot.list.len(), 10);
        assert_eq!(snapshot.total, 12);
        assert_eq!(snapshot.error.as_deref(), Some("db down"));
        assert!(!snapshot.loading);

        f.store.fetch().await;
        assert_eq!(f.store.error().as_deref(), Some(Widgets::FETCH_FAILED));

        let outcome = f.store.fetch().await;
        assert_eq!(outcome.error(), Some(&ApiError::Network("connection reset".into())));
        assert_eq!(f.store.total(), 12);
        assert_eq!(f.store.error().as_deref(), Some(Widgets::FETCH_FAILED));
    }

    #[tokio::test]
    async fn last_issued_request_wins_even_when_it_resolves_first() {
        let transport = Arc::new(DeferredTransport::new());
        let f = fixture(transport.clone(), true);

        let first = {
            let store = f.store.clone();
            tokio::spawn(async move { store.set_filters([severity("low")]).await })
        };
        transport.wait_for_requests(1).await;

        let second = {
            let store = f.store.clone();
            tokio::spawn(async move { store.set_filters([severity("high")]).await })
        };
        transport.wait_for_requests(2).await;
        assert!(f.store.loading());

        transport.resolve(1, 200, &page(2, 100..102));
        assert_eq!(second.await.unwrap(), FetchOutcome::Loaded);

        transport.resolve(0, 200, &page(30, 0..10));
        assert_eq!(first.await.unwrap(), FetchOutcome::Superseded);

        let snapshot = f.store.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.list[0]["id"], 100);
        assert_eq!(snapshot.filters.extra.severity.as_deref(), Some("high"));
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn superseded_failure_does_not_set_error() {
        let transport = Arc::new(DeferredTransport::new());
        let f = fixture(transport.clone(), true);

        let first = {
            let store = f.store.clone();
            tokio::spawn(async move { store.fetch().await })
        };
        transport.wait_for_requests(1).await;
        let second = {
            let store = f.store.clone();
            tokio::spawn(async move { store.fetch().await })
        };
        transport.wait_for_requests(2).await;

        transport.resolve(0, 500, "");
        assert_eq!(first.await.unwrap(), FetchOutcome::Superseded);
        assert!(f.store.loading());

        transport.resolve(1, 200, &page(1, 0..1));
        assert!(second.await.unwrap().is_loaded());
        assert_eq!(f.store.error(), None);
    }

    #[tokio::test]
    async fn unauthorized_while_pending_evicts_session() {
        let transport = Arc::new(DeferredTransport::new());
        let f = fixture(transport.clone(), true);

        let pending = {
            let store = f.store.clone();
            tokio::spawn(async move { store.fetch().await })
        };
        transport.wait_for_requests(1).await;
        assert!(f.session.is_authenticated());

        transport.resolve(0, 401, r#"{"message":"token expired"}"#);
        let outcome = pending.await.unwrap();

        assert!(outcome.error().is_some_and(ApiError::is_unauthorized));
        assert!(!f.session.is_authenticated());
        assert_eq!(f.navigator.current(), Some(Route::Login));
        assert_eq!(f.store.error().as_deref(), Some("token expired"));
    }

    #[tokio::test]
    async fn clear_drops_in_flight_response() {
        let transport = Arc::new(DeferredTransport::new());
        let f = fixture(transport.clone(), true);

        let pending = {
            let store = f.store.clone();
            tokio::spawn(async move { store.fetch().await })
        };
        transport.wait_for_requests(1).await;
        f.store.clear();

        transport.resolve(0, 200, &page(5, 0..5));
        assert_eq!(pending.await.unwrap(), FetchOutcome::Superseded);
        assert!(!f.store.has_items());
        assert!(!f.store.loading());
    }

    #[tokio::test]
    async fn slot_keeps_data_on_error() {
        let slot: Slot<u32> = Slot::new("answer");

        assert!(slot.load(async { Ok(42) }, "failed").await.is_loaded());
        let outcome = slot
            .load(async { Err(ApiError::Network("down".into())) }, "failed to load answer")
            .await;

        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        let state = slot.snapshot();
        assert_eq!(state.data, Some(42));
        assert_eq!(state.error.as_deref(), Some("failed to load answer"));
        assert!(!state.loading);
    }
}
