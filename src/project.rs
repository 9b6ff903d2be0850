use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::db::{Database, CURRENT_PROJECT_KEY};
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::models::{Project, ProjectPayload};

const LIST_FAILED: &str = "failed to load project list";
const DETAIL_FAILED: &str = "failed to load project";
const CREATE_FAILED: &str = "failed to create project";
const UPDATE_FAILED: &str = "failed to update project";
const DELETE_FAILED: &str = "failed to delete project";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    pub projects: Vec<Project>,
    pub current: Option<Project>,
    pub loading: bool,
    pub error: Option<String>,
}

/// The project list and the active project that scopes every monitor query.
///
/// `current` is a copy taken at selection time. It is refreshed when the same project
/// is updated through this context, but not when it changes elsewhere.
pub struct ProjectContext {
    gateway: Arc<Gateway>,
    storage: Arc<Database>,
    state: Mutex<ProjectState>,
    in_flight: Mutex<u32>,
}

impl ProjectContext {
    pub fn new(gateway: Arc<Gateway>, storage: Arc<Database>) -> Self {
        ProjectContext {
            gateway,
            storage,
            state: Mutex::new(ProjectState::default()),
            in_flight: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> ProjectState {
        self.state.lock().clone()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.state.lock().projects.clone()
    }

    pub fn current_project(&self) -> Option<Project> {
        self.state.lock().current.clone()
    }

    pub fn has_projects(&self) -> bool {
        !self.state.lock().projects.is_empty()
    }

    pub fn loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Restore the persisted selection (corrupt data is dropped), then load the list.
    pub async fn init(&self) -> Result<(), ApiError> {
        if let Some(project) = self.storage.load_json::<Project>(CURRENT_PROJECT_KEY) {
            debug!(project_id = project.id, "restored active project");
            self.state.lock().current = Some(project);
        }
        self.fetch_projects().await.map(|_| ())
    }

    /// Replace the project list. Selects and persists the first entry when nothing is
    /// selected yet. On failure the previous list stays.
    pub async fn fetch_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.begin();
        let result = self.gateway.get::<Vec<Project>, _>("/api/projects", &()).await;

        match result {
            Ok(projects) => {
                let selected = {
                    let mut state = self.state.lock();
                    state.projects = projects.clone();
                    match (&state.current, projects.first()) {
                        (None, Some(first)) => {
                            state.current = Some(first.clone());
                            Some(first.clone())
                        }
                        _ => None,
                    }
                };
                if let Some(project) = selected {
                    info!(project_id = project.id, "auto-selected first project");
                    self.storage.persist_json(CURRENT_PROJECT_KEY, &project);
                }
                self.finish(None);
                Ok(projects)
            }
            Err(err) => {
                warn!(error = %err, "project list fetch failed");
                self.finish(Some(err.user_message(LIST_FAILED)));
                Err(err)
            }
        }
    }

    /// Load one project without touching the list or the selection.
    pub async fn fetch_project(&self, id: u64) -> Result<Project, ApiError> {
        self.begin();
        let result = self
            .gateway
            .get::<Project, _>(&format!("/api/projects/{}", id), &())
            .await;
        let error = result.as_ref().err().map(|e| e.user_message(DETAIL_FAILED));
        self.finish(error);
        result
    }

    pub async fn create_project(&self, name: &str, description: &str) -> Result<Project, ApiError> {
        self.begin();
        let result = self
            .gateway
            .post::<Project, _>("/api/projects", &ProjectPayload { name, description })
            .await;

        match result {
            Ok(project) => {
                self.state.lock().projects.push(project.clone());
                info!(project_id = project.id, "project created");
                self.finish(None);
                Ok(project)
            }
            Err(err) => {
                self.finish(Some(err.user_message(CREATE_FAILED)));
                Err(err)
            }
        }
    }

    pub async fn update_project(
        &self,
        id: u64,
        name: &str,
        description: &str,
    ) -> Result<Project, ApiError> {
        self.begin();
        let result = self
            .gateway
            .put::<Project, _>(
                &format!("/api/projects/{}", id),
                &ProjectPayload { name, description },
            )
            .await;

        match result {
            Ok(project) => {
                let was_current = {
                    let mut state = self.state.lock();
                    if let Some(slot) = state.projects.iter_mut().find(|p| p.id == id) {
                        *slot = project.clone();
                    }
                    let was_current = state.current.as_ref().map(|p| p.id) == Some(id);
                    if was_current {
                        state.current = Some(project.clone());
                    }
                    was_current
                };
                if was_current {
                    self.storage.persist_json(CURRENT_PROJECT_KEY, &project);
                }
                self.finish(None);
                Ok(project)
            }
            Err(err) => {
                self.finish(Some(err.user_message(UPDATE_FAILED)));
                Err(err)
            }
        }
    }

    /// Delete remotely, then drop the entry locally. Deleting the active project moves the
    /// selection to the first remaining project, or clears it.
    pub async fn delete_project(&self, id: u64) -> Result<(), ApiError> {
        self.begin();
        let result = self.gateway.delete(&format!("/api/projects/{}", id)).await;

        if let Err(err) = result {
            self.finish(Some(err.user_message(DELETE_FAILED)));
            return Err(err);
        }

        let reselected = {
            let mut state = self.state.lock();
            state.projects.retain(|p| p.id != id);
            if state.current.as_ref().map(|p| p.id) == Some(id) {
                state.current = state.projects.first().cloned();
                Some(state.current.clone())
            } else {
                None
            }
        };

        match reselected {
            Some(Some(next)) => {
                info!(deleted = id, project_id = next.id, "active project deleted, reselected");
                self.storage.persist_json(CURRENT_PROJECT_KEY, &next);
            }
            Some(None) => {
                info!(deleted = id, "active project deleted, none left");
                self.storage.forget(CURRENT_PROJECT_KEY);
            }
            None => {}
        }

        self.finish(None);
        Ok(())
    }

    pub fn set_current_project(&self, project: Project) {
        info!(project_id = project.id, "active project selected");
        self.storage.persist_json(CURRENT_PROJECT_KEY, &project);
        self.state.lock().current = Some(project);
    }

    fn begin(&self) {
        *self.in_flight.lock() += 1;
        let mut state = self.state.lock();
        state.loading = true;
        state.error = None;
    }

    fn finish(&self, error: Option<String>) {
        let remaining = {
            let mut in_flight = self.in_flight.lock();
            *in_flight = in_flight.saturating_sub(1);
            *in_flight
        };
        let mut state = self.state.lock();
        state.loading = remaining > 0;
        if error.is_some() {
            state.error = error;
        }
    }
}
