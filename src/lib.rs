//! Client-side data layer for the tracedash monitoring API.
//!
//! A [`Dashboard`] wires one session, one project context and the monitor stores around
//! a single [`Gateway`]. Every store is scoped to the active project and shared through
//! `Arc` handles.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod monitors;
pub mod navigation;
pub mod project;
pub mod resource;
pub mod session;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::debug;

use crate::db::Database;
use crate::error::ApiError;
use crate::gateway::{Gateway, Transport};
use crate::models::Project;
use crate::monitors::{BehaviorMonitor, ErrorMonitor, EventMonitor, PerformanceMonitor};
use crate::navigation::Navigator;
use crate::project::ProjectContext;
use crate::session::{Session, SessionManager};

pub struct Dashboard {
    pub gateway: Arc<Gateway>,
    pub auth: Arc<SessionManager>,
    pub projects: Arc<ProjectContext>,
    pub errors: Arc<ErrorMonitor>,
    pub performance: Arc<PerformanceMonitor>,
    pub behavior: Arc<BehaviorMonitor>,
    pub events: Arc<EventMonitor>,
}

impl Dashboard {
    pub fn new(
        storage: Arc<Database>,
        transport: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let session = Arc::new(Session::restore(storage.clone()));
        let gateway = Arc::new(Gateway::new(transport, session.clone(), navigator.clone()));
        let auth = Arc::new(SessionManager::new(session, gateway.clone(), navigator));
        let projects = Arc::new(ProjectContext::new(gateway.clone(), storage));

        Dashboard {
            errors: Arc::new(ErrorMonitor::new(gateway.clone(), projects.clone())),
            performance: Arc::new(PerformanceMonitor::new(gateway.clone(), projects.clone())),
            behavior: Arc::new(BehaviorMonitor::new(gateway.clone(), projects.clone())),
            events: Arc::new(EventMonitor::new(gateway.clone(), projects.clone())),
            gateway,
            auth,
            projects,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        self.auth.session()
    }

    /// Restore the cached user and, if signed in, the project selection and list.
    pub async fn start(&self) -> Result<(), ApiError> {
        self.auth.load_user();
        if !self.session().is_authenticated() {
            debug!("no stored session");
            return Ok(());
        }
        self.projects.init().await
    }

    /// Switch the active project and reload every list.
    pub async fn select_project(&self, project: Project) {
        self.projects.set_current_project(project);
        self.refresh().await;
    }

    pub async fn refresh(&self) {
        tokio::join!(
            self.errors.refresh(),
            self.performance.refresh(),
            self.behavior.refresh(),
            self.events.refresh(),
        );
    }

    /// End the session and drop everything loaded under it.
    pub fn logout(&self) {
        self.auth.logout();
        self.errors.clear();
        self.performance.clear();
        self.behavior.clear();
        self.events.clear();
    }
}
