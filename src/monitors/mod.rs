//! One module per monitored resource kind. Each pairs its list stores with the detail
//! and stats slots that kind exposes.

use serde::{de::DeserializeOwned, Serialize};

use crate::gateway::Gateway;
use crate::project::ProjectContext;
use crate::resource::{FetchOutcome, Slot};

pub mod behavior;
pub mod errors;
pub mod events;
pub mod performance;

pub use behavior::BehaviorMonitor;
pub use errors::ErrorMonitor;
pub use events::{Breakdown, EventMonitor};
pub use performance::PerformanceMonitor;

/// Optional bounds for stats requests: epoch milliseconds, except for the errors
/// endpoints, which take seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl TimeRange {
    pub fn new(start_time: Option<i64>, end_time: Option<i64>) -> Self {
        TimeRange {
            start_time,
            end_time,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    project_id: u64,
    #[serde(flatten)]
    range: TimeRange,
}

/// Load a project-scoped stats payload into `slot`.
async fn load_stats<T>(
    slot: &Slot<T>,
    gateway: &Gateway,
    projects: &ProjectContext,
    path: &str,
    range: TimeRange,
    fallback: &str,
) -> FetchOutcome
where
    T: DeserializeOwned + Clone,
{
    let Some(project) = projects.current_project() else {
        return FetchOutcome::NoProject;
    };
    let query = StatsQuery {
        project_id: project.id,
        range,
    };
    slot.load(gateway.get::<T, _>(path, &query), fallback).await
}
