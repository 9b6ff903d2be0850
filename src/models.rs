use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Go encodes empty slices as `null`; treat that the same as a missing list.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_key: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub email: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
    /// Unix seconds; zero when the server did not say.
    #[serde(default)]
    pub expire_at: i64,
}

#[derive(Debug, Serialize)]
pub struct ProjectPayload<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default)]
    pub total: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub list: Vec<T>,
}

pub type Distribution = BTreeMap<String, i64>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorGroup {
    pub id: u64,
    pub fingerprint: String,
    pub error_type: String,
    pub error_message: String,
    pub count: i64,
    /// Epoch seconds, like `last_seen`.
    pub first_seen: i64,
    pub last_seen: i64,
    pub status: String,
    pub severity: String,
    pub sub_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorEvent {
    pub id: u64,
    pub event_id: String,
    pub error_type: String,
    pub error_message: String,
    pub error_stack: String,
    pub file_path: String,
    pub line_number: i64,
    pub column_number: i64,
    pub trigger_time: i64,
    pub page_url: String,
    pub browser: String,
    pub os: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorDetail {
    pub group: ErrorGroup,
    #[serde(deserialize_with = "null_as_empty")]
    pub events: Vec<ErrorEvent>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorStatsData {
    pub total_errors: i64,
    pub affected_users: i64,
    pub errors_today: i64,
    pub errors_yesterday: i64,
    pub type_distribution: Distribution,
    pub browser_distribution: Distribution,
    pub os_distribution: Distribution,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrendPoint {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ErrorStats {
    pub stats: ErrorStatsData,
    #[serde(deserialize_with = "null_as_empty")]
    pub trend: Vec<TrendPoint>,
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceSample {
    pub id: u64,
    pub event_id: String,
    pub page_url: String,
    pub trigger_time: i64,
    pub fp: i64,
    pub fcp: i64,
    pub lcp: i64,
    pub fid: i64,
    pub cls: f64,
    pub ttfb: i64,
    pub dom_ready: i64,
    pub load: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceTiming {
    pub id: u64,
    pub event_id: String,
    pub resource_url: String,
    pub resource_type: String,
    pub initiator_type: String,
    pub start_time: i64,
    pub duration: i64,
    pub transfer_size: i64,
    pub page_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PerformanceAverages {
    #[serde(rename = "avgFP")]
    pub avg_fp: i64,
    #[serde(rename = "avgFCP")]
    pub avg_fcp: i64,
    #[serde(rename = "avgLCP")]
    pub avg_lcp: i64,
    #[serde(rename = "avgFID")]
    pub avg_fid: i64,
    #[serde(rename = "avgCLS")]
    pub avg_cls: f64,
    #[serde(rename = "avgTTFB")]
    pub avg_ttfb: i64,
    #[serde(rename = "avgDomReady")]
    pub avg_dom_ready: i64,
    #[serde(rename = "avgLoad")]
    pub avg_load: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PerformanceTrendPoint {
    pub date: String,
    pub fp: i64,
    pub fcp: i64,
    pub lcp: i64,
    pub ttfb: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PerformanceStats {
    pub stats: PerformanceAverages,
    #[serde(deserialize_with = "null_as_empty")]
    pub trend: Vec<PerformanceTrendPoint>,
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageView {
    pub id: u64,
    pub event_id: String,
    pub page_url: String,
    pub title: String,
    pub referrer: String,
    pub trigger_time: i64,
    pub stay_time: i64,
    pub is_new_visit: bool,
    pub browser: String,
    pub os: String,
    pub device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Click {
    pub id: u64,
    pub event_id: String,
    pub element_path: String,
    pub element_type: String,
    pub inner_text: String,
    pub trigger_time: i64,
    pub page_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageViewStats {
    #[serde(rename = "totalPV")]
    pub total_pv: i64,
    #[serde(rename = "totalUV")]
    pub total_uv: i64,
    #[serde(rename = "pvToday")]
    pub pv_today: i64,
    #[serde(rename = "uvToday")]
    pub uv_today: i64,
    #[serde(rename = "avgStayTime")]
    pub avg_stay_time: i64,
    #[serde(rename = "bounceRate")]
    pub bounce_rate: f64,
    #[serde(rename = "topPages")]
    pub top_pages: Distribution,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClickStats {
    pub total_clicks: i64,
    pub clicks_today: i64,
    pub top_elements: Distribution,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageViewTrendPoint {
    pub date: String,
    pub pv: i64,
    pub uv: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BehaviorStats {
    #[serde(rename = "pvStats")]
    pub page_views: PageViewStats,
    #[serde(rename = "clickStats")]
    pub clicks: ClickStats,
    #[serde(rename = "pvTrend", deserialize_with = "null_as_empty")]
    pub trend: Vec<PageViewTrendPoint>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventItem {
    pub id: u64,
    pub event_id: String,
    pub event_type: String,
    pub trigger_time: i64,
    pub page_url: String,
    pub browser: String,
    pub os: String,
    pub device_type: String,
}

/// Detail view of one event. Only the sections matching the event's type are present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDetail {
    pub event: Option<serde_json::Value>,
    pub error_event: Option<serde_json::Value>,
    pub performance: Option<serde_json::Value>,
    pub request: Option<serde_json::Value>,
    pub route: Option<serde_json::Value>,
    pub click: Option<serde_json::Value>,
    pub exposure: Option<serde_json::Value>,
}
