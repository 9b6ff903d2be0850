use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use tracedash::config::{self, Config, ConfigFile};
use tracedash::db::Database;
use tracedash::gateway::HttpTransport;
use tracedash::monitors::behavior::{Clicks, PageViews};
use tracedash::monitors::errors::{ErrorFilter, ErrorGroups};
use tracedash::monitors::events::{EventFilter, Events};
use tracedash::monitors::performance::{PageFilter, PageSamples, ResourceFilter, ResourceTimings};
use tracedash::monitors::{Breakdown, TimeRange};
use tracedash::navigation::{HistoryNavigator, Route};
use tracedash::resource::{FetchOutcome, FilterChange, FilterFields, ResourceKind, ResourceStore};
use tracedash::Dashboard;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Command line client for the tracedash monitoring API")]
struct Cli {
    #[arg(short, long, global = true, help = "Log requests and store activity to stderr")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session token
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show or change the API endpoint settings
    Config {
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Manage projects
    #[command(subcommand)]
    Projects(ProjectCommand),
    /// List grouped errors (the errors API filters and reports in epoch seconds)
    Errors {
        #[command(flatten)]
        page: PageArgs,
        #[arg(long)]
        error_type: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long, value_name = "ID", help = "Show one error group instead of the list")]
        detail: Option<u64>,
        #[arg(long, help = "Show totals and daily trend instead of the list")]
        stats: bool,
    },
    /// List page load or resource timings
    Performance {
        #[command(flatten)]
        page: PageArgs,
        #[arg(long, help = "List resource timings instead of page loads")]
        resources: bool,
        #[arg(long = "type", value_name = "TYPE")]
        sample_type: Option<String>,
        #[arg(long)]
        resource_type: Option<String>,
        #[arg(long, help = "Show averages and trend instead of the list")]
        stats: bool,
    },
    /// Page views, clicks and visit stats
    Behavior {
        #[command(subcommand)]
        view: BehaviorCommand,
    },
    /// List raw tracked events
    Events {
        #[command(flatten)]
        page: PageArgs,
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long, value_name = "ID")]
        detail: Option<u64>,
        #[arg(long)]
        stats: bool,
        #[arg(long, value_enum)]
        breakdown: Option<BreakdownArg>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum BreakdownArg {
    Browser,
    Os,
    Device,
    ErrorType,
    Performance,
    RequestError,
}

impl From<BreakdownArg> for Breakdown {
    fn from(arg: BreakdownArg) -> Self {
        match arg {
            BreakdownArg::Browser => Breakdown::Browser,
            BreakdownArg::Os => Breakdown::Os,
            BreakdownArg::Device => Breakdown::Device,
            BreakdownArg::ErrorType => Breakdown::ErrorType,
            BreakdownArg::Performance => Breakdown::Performance,
            BreakdownArg::RequestError => Breakdown::RequestError,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    List,
    Show { id: u64 },
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    Update {
        id: u64,
        #[arg(long)]
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    Delete { id: u64 },
    /// Make a project the active one
    Use { id: u64 },
}

#[derive(Subcommand, Debug)]
enum BehaviorCommand {
    Pv {
        #[command(flatten)]
        page: PageArgs,
    },
    Clicks {
        #[command(flatten)]
        page: PageArgs,
    },
    Stats {
        #[arg(long, value_parser = parse_time)]
        start: Option<i64>,
        #[arg(long, value_parser = parse_time)]
        end: Option<i64>,
    },
}

#[derive(Args, Debug, Clone)]
struct PageArgs {
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    page_size: Option<u32>,
    #[arg(long, value_parser = parse_time, help = "Epoch millis or YYYY-MM-DD")]
    start: Option<i64>,
    #[arg(long, value_parser = parse_time, help = "Epoch millis or YYYY-MM-DD")]
    end: Option<i64>,
}

impl PageArgs {
    fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    /// Same bounds in epoch seconds, for the errors endpoints.
    fn in_seconds(&self) -> PageArgs {
        PageArgs {
            start: self.start.map(|ms| ms.div_euclid(1000)),
            end: self.end.map(|ms| ms.div_euclid(1000)),
            ..self.clone()
        }
    }

    /// Everything except the page number.
    fn changes<C>(&self, fields: Vec<C>) -> Vec<FilterChange<C>> {
        let mut changes = Vec::new();
        if let Some(start) = self.start {
            changes.push(FilterChange::StartTime(Some(start)));
        }
        if let Some(end) = self.end {
            changes.push(FilterChange::EndTime(Some(end)));
        }
        changes.extend(fields.into_iter().map(FilterChange::Field));
        if let Some(size) = self.page_size {
            changes.push(FilterChange::PageSize(size));
        }
        changes
    }
}

fn parse_time(raw: &str) -> Result<i64, String> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("expected epoch millis or YYYY-MM-DD, got '{}'", raw))?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or("invalid date")?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.timestamp_millis())
        .ok_or_else(|| format!("'{}' does not exist in the local timezone", raw))
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(command: Command) -> CliResult {
    if let Command::Config { api_url, timeout } = &command {
        return handle_config(api_url.clone(), *timeout);
    }

    let config = Config::load()?;
    let storage = Arc::new(Database::open(&config.database_path())?);
    let transport = Arc::new(HttpTransport::new(&config.api_url, config.timeout)?);
    let navigator = Arc::new(HistoryNavigator::new());
    let dash = Dashboard::new(storage, transport, navigator.clone());

    let reports_expiry = !matches!(
        command,
        Command::Login { .. } | Command::Register { .. } | Command::Logout
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(execute(&dash, command));

    if reports_expiry && navigator.history().contains(&Route::Login) {
        eprintln!("Session expired. Run `tracedash login` to sign in again.");
    }
    result
}

async fn execute(dash: &Dashboard, command: Command) -> CliResult {
    match command {
        Command::Login { username } => handle_login(dash, username).await,
        Command::Register { username, email } => handle_register(dash, &username, &email).await,
        Command::Logout => {
            dash.logout();
            println!("✓ Logged out");
            Ok(())
        }
        Command::Whoami => handle_whoami(dash),
        Command::Config { .. } => Ok(()),
        Command::Projects(cmd) => {
            start(dash).await?;
            handle_projects(dash, cmd).await
        }
        Command::Errors {
            page,
            error_type,
            severity,
            detail,
            stats,
        } => {
            start(dash).await?;
            let monitor = &dash.errors;
            if let Some(id) = detail {
                expect_loaded(monitor.fetch_detail(id).await, monitor.detail().error)?;
                if let Some(detail) = monitor.detail().data {
                    let g = &detail.group;
                    println!("#{} {}: {}", g.id, g.error_type, g.error_message);
                    println!(
                        "  {} occurrences, first {} last {}",
                        g.count,
                        format_secs(g.first_seen),
                        format_secs(g.last_seen)
                    );
                    for e in &detail.events {
                        println!("  {} {} ({}:{})", format_time(e.trigger_time), e.page_url, e.file_path, e.line_number);
                    }
                }
                return Ok(());
            }
            if stats {
                let range = page.in_seconds().range();
                expect_loaded(monitor.fetch_stats(range).await, monitor.stats().error)?;
                if let Some(stats) = monitor.stats().data {
                    let s = &stats.stats;
                    println!("Total errors: {}  affected users: {}", s.total_errors, s.affected_users);
                    println!("Today: {}  yesterday: {}", s.errors_today, s.errors_yesterday);
                    for point in &stats.trend {
                        println!("  {} {}", point.date, point.count);
                    }
                }
                return Ok(());
            }

            let mut fields = Vec::new();
            if error_type.is_some() {
                fields.push(ErrorFilter::ErrorType(error_type));
            }
            if severity.is_some() {
                fields.push(ErrorFilter::Severity(severity));
            }
            list_page::<ErrorGroups>(&monitor.groups, &page.in_seconds(), fields, |g| {
                format!(
                    "#{:<6} {:<8} {:>5}x  {}: {}",
                    g.id, g.severity, g.count, g.error_type, g.error_message
                )
            })
            .await
        }
        Command::Performance {
            page,
            resources,
            sample_type,
            resource_type,
            stats,
        } => {
            start(dash).await?;
            let monitor = &dash.performance;
            if stats {
                expect_loaded(monitor.fetch_stats(page.range()).await, monitor.stats().error)?;
                if let Some(stats) = monitor.stats().data {
                    let s = &stats.stats;
                    println!(
                        "FP {}ms  FCP {}ms  LCP {}ms  FID {}ms  CLS {:.3}  TTFB {}ms",
                        s.avg_fp, s.avg_fcp, s.avg_lcp, s.avg_fid, s.avg_cls, s.avg_ttfb
                    );
                    for point in &stats.trend {
                        println!("  {} fcp {} lcp {} ttfb {}", point.date, point.fcp, point.lcp, point.ttfb);
                    }
                }
                return Ok(());
            }
            if resources {
                let fields = resource_type
                    .map(|t| vec![ResourceFilter::ResourceType(Some(t))])
                    .unwrap_or_default();
                return list_page::<ResourceTimings>(&monitor.resources, &page, fields, |r| {
                    format!("{:>6}ms {:<10} {}", r.duration, r.resource_type, r.resource_url)
                })
                .await;
            }
            let fields = sample_type
                .map(|t| vec![PageFilter::Type(Some(t))])
                .unwrap_or_default();
            list_page::<PageSamples>(&monitor.pages, &page, fields, |p| {
                format!(
                    "{} lcp {:>5}ms ttfb {:>5}ms  {}",
                    format_time(p.trigger_time),
                    p.lcp,
                    p.ttfb,
                    p.page_url
                )
            })
            .await
        }
        Command::Behavior { view } => {
            start(dash).await?;
            let monitor = &dash.behavior;
            match view {
                BehaviorCommand::Pv { page } => {
                    list_page::<PageViews>(&monitor.page_views, &page, Vec::new(), |v| {
                        format!("{} {:>5}s  {}", format_time(v.trigger_time), v.stay_time, v.page_url)
                    })
                    .await
                }
                BehaviorCommand::Clicks { page } => {
                    list_page::<Clicks>(&monitor.clicks, &page, Vec::new(), |c| {
                        format!("{} {} '{}'", format_time(c.trigger_time), c.element_path, c.inner_text)
                    })
                    .await
                }
                BehaviorCommand::Stats { start: from, end } => {
                    let outcome = monitor.fetch_stats(TimeRange::new(from, end)).await;
                    expect_loaded(outcome, monitor.stats().error)?;
                    if let Some(stats) = monitor.stats().data {
                        let pv = &stats.page_views;
                        println!("PV {} (today {})  UV {} (today {})", pv.total_pv, pv.pv_today, pv.total_uv, pv.uv_today);
                        println!("Avg stay {}s  bounce {:.1}%", pv.avg_stay_time, pv.bounce_rate * 100.0);
                        println!("Clicks {} (today {})", stats.clicks.total_clicks, stats.clicks.clicks_today);
                    }
                    Ok(())
                }
            }
        }
        Command::Events {
            page,
            event_type,
            keyword,
            detail,
            stats,
            breakdown,
        } => {
            start(dash).await?;
            let monitor = &dash.events;
            if let Some(id) = detail {
                expect_loaded(monitor.fetch_detail(id).await, monitor.detail().error)?;
                if let Some(detail) = monitor.detail().data {
                    println!("{}", serde_json::to_string_pretty(&detail_json(&detail))?);
                }
                return Ok(());
            }
            if let Some(dimension) = breakdown.map(Breakdown::from) {
                let outcome = monitor.fetch_breakdown(dimension, page.range()).await;
                expect_loaded(outcome, monitor.breakdown(dimension).error)?;
                if let Some(data) = monitor.breakdown(dimension).data {
                    println!("{}", serde_json::to_string_pretty(&data)?);
                }
                return Ok(());
            }
            if stats {
                expect_loaded(monitor.fetch_stats(page.range()).await, monitor.stats().error)?;
                if let Some(data) = monitor.stats().data {
                    println!("{}", serde_json::to_string_pretty(&data)?);
                }
                return Ok(());
            }

            let mut fields = Vec::new();
            if event_type.is_some() {
                fields.push(EventFilter::EventType(event_type));
            }
            if keyword.is_some() {
                fields.push(EventFilter::Keyword(keyword));
            }
            list_page::<Events>(&monitor.list, &page, fields, |e| {
                format!(
                    "{} #{:<6} {:<12} {:<8} {}",
                    format_time(e.trigger_time),
                    e.id,
                    e.event_type,
                    e.device_type,
                    e.page_url
                )
            })
            .await
        }
    }
}

/// Restore the session and project selection for commands that need both.
async fn start(dash: &Dashboard) -> CliResult {
    if !dash.session().is_authenticated() {
        return Err("Not logged in. Run `tracedash login` first.".into());
    }
    dash.start().await?;
    Ok(())
}

async fn list_page<K: ResourceKind>(
    store: &ResourceStore<K>,
    page: &PageArgs,
    fields: Vec<<K::Fields as FilterFields>::Change>,
    line: impl Fn(&K::Item) -> String,
) -> CliResult {
    let changes = page.changes(fields);

    // Filter edits restart at page 1, so an explicit page goes in a second round.
    let outcome = if changes.is_empty() {
        match page.page {
            Some(n) => store.set_filters([FilterChange::Page(n)]).await,
            None => store.fetch().await,
        }
    } else {
        let outcome = store.set_filters(changes).await;
        match page.page {
            Some(n) if outcome.is_loaded() => store.set_filters([FilterChange::Page(n)]).await,
            _ => outcome,
        }
    };
    expect_loaded(outcome, store.error())?;

    let collection = store.snapshot();
    if !collection.has_items() {
        println!("No {} found", K::NAME);
        return Ok(());
    }
    for item in &collection.list {
        println!("{}", line(item));
    }
    println!(
        "Page {}/{} ({} total)",
        collection.filters.page,
        collection.total_pages(),
        collection.total
    );
    Ok(())
}

fn expect_loaded(outcome: FetchOutcome, message: Option<String>) -> CliResult {
    match outcome {
        FetchOutcome::Loaded | FetchOutcome::Superseded => Ok(()),
        FetchOutcome::Failed(err) => Err(message.unwrap_or_else(|| err.to_string()).into()),
        FetchOutcome::NoProject => {
            Err("No project selected. Create one or run `tracedash projects use <id>`.".into())
        }
    }
}

async fn handle_login(dash: &Dashboard, username: Option<String>) -> CliResult {
    let username = match username {
        Some(u) => u,
        None => prompt("Username: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    match dash.auth.login(&username, &password).await {
        Ok(user) => {
            println!("✓ Logged in as {}", user.username);
            Ok(())
        }
        Err(_) => Err(dash.auth.error().unwrap_or_default().into()),
    }
}

async fn handle_register(dash: &Dashboard, username: &str, email: &str) -> CliResult {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        return Err("Passwords do not match".into());
    }

    match dash.auth.register(username, &password, email).await {
        Ok(()) => {
            println!("✓ Registered {}. Run `tracedash login` to sign in.", username);
            Ok(())
        }
        Err(_) => Err(dash.auth.error().unwrap_or_default().into()),
    }
}

fn handle_whoami(dash: &Dashboard) -> CliResult {
    dash.auth.load_user();
    let session = dash.session().snapshot();
    if session.token.is_none() {
        println!("Not logged in");
        return Ok(());
    }
    match session.user {
        Some(user) => println!("{} <{}> (id {})", user.username, user.email, user.id),
        None => println!("Logged in (user details not cached)"),
    }
    Ok(())
}

fn handle_config(api_url: Option<String>, timeout: Option<u64>) -> CliResult {
    let path = config::config_path();
    if api_url.is_some() || timeout.is_some() {
        config::save_config(
            &path,
            &ConfigFile {
                api_url,
                timeout_secs: timeout,
            },
        )?;
        println!("✓ Saved {}", path.display());
    }

    let config = Config::load()?;
    println!("API URL:  {}", config.api_url);
    println!("Timeout:  {}s", config.timeout.as_secs());
    println!("Data dir: {}", config.data_dir.display());
    Ok(())
}

async fn handle_projects(dash: &Dashboard, cmd: ProjectCommand) -> CliResult {
    let projects = &dash.projects;
    match cmd {
        ProjectCommand::List => {
            let current = projects.current_project().map(|p| p.id);
            if !projects.has_projects() {
                if let Some(message) = projects.error() {
                    return Err(message.into());
                }
                println!("No projects yet. Create one with `tracedash projects create <name>`.");
                return Ok(());
            }
            for p in projects.projects() {
                let marker = if Some(p.id) == current { "*" } else { " " };
                println!("{} {:<6} {:<24} {}", marker, p.id, p.name, p.description);
            }
        }
        ProjectCommand::Show { id } => {
            let p = projects
                .fetch_project(id)
                .await
                .map_err(|_| projects.error().unwrap_or_default())?;
            println!("#{} {}", p.id, p.name);
            if !p.description.is_empty() {
                println!("  {}", p.description);
            }
            if !p.app_key.is_empty() {
                println!("  app key: {}", p.app_key);
            }
        }
        ProjectCommand::Create { name, description } => {
            let p = projects
                .create_project(&name, &description)
                .await
                .map_err(|_| projects.error().unwrap_or_default())?;
            println!("✓ Created project #{} {}", p.id, p.name);
        }
        ProjectCommand::Update {
            id,
            name,
            description,
        } => {
            let p = projects
                .update_project(id, &name, &description)
                .await
                .map_err(|_| projects.error().unwrap_or_default())?;
            println!("✓ Updated project #{} {}", p.id, p.name);
        }
        ProjectCommand::Delete { id } => {
            projects
                .delete_project(id)
                .await
                .map_err(|_| projects.error().unwrap_or_default())?;
            println!("✓ Deleted project #{}", id);
            match projects.current_project() {
                Some(p) => println!("Active project: #{} {}", p.id, p.name),
                None => println!("No active project"),
            }
        }
        ProjectCommand::Use { id } => {
            let p = projects
                .projects()
                .into_iter()
                .find(|p| p.id == id)
                .ok_or_else(|| format!("No project with id {}", id))?;
            projects.set_current_project(p.clone());
            println!("✓ Active project is now #{} {}", p.id, p.name);
        }
    }
    Ok(())
}

fn detail_json(detail: &tracedash::models::EventDetail) -> serde_json::Value {
    let sections = [
        ("event", &detail.event),
        ("errorEvent", &detail.error_event),
        ("performance", &detail.performance),
        ("request", &detail.request),
        ("route", &detail.route),
        ("click", &detail.click),
        ("exposure", &detail.exposure),
    ];
    sections
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|v| (name.to_string(), v)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn format_time(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_secs(secs: i64) -> String {
    format_time(secs.saturating_mul(1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_args(start: Option<&str>, end: Option<&str>) -> PageArgs {
        PageArgs {
            page: Some(2),
            page_size: None,
            start: start.map(|s| parse_time(s).unwrap()),
            end: end.map(|s| parse_time(s).unwrap()),
        }
    }

    #[test]
    fn error_timestamps_are_read_as_seconds() {
        let secs = 1_714_521_600;
        assert!(format_secs(secs).starts_with("2024-"));
        assert_eq!(format_secs(secs), format_time(secs * 1000));
        assert_eq!(format_secs(i64::MAX), "-");
    }

    #[test]
    fn error_filters_are_sent_as_seconds() {
        let args = page_args(Some("2024-05-01"), Some("1714608000999")).in_seconds();

        let midnight = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let expected = Local.from_local_datetime(&midnight).earliest().unwrap().timestamp();
        assert_eq!(args.start, Some(expected));
        assert_eq!(args.end, Some(1_714_608_000));
        assert_eq!(args.page, Some(2));
        assert_eq!(args.range(), TimeRange::new(Some(expected), Some(1_714_608_000)));
    }

    #[test]
    fn other_filters_stay_in_millis() {
        let args = page_args(Some("1714521600000"), None);
        assert_eq!(args.range(), TimeRange::new(Some(1_714_521_600_000), None));
    }

    #[test]
    fn breakdown_names_map_onto_dimensions() {
        let arg = BreakdownArg::from_str("request-error", false).unwrap();
        assert_eq!(Breakdown::from(arg), Breakdown::RequestError);
        assert_eq!(
            Breakdown::from(BreakdownArg::from_str("os", false).unwrap()),
            Breakdown::Os
        );
    }
}
