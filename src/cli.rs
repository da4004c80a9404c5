//! CLI commands driving one simulated browser tab.
//!
//! The durable store is the SQLite profile from the configuration; the
//! per-tab store lives for a single invocation, so every command starts a
//! fresh tab session.

use chrono::{Duration, Utc};
use clap::{Args, Subcommand};

use crate::bootstrap::PageLoader;
use crate::capture::{AnswerMode, CaptureDriver, CaptureSession, Dispatch};
use crate::page::PageContext;
use crate::progress::{InitOutcome, MarkOutcome};
use crate::session_sync::SessionSyncClient;
use crate::stats::{load_chart, ChartView};
use crate::store::Stored;

/// Page values normally injected by the rendering page.
#[derive(Args, Debug, Clone, Default)]
pub struct PageArgs {
    /// Address of the current page (query carries expe/iteration/begin)
    #[arg(long, default_value = "/")]
    pub url: String,

    /// The experiment has begun
    #[arg(long)]
    pub begin: bool,

    /// The experiment has ended
    #[arg(long)]
    pub end: bool,

    /// Quit destination
    #[arg(long, default_value = "/")]
    pub base_url: String,

    /// Next-trial destination
    #[arg(long, default_value = "/expe")]
    pub expe_url: String,

    /// Current experiment name
    #[arg(long)]
    pub expe_name: Option<String>,

    /// Server-rendered user id
    #[arg(long)]
    pub current_id: Option<String>,

    /// Known experiments as (possibly HTML-escaped) JSON list
    #[arg(long)]
    pub expes: Option<String>,
}

impl PageArgs {
    fn into_context(self) -> Result<PageContext, String> {
        let mut page = PageContext::new(self.url)
            .with_begin(self.begin)
            .with_end(self.end)
            .with_base_url(self.base_url)
            .with_expe_url(self.expe_url);

        if let Some(name) = self.expe_name {
            page = page.with_expe_name(name);
        }
        if let Some(id) = self.current_id {
            page = page.with_current_id(id);
        }
        if let Some(expes) = self.expes {
            page = page.with_escaped_expes(&expes).map_err(|e| e.to_string())?;
        }
        Ok(page)
    }
}

/// Session client subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Make sure this profile has an identity synced with the server
    EnsureIdentity,

    /// Create the progress record for the given experiments
    InitProgress {
        /// Experiment names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Mark an experiment as done
    MarkDone {
        /// Experiment name
        name: String,
    },

    /// Show the stored progress record
    Progress,

    /// Show the statistics chart model of an experiment
    Stats {
        /// Experiment slug
        slug: String,
    },

    /// Run every synchronization step of a page load
    PageLoad {
        #[allow(missing_docs)]
        #[command(flatten)]
        page: PageArgs,
    },

    /// Feed one key press to the capture of a page
    Key {
        /// Key code (13 enter, 37 left, 39 right, 81 q)
        code: u32,

        /// Milliseconds between stimulus onset and the key press
        #[arg(long, default_value = "0")]
        elapsed_ms: i64,

        /// Submit the quest form instead of navigating
        #[arg(long)]
        form: bool,

        #[allow(missing_docs)]
        #[command(flatten)]
        page: PageArgs,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(
    command: Commands,
    loader: &PageLoader,
    client: &SessionSyncClient,
) -> CliResult {
    match command {
        Commands::EnsureIdentity => execute_ensure_identity(loader).await,
        Commands::InitProgress { names } => execute_init_progress(loader, names).await,
        Commands::MarkDone { name } => execute_mark_done(loader, &name).await,
        Commands::Progress => execute_progress(loader).await,
        Commands::Stats { slug } => execute_stats(client, &slug).await,
        Commands::PageLoad { page } => execute_page_load(loader, page).await,
        Commands::Key {
            code,
            elapsed_ms,
            form,
            page,
        } => execute_key(client, code, elapsed_ms, form, page).await,
    }
}

async fn execute_ensure_identity(loader: &PageLoader) -> CliResult {
    match loader.identity().ensure_identity(loader.identity_kind()).await {
        Ok(outcome) => CliResult::success(format!(
            "{} identity: {} (first visit: {})",
            loader.identity_kind(),
            outcome.id(),
            outcome.is_first_visit()
        )),
        Err(e) => CliResult::error(format!("Identity sync failed: {}", e)),
    }
}

async fn execute_init_progress(loader: &PageLoader, names: Vec<String>) -> CliResult {
    let identity = match loader.identity().ensure_identity(loader.identity_kind()).await {
        Ok(outcome) => outcome,
        Err(e) => return CliResult::error(format!("Identity sync failed: {}", e)),
    };

    match loader.progress().initialize_progress(&names, &identity).await {
        Ok(InitOutcome::Initialized(record)) => {
            CliResult::success(format!("Progress initialized for {} experiments", record.len()))
        }
        Ok(InitOutcome::Merged { added }) => {
            CliResult::success(format!("Progress extended with: {}", added.join(", ")))
        }
        Ok(InitOutcome::Unchanged) => CliResult::success("Progress already up to date"),
        Ok(InitOutcome::Skipped(reason)) => {
            CliResult::success(format!("Progress not initialized ({:?})", reason))
        }
        Err(e) => CliResult::error(format!("Progress initialization failed: {}", e)),
    }
}

async fn execute_mark_done(loader: &PageLoader, name: &str) -> CliResult {
    match loader.progress().mark_done(name).await {
        Ok(MarkOutcome::Marked { already_done }) => CliResult::success(format!(
            "{} marked done{}",
            name,
            if already_done { " (already done)" } else { "" }
        )),
        Ok(MarkOutcome::Skipped(reason)) => {
            CliResult::error(format!("{} not marked ({:?})", name, reason))
        }
        Err(e) => CliResult::error(format!("Failed to mark {}: {}", name, e)),
    }
}

async fn execute_progress(loader: &PageLoader) -> CliResult {
    match loader.progress().load().await {
        Ok(Stored::Present(record)) => {
            let mut output = String::from("\nExperiment Progress\n");
            for (name, state) in &record {
                output.push_str(&format!(
                    "  {:<30} {}\n",
                    name,
                    if state.done { "done" } else { "pending" }
                ));
            }
            CliResult::success(output)
        }
        Ok(Stored::Absent) => CliResult::success("No progress record"),
        Ok(Stored::Malformed { raw, reason }) => {
            CliResult::error(format!("Progress record is malformed ({}): {}", reason, raw))
        }
        Err(e) => CliResult::error(format!("Failed to read progress: {}", e)),
    }
}

async fn execute_stats(client: &SessionSyncClient, slug: &str) -> CliResult {
    match load_chart(client, slug).await {
        Ok(ChartView::Empty { message }) => CliResult::success(message),
        Ok(ChartView::Doughnut { segments }) => {
            let mut output = format!("\nSessions for {}\n", slug);
            for segment in &segments {
                output.push_str(&format!(
                    "  {:<30} {:>6}  {}\n",
                    segment.label, segment.count, segment.background_color
                ));
            }
            CliResult::success(output)
        }
        Err(e) => CliResult::error(format!("Failed to load stats: {}", e)),
    }
}

async fn execute_page_load(loader: &PageLoader, page: PageArgs) -> CliResult {
    let page = match page.into_context() {
        Ok(page) => page,
        Err(e) => return CliResult::error(e),
    };

    match loader.on_page_load(&page).await {
        Ok(report) => {
            let mut output = format!(
                "identity: {} (first visit: {})\n",
                report.identity.id(),
                report.identity.is_first_visit()
            );
            if report.adopted_current_id {
                output.push_str("adopted server-rendered user id\n");
            }
            if let Some(progress) = &report.progress {
                output.push_str(&format!("progress: {:?}\n", progress));
            }
            if let Some(completion) = &report.completion {
                output.push_str(&format!("completion: {:?}\n", completion));
            }
            if report.errors.is_empty() {
                CliResult::success(output)
            } else {
                output.push_str(&format!("errors:\n  {}\n", report.errors.join("\n  ")));
                CliResult::error(output)
            }
        }
        Err(e) => CliResult::error(format!("Page load failed: {}", e)),
    }
}

async fn execute_key(
    client: &SessionSyncClient,
    code: u32,
    elapsed_ms: i64,
    form: bool,
    page: PageArgs,
) -> CliResult {
    let page = match page.into_context() {
        Ok(page) => page,
        Err(e) => return CliResult::error(e),
    };
    let mode = if form {
        AnswerMode::Form
    } else {
        AnswerMode::Navigate
    };

    let onset = Utc::now();
    let mut session = CaptureSession::new(page, mode);
    session.stimulus_visible(onset);
    let pressed_at = onset
        .checked_add_signed(Duration::milliseconds(elapsed_ms))
        .unwrap_or(onset);
    let action = session.handle_key(code, pressed_at);

    match CaptureDriver::new(client.clone()).dispatch(action).await {
        Ok(Dispatch::Navigate(url)) => CliResult::success(format!("navigate: {}", url)),
        Ok(Dispatch::Submit(form)) => {
            let fields: Vec<String> = form
                .fields()
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            CliResult::success(format!("submit: {}", fields.join("&")))
        }
        Ok(Dispatch::Nothing) => CliResult::success("ignored"),
        Err(e) => CliResult::error(format!("Answer not registered: {}", e)),
    }
}
