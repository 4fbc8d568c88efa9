use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use affirm_core::error::{Field, SchedulerError};
use affirm_core::local::LocalTransport;
use affirm_core::record::{NotificationRecord, NotificationStatus};
use affirm_core::scheduler::{CancelOutcome, SchedulerOp, SchedulerOutcome};
use affirm_core::storage::{FileStore, KeyValueStore};
use affirm_core::subscription::NotificationSubscription;
use affirm_core::validation::{Submission, ValidationRules};
use affirm_core::SchedulerState;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Local};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) rules: ValidationRules,
    pub(crate) timezone: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("AFFIRM_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir.trim());
            }
        }
        if let Some(flag) = lookup("AFFIRM_LEGACY_VALIDATION") {
            if matches!(flag.trim(), "1" | "true" | "yes") {
                config.rules = ValidationRules::legacy();
            }
        }
        if let Some(value) = lookup("AFFIRM_MIN_TITLE_LEN") {
            match value.trim().parse::<usize>() {
                Ok(len) => config.rules.min_title_len = len,
                Err(err) => warn!(%value, %err, "ignoring AFFIRM_MIN_TITLE_LEN"),
            }
        }
        if let Some(value) = lookup("AFFIRM_MIN_BODY_LEN") {
            match value.trim().parse::<usize>() {
                Ok(len) => config.rules.min_body_len = len,
                Err(err) => warn!(%value, %err, "ignoring AFFIRM_MIN_BODY_LEN"),
            }
        }
        if let Some(tz) = lookup("AFFIRM_TIMEZONE") {
            if !tz.trim().is_empty() {
                config.timezone = Some(tz.trim().to_string());
            }
        }
        config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("affirm-data"),
            rules: ValidationRules::default(),
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        in_minutes: i64,
        title: String,
        body: String,
    },
    Cancel(String),
    List,
    History,
    Sync,
    Tick,
    ClearHistory,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let command = match verb.to_ascii_lowercase().as_str() {
            "add" => {
                let (minutes, text) = rest
                    .split_once(' ')
                    .ok_or_else(|| anyhow!("usage: add <minutes> <title> | <message>"))?;
                let in_minutes: i64 = minutes
                    .parse()
                    .with_context(|| format!("`{minutes}` is not a number of minutes"))?;
                let (title, body) = text
                    .split_once('|')
                    .ok_or_else(|| anyhow!("separate title and message with `|`"))?;
                Command::Add {
                    in_minutes,
                    title: title.trim().to_string(),
                    body: body.trim().to_string(),
                }
            }
            "cancel" if !rest.is_empty() => Command::Cancel(rest.to_string()),
            "cancel" => bail!("usage: cancel <identifier>"),
            "list" | "ls" => Command::List,
            "history" => Command::History,
            "sync" => Command::Sync,
            "tick" => Command::Tick,
            "clear" => Command::ClearHistory,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command `{other}`; try `help`"),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Composition root: owns the scheduler state and the delivery subscription.
pub struct AppController {
    state: SchedulerState,
    transport: Arc<LocalTransport>,
    subscription: NotificationSubscription,
}

impl AppController {
    pub fn new(config: &AppConfig) -> Result<Self> {
        info!(data_dir = %config.data_dir.display(), "initializing controller");
        let store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::open(&config.data_dir)
                .with_context(|| format!("unable to open {}", config.data_dir.display()))?,
        );
        let transport = Arc::new(
            LocalTransport::open(store.clone()).context("failed to restore local notifications")?,
        );
        let mut builder = SchedulerState::builder(transport.clone(), store)
            .with_rules(config.rules);
        if let Some(tz) = &config.timezone {
            builder = builder.with_timezone(tz.clone());
        }
        let state = builder
            .build()
            .context("failed to load notification state")?;
        let mut subscription = state.subscription();
        subscription.start();

        let mut controller = Self {
            state,
            transport,
            subscription,
        };
        controller.foreground();
        Ok(controller)
    }

    fn foreground(&mut self) {
        let start = Instant::now();
        match self.state.reconcile() {
            Ok(report) => info!(
                fired = report.fired.len(),
                adopted = report.adopted.len(),
                elapsed_ms = %start.elapsed().as_millis(),
                "foreground reconcile completed"
            ),
            Err(err) => warn!(%err, "foreground reconcile failed"),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn handle(&mut self, command: Command, out: &mut impl Write) -> Result<Flow> {
        debug!(?command, "handling command");
        let op = match command {
            Command::Add {
                in_minutes,
                title,
                body,
            } => {
                let Some(trigger_at) = Duration::try_minutes(in_minutes)
                    .and_then(|offset| self.state.now().checked_add_signed(offset))
                else {
                    writeln!(out, "{}: {in_minutes} minutes is out of range", Field::TriggerAt)?;
                    return Ok(Flow::Continue);
                };
                SchedulerOp::Submit(Submission::new(title, body, trigger_at))
            }
            Command::Cancel(identifier) => SchedulerOp::Cancel { identifier },
            Command::Sync => SchedulerOp::Reconcile,
            Command::ClearHistory => SchedulerOp::ClearHistory,
            Command::Tick => {
                let delivered = self.transport.deliver_due(self.state.now());
                if let Err(err) = self.state.drain_events(&self.subscription) {
                    warn!(%err, "delivery bookkeeping incomplete");
                    writeln!(out, "warning: {err}")?;
                }
                writeln!(out, "{} notification(s) delivered", delivered.len())?;
                return Ok(Flow::Continue);
            }
            Command::List => {
                write_records(out, "Scheduled", self.state.pending())?;
                return Ok(Flow::Continue);
            }
            Command::History => {
                write_records(out, "History", self.state.history())?;
                return Ok(Flow::Continue);
            }
            Command::Help => {
                writeln!(out, "{HELP}")?;
                return Ok(Flow::Continue);
            }
            Command::Quit => return Ok(Flow::Quit),
        };

        match self.state.apply(op) {
            Ok(outcome) => writeln!(out, "{}", describe_outcome(&outcome))?,
            Err(SchedulerError::Validation(errors)) => {
                for error in errors.errors() {
                    writeln!(out, "{}: {}", error.field, error.message)?;
                }
            }
            Err(err) => {
                warn!(%err, "operation failed");
                writeln!(out, "error: {err}")?;
            }
        }
        Ok(Flow::Continue)
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.subscription.stop();
        self.state
            .flush()
            .context("failed to save notification state")?;
        info!("controller shut down");
        Ok(())
    }
}

const HELP: &str = "commands:
  add <minutes> <title> | <message>   schedule an affirmation
  cancel <identifier>                 cancel a scheduled affirmation
  list                                show scheduled affirmations
  history                             show fired and cancelled affirmations
  sync                                reconcile with the notification service
  tick                                deliver notifications that are due
  clear                               clear history
  quit";

fn describe_outcome(outcome: &SchedulerOutcome) -> String {
    match outcome {
        SchedulerOutcome::Submitted { identifier } => format!("scheduled {identifier}"),
        SchedulerOutcome::Cancelled {
            identifier,
            outcome,
        } => match outcome {
            CancelOutcome::Cancelled => format!("cancelled {identifier}"),
            CancelOutcome::SoftFailed => {
                format!("cancelled {identifier} (already gone from the notification service)")
            }
            CancelOutcome::AlreadyArchived => format!("{identifier} is already in history"),
        },
        SchedulerOutcome::Reconciled(report) => format!(
            "synced: {} fired, {} adopted",
            report.fired.len(),
            report.adopted.len()
        ),
        SchedulerOutcome::Delivered {
            identifier,
            archived,
        } => {
            if *archived {
                format!("{identifier} fired")
            } else {
                format!("{identifier} was not pending")
            }
        }
        SchedulerOutcome::HistoryCleared { removed } => format!("removed {removed} record(s)"),
    }
}

fn write_records(out: &mut impl Write, heading: &str, records: &[NotificationRecord]) -> Result<()> {
    writeln!(out, "{heading} ({})", records.len())?;
    for record in records {
        let when = record.display_time().with_timezone(&Local);
        let marker = match record.status {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Fired => "fired",
            NotificationStatus::Cancelled => "cancelled",
        };
        writeln!(
            out,
            "  {}  {:<9} {}  {}: {}",
            when.format("%Y-%m-%d %H:%M"),
            marker,
            record.identifier,
            record.title,
            record.body
        )?;
    }
    Ok(())
}

pub fn run(config: AppConfig) -> Result<()> {
    let mut controller = AppController::new(&config)?;
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    writeln!(stdout, "type `help` for commands")?;
    for line in stdin.lock().lines() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let flow = match line.parse::<Command>() {
            Ok(command) => controller.handle(command, &mut stdout)?,
            Err(err) => {
                writeln!(stdout, "{err}")?;
                Flow::Continue
            }
        };
        stdout.flush()?;
        if flow == Flow::Quit {
            break;
        }
    }
    controller.shutdown()
}
