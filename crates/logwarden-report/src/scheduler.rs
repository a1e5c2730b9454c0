use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logwarden_backends::{AnalysisStore, Attachment, MailMessage, MailTransport};
use logwarden_types::ReportSchedule;

use crate::error::Result;
use crate::ledger::SendLedger;
use crate::render::{render_html, subject};
use crate::report::ReportGenerator;
use crate::schedule::{is_due, next_fire_after};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Sender address
    pub from: String,

    /// Where each sent report is archived
    pub reports_dir: PathBuf,

    pub watchdog_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            from: "logwarden@localhost".to_string(),
            reports_dir: PathBuf::from("reports"),
            watchdog_interval: Duration::from_secs(60),
        }
    }
}

/// Result of one check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// No schedule, or no recipient
    NoSchedule,
    /// Inside the refractory window of the last send
    RecentlySent,
    /// Not the configured time or day
    NotDue,
    Sent {
        message_id: String,
        report_path: PathBuf,
    },
}

/// A cancelled timer stops at its next wait; a check already in flight
/// runs to completion so its send is recorded.
struct CronTimer {
    schedule: ReportSchedule,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Timer handles owned by one scheduler
#[derive(Default)]
pub struct SchedulerState {
    cron: Option<CronTimer>,
    watchdog: Option<(CancellationToken, JoinHandle<()>)>,
}

/// Sends the scheduled report from two triggers: a cron timer derived from
/// the schedule and a fixed watchdog poll. Both go through
/// [`Scheduler::check_and_send`], which is safe to race.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn AnalysisStore>,
    generator: ReportGenerator,
    transport: Arc<dyn MailTransport>,
    ledger: Arc<SendLedger>,
    config: SchedulerConfig,
    state: Arc<Mutex<SchedulerState>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        transport: Arc<dyn MailTransport>,
        ledger: Arc<SendLedger>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            generator: ReportGenerator::new(Arc::clone(&store)),
            store,
            transport,
            ledger,
            config,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Start the watchdog and, if a schedule exists, the cron timer
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.watchdog.is_none() {
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(self.clone().watchdog_loop(cancel.clone()));
                state.watchdog = Some((cancel, handle));
                info!(
                    interval_secs = self.config.watchdog_interval.as_secs(),
                    "report watchdog started"
                );
            }
        }

        match self.store.get_schedule().await? {
            Some(schedule) => self.reschedule(schedule).await,
            None => info!("no report schedule configured; watchdog only"),
        }
        Ok(())
    }

    /// Replace the cron timer for a new schedule, then run one check.
    /// The watchdog is left running.
    pub async fn reschedule(&self, schedule: ReportSchedule) {
        {
            let mut state = self.state.lock().await;
            if let Some(old) = state.cron.take() {
                debug!(frequency = %old.schedule.frequency, "cancelling previous cron timer");
                old.cancel.cancel();
            }

            if !schedule.has_recipient() {
                info!("report schedule has no recipient; cron timer not installed");
                return;
            }

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(self.clone().cron_loop(schedule.clone(), cancel.clone()));
            info!(
                frequency = %schedule.frequency,
                at = %schedule.time_of_day,
                "cron timer installed"
            );
            state.cron = Some(CronTimer {
                schedule,
                cancel,
                handle,
            });
        }

        self.run_check("reschedule").await;
    }

    /// Persist a new schedule and reschedule around it
    pub async fn update_schedule(&self, schedule: ReportSchedule) -> Result<()> {
        self.store.upsert_schedule(schedule.clone()).await?;
        self.reschedule(schedule).await;
        Ok(())
    }

    /// Schedule the cron timer is currently installed for
    pub async fn active_schedule(&self) -> Option<ReportSchedule> {
        self.state
            .lock()
            .await
            .cron
            .as_ref()
            .map(|cron| cron.schedule.clone())
    }

    /// Stop both triggers, waiting for any check in flight
    pub async fn stop(&self) {
        let (cron, watchdog) = {
            let mut state = self.state.lock().await;
            (state.cron.take(), state.watchdog.take())
        };
        let mut handles = Vec::new();
        if let Some(cron) = cron {
            cron.cancel.cancel();
            handles.push(cron.handle);
        }
        if let Some((cancel, handle)) = watchdog {
            cancel.cancel();
            handles.push(handle);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "report timer task failed");
            }
        }
    }

    pub async fn check_and_send(&self, force: bool) -> Result<SendOutcome> {
        self.check_and_send_at(Local::now(), force).await
    }

    /// Send the report if it is due at `now`.
    ///
    /// `force` skips the time and day match but never the refractory window.
    /// The ledger lock for the frequency is held throughout, and the send is
    /// only recorded once the transport accepted it.
    pub async fn check_and_send_at(&self, now: DateTime<Local>, force: bool) -> Result<SendOutcome> {
        let Some(schedule) = self.store.get_schedule().await? else {
            return Ok(SendOutcome::NoSchedule);
        };
        if !schedule.has_recipient() {
            return Ok(SendOutcome::NoSchedule);
        }

        let frequency = schedule.frequency;
        let now_utc = now.with_timezone(&Utc);
        let guard = self.ledger.lock(frequency).await?;

        if guard.is_refractory(now_utc).await {
            debug!(%frequency, "report sent recently; skipping");
            return Ok(SendOutcome::RecentlySent);
        }
        if !force && !is_due(frequency, schedule.time_of_day, &now) {
            return Ok(SendOutcome::NotDue);
        }

        info!(%frequency, to = %schedule.email, force, "sending scheduled report");
        let report = self
            .generator
            .generate(frequency, schedule.samples_per_module, &now)
            .await?;
        let html = render_html(&report, now_utc);

        let filename = format!("report_{}_{}.html", frequency, now.format("%Y-%m-%dT%H-%M-%S"));
        tokio::fs::create_dir_all(&self.config.reports_dir).await?;
        let report_path = self.config.reports_dir.join(&filename);
        tokio::fs::write(&report_path, &html).await?;
        debug!(path = %report_path.display(), "report archived");

        self.transport.verify().await?;
        let message = MailMessage {
            from: self.config.from.clone(),
            to: schedule.email.clone(),
            subject: subject(frequency, &now),
            html: html.clone(),
            attachments: vec![Attachment {
                filename,
                content: html,
                content_type: "text/html".to_string(),
            }],
        };
        let message_id = self.transport.send(&message).await?;

        guard.record(now_utc).await?;
        info!(%frequency, %message_id, total = report.total(), "scheduled report sent");

        Ok(SendOutcome::Sent {
            message_id,
            report_path,
        })
    }

    async fn run_check(&self, trigger: &'static str) {
        match self.check_and_send(false).await {
            Ok(SendOutcome::Sent { message_id, .. }) => {
                debug!(trigger, %message_id, "report check sent mail")
            }
            Ok(outcome) => debug!(trigger, ?outcome, "report check finished"),
            Err(e) => warn!(trigger, error = %e, "report check failed; will retry on next trigger"),
        }
    }

    async fn cron_loop(self, schedule: ReportSchedule, cancel: CancellationToken) {
        loop {
            let now = Local::now();
            let Some(next) = next_fire_after(schedule.frequency, schedule.time_of_day, &now) else {
                warn!(frequency = %schedule.frequency, "no upcoming fire time; cron timer stopped");
                return;
            };
            let wait = next.signed_duration_since(now).to_std().unwrap_or_default();
            debug!(next = %next, "cron timer armed");

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            self.run_check("cron").await;
        }
    }

    async fn watchdog_loop(self, cancel: CancellationToken) {
        let period = self.config.watchdog_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.watchdog_tick().await,
            }
        }
    }

    /// Pick up schedule changes made by another process, then check
    async fn watchdog_tick(&self) {
        match self.store.get_schedule().await {
            Ok(Some(schedule)) if self.schedule_changed(&schedule).await => {
                info!(frequency = %schedule.frequency, "report schedule changed; rescheduling");
                // Runs its own check
                self.reschedule(schedule).await;
            }
            Ok(_) => self.run_check("watchdog").await,
            Err(e) => warn!(error = %e, "failed to read report schedule"),
        }
    }

    async fn schedule_changed(&self, schedule: &ReportSchedule) -> bool {
        match self.active_schedule().await {
            Some(active) => active != *schedule,
            None => schedule.has_recipient(),
        }
    }
}
