//! Nightly job that finds members with an upcoming birthday or half
//! birthday and fans out personalized push notification payloads to the
//! other active members.
//!
//! The matcher itself is a stateless batch procedure: it takes "today" as an
//! explicit input and de-duplicates within a single run only. Re-running the
//! job on the same day re-sends the same notifications.

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Days, Months, NaiveDate, Utc};
use db::{
    DBService,
    models::{
        member::{Member, MemberStatus},
        notification_rule::{NotificationRule, RuleTrigger},
    },
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use url::form_urlencoded;

use super::message_writer::MessageWriter;

#[derive(Debug, Error)]
pub enum EventNotificationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Kind of event matched for a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display)]
pub enum EventKind {
    #[strum(serialize = "Birthday")]
    #[serde(rename = "Birthday")]
    Birthday,
    #[strum(serialize = "Half Birthday")]
    #[serde(rename = "Half Birthday")]
    HalfBirthday,
}

/// Assembled notification, handed to the delivery collaborator as-is
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct NotificationPayload {
    pub recipient_id: String,
    pub recipient_push_token: Option<String>,
    pub title: String,
    pub body: String,
    pub deep_link_url: String,
}

/// Delivery collaborator. Transport (queueing, FCM) lives outside this
/// crate; delivery success or failure is not observed here.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, payload: NotificationPayload);
}

/// Logs the payload where a real deployment would enqueue it
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, payload: NotificationPayload) {
        match serde_json::to_string(&payload) {
            Ok(json) => info!(payload = %json, "push notification payload queued"),
            Err(e) => warn!(error = %e, "failed to serialize notification payload"),
        }
    }
}

/// Connectivity between two members. The production relationship graph is
/// external; [`FullyConnected`] treats every pair of active members as
/// connected and is supplied only at the integration point.
pub trait ConnectionGraph: Send + Sync {
    fn are_connected(&self, recipient: &Member, event_person: &Member) -> bool;
}

pub struct FullyConnected;

impl ConnectionGraph for FullyConnected {
    fn are_connected(&self, _recipient: &Member, _event_person: &Member) -> bool {
        true
    }
}

/// Counters for one matcher run. Individual per-pair failures surface only
/// through logs; this is for the trigger route and the scheduler's log line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct EventNotificationRunSummary {
    pub rules_checked: usize,
    pub events_matched: usize,
    pub notifications_dispatched: usize,
    pub generation_failures: usize,
    pub duplicates_skipped: usize,
}

/// One pass of the event notification matcher
pub struct EventNotificationJob {
    writer: Arc<dyn MessageWriter>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    graph: Arc<dyn ConnectionGraph>,
    generation_timeout: Duration,
}

impl EventNotificationJob {
    pub fn new(
        writer: Arc<dyn MessageWriter>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        graph: Arc<dyn ConnectionGraph>,
    ) -> Self {
        Self {
            writer,
            dispatcher,
            graph,
            generation_timeout: Duration::from_secs(30),
        }
    }

    /// Run the matcher for `today` against the given roster and rules.
    ///
    /// Only active members and enabled all-users birthday rules take part.
    /// A failed or timed-out generation skips that (event, recipient) pair
    /// and the run continues; nothing here aborts the batch.
    pub async fn run(
        &self,
        today: NaiveDate,
        members: &[Member],
        rules: &[NotificationRule],
    ) -> EventNotificationRunSummary {
        let mut summary = EventNotificationRunSummary::default();

        let active: Vec<&Member> = members
            .iter()
            .filter(|m| m.status == MemberStatus::Active)
            .collect();

        // Dedup is run-scoped: (recipient, event person, rule, event kind)
        let mut sent: HashSet<String> = HashSet::new();

        for rule in rules {
            if rule.trigger != RuleTrigger::UpcomingBirthday {
                debug!(rule = %rule.name, trigger = %rule.trigger, "skipping non-birthday rule");
                continue;
            }
            if !rule.applies_to_all() {
                // Group-scoped targeting is resolved outside this job
                debug!(rule = %rule.name, target = %rule.target, "skipping group-scoped rule");
                continue;
            }
            let Some(days_ahead) = rule.timing_days() else {
                warn!(rule = %rule.name, timing = %rule.timing, "unparseable rule timing, skipping");
                continue;
            };
            let Some(target_date) = today.checked_add_days(Days::new(days_ahead as u64)) else {
                warn!(rule = %rule.name, days_ahead, "target date out of range, skipping");
                continue;
            };
            let target_mmdd = target_date.format("%m-%d").to_string();
            let half_birthday_mmdd = target_date
                .checked_sub_months(Months::new(6))
                .map(|d| d.format("%m-%d").to_string());

            summary.rules_checked += 1;
            debug!(rule = %rule.name, target_date = %target_date, "checking for events");

            for event_person in &active {
                // Birthdates are stored as YYYY-MM-DD; match on MM-DD
                let Some(birth_mmdd) = event_person.birthdate.as_deref().and_then(|b| b.get(5..))
                else {
                    continue;
                };

                let event = if birth_mmdd == target_mmdd {
                    EventKind::Birthday
                } else if half_birthday_mmdd.as_deref() == Some(birth_mmdd) {
                    EventKind::HalfBirthday
                } else {
                    continue;
                };

                summary.events_matched += 1;
                info!(
                    member = %event_person.phone,
                    event = %event,
                    days_ahead,
                    "matched upcoming event"
                );

                let event_label = event.to_string();

                for recipient in &active {
                    if recipient.phone == event_person.phone {
                        continue;
                    }
                    if !self.graph.are_connected(recipient, event_person) {
                        continue;
                    }

                    let key = format!(
                        "{}:{}:{}:{}",
                        recipient.phone, event_person.phone, rule.id, event
                    );
                    if sent.contains(&key) {
                        summary.duplicates_skipped += 1;
                        continue;
                    }

                    let generated = timeout(
                        self.generation_timeout,
                        self.writer
                            .generate(event_person.display_name(), &event_label, days_ahead),
                    )
                    .await;

                    let content = match generated {
                        Ok(Ok(content)) => content,
                        Ok(Err(e)) => {
                            warn!(
                                recipient = %recipient.phone,
                                member = %event_person.phone,
                                error = %e,
                                "failed to generate notification copy, skipping pair"
                            );
                            summary.generation_failures += 1;
                            continue;
                        }
                        Err(_) => {
                            warn!(
                                recipient = %recipient.phone,
                                member = %event_person.phone,
                                "notification copy generation timed out, skipping pair"
                            );
                            summary.generation_failures += 1;
                            continue;
                        }
                    };

                    let payload = NotificationPayload {
                        recipient_id: recipient.phone.clone(),
                        recipient_push_token: recipient.push_token.clone(),
                        title: content.title,
                        body: content.body,
                        deep_link_url: card_creation_deep_link(
                            event_person.display_name(),
                            &event_label,
                        ),
                    };
                    self.dispatcher.dispatch(payload).await;

                    sent.insert(key);
                    summary.notifications_dispatched += 1;
                }
            }
        }

        summary
    }
}

/// Deep link into the card creation flow, pre-filled with the event person
/// and the occasion
fn card_creation_deep_link(connection_name: &str, event_label: &str) -> String {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("recipient", connection_name)
        .append_pair("occasion", event_label)
        .finish();
    format!("/dashboard/create?{query}")
}

/// Background service running the matcher once a day against the database
pub struct EventNotificationService {
    db: DBService,
    job: EventNotificationJob,
    poll_interval: Duration,
}

impl EventNotificationService {
    pub fn new(
        db: DBService,
        writer: Arc<dyn MessageWriter>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        graph: Arc<dyn ConnectionGraph>,
    ) -> Self {
        Self {
            db,
            job: EventNotificationJob::new(writer, dispatcher, graph),
            poll_interval: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Spawn the daily event notification service
    pub async fn spawn(
        db: DBService,
        writer: Arc<dyn MessageWriter>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        graph: Arc<dyn ConnectionGraph>,
    ) -> tokio::task::JoinHandle<()> {
        let service = Self::new(db, writer, dispatcher, graph);
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "starting event notification service with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            match self.run_once(Utc::now().date_naive()).await {
                Ok(summary) => info!(
                    events_matched = summary.events_matched,
                    notifications_dispatched = summary.notifications_dispatched,
                    generation_failures = summary.generation_failures,
                    "event notification run finished"
                ),
                Err(e) => error!("event notification run failed: {}", e),
            }
        }
    }

    /// One run for an explicit date. Used by the scheduler loop, the manual
    /// trigger route, and tests.
    pub async fn run_once(
        &self,
        today: NaiveDate,
    ) -> Result<EventNotificationRunSummary, EventNotificationError> {
        let members = Member::find_active(&self.db.pool).await?;
        let rules =
            NotificationRule::find_enabled_by_trigger(&self.db.pool, RuleTrigger::UpcomingBirthday)
                .await?;

        if rules.is_empty() {
            debug!("no enabled birthday rules, nothing to do");
            return Ok(EventNotificationRunSummary::default());
        }

        info!(
            members = members.len(),
            rules = rules.len(),
            "starting event notification run"
        );

        Ok(self.job.run(today, &members, &rules).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use chrono::Utc;
    use db::models::notification_rule::ALL_USERS_TARGET;
    use uuid::Uuid;

    use super::*;
    use crate::services::message_writer::{MessageWriterError, NotificationContent};

    /// Records every call; fails the call numbers listed in `fail_on_calls`
    struct RecordingWriter {
        calls: Mutex<Vec<(String, String, i64)>>,
        counter: AtomicUsize,
        fail_on_calls: Vec<usize>,
    }

    impl RecordingWriter {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
                fail_on_calls: Vec::new(),
            }
        }

        fn failing_on(calls: Vec<usize>) -> Self {
            Self {
                fail_on_calls: calls,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl MessageWriter for RecordingWriter {
        async fn generate(
            &self,
            connection_name: &str,
            event_name: &str,
            days_ahead: i64,
        ) -> Result<NotificationContent, MessageWriterError> {
            let call_number = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.calls.lock().unwrap().push((
                connection_name.to_string(),
                event_name.to_string(),
                days_ahead,
            ));
            if self.fail_on_calls.contains(&call_number) {
                return Err(MessageWriterError::RateLimited);
            }
            Ok(NotificationContent {
                title: format!("{connection_name}'s {event_name}!"),
                body: "Want to send a card?".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CollectingDispatcher {
        sent: Mutex<Vec<NotificationPayload>>,
    }

    #[async_trait]
    impl NotificationDispatcher for CollectingDispatcher {
        async fn dispatch(&self, payload: NotificationPayload) {
            self.sent.lock().unwrap().push(payload);
        }
    }

    /// Only pairs listed by phone are connected
    struct PairGraph(Vec<(&'static str, &'static str)>);

    impl ConnectionGraph for PairGraph {
        fn are_connected(&self, recipient: &Member, event_person: &Member) -> bool {
            self.0
                .iter()
                .any(|(r, e)| *r == recipient.phone && *e == event_person.phone)
        }
    }

    fn member(phone: &str, name: &str, birthdate: Option<&str>) -> Member {
        Member {
            phone: phone.to_string(),
            full_name: format!("{name} Example"),
            preferred_name: name.to_string(),
            email: None,
            birthdate: birthdate.map(|b| b.to_string()),
            push_token: Some(format!("token-{phone}")),
            status: MemberStatus::Active,
            connections: 0,
            cards_sent: 0,
            referrals: 0,
            app_spend_total: 0.0,
            login_streak: 0,
            joined_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn birthday_rule(id: Uuid, timing: &str) -> NotificationRule {
        NotificationRule {
            id,
            name: "Birthday Alert".to_string(),
            trigger: RuleTrigger::UpcomingBirthday,
            timing: timing.to_string(),
            target: ALL_USERS_TARGET.to_string(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn job_with(
        writer: Arc<RecordingWriter>,
        dispatcher: Arc<CollectingDispatcher>,
    ) -> EventNotificationJob {
        EventNotificationJob::new(writer, dispatcher, Arc::new(FullyConnected))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn birthday_ten_days_out_notifies_every_other_active_member() {
        let writer = Arc::new(RecordingWriter::new());
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = job_with(writer.clone(), dispatcher.clone());

        let mut charlie = member("+14155550000", "Charlie", Some("1985-01-11"));
        charlie.status = MemberStatus::Inactive;
        let members = vec![
            member("+12065551234", "Ben", Some("1990-01-11")),
            member("+12068887777", "Alice", Some("1991-03-02")),
            member("+13125559876", "Diana", None),
            charlie,
        ];
        let rules = vec![birthday_rule(Uuid::new_v4(), "10-days-before")];

        let summary = job.run(today(), &members, &rules).await;

        assert_eq!(summary.events_matched, 1);
        assert_eq!(summary.notifications_dispatched, 2);
        assert_eq!(summary.generation_failures, 0);

        let calls = writer.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        for (name, event, days_ahead) in calls.iter() {
            assert_eq!(name, "Ben");
            assert_eq!(event, "Birthday");
            assert_eq!(*days_ahead, 10);
        }

        let sent = dispatcher.sent.lock().unwrap();
        let mut recipients: Vec<&str> = sent.iter().map(|p| p.recipient_id.as_str()).collect();
        recipients.sort();
        // Ben never receives his own event; inactive Charlie is excluded
        assert_eq!(recipients, vec!["+12068887777", "+13125559876"]);
        for payload in sent.iter() {
            assert_eq!(
                payload.deep_link_url,
                "/dashboard/create?recipient=Ben&occasion=Birthday"
            );
            assert!(payload.recipient_push_token.is_some());
        }
    }

    #[tokio::test]
    async fn birthdate_six_months_off_target_matches_as_half_birthday() {
        let writer = Arc::new(RecordingWriter::new());
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = job_with(writer.clone(), dispatcher.clone());

        let members = vec![
            member("+12065551234", "Ben", Some("1990-07-11")),
            member("+12068887777", "Alice", None),
        ];
        let rules = vec![birthday_rule(Uuid::new_v4(), "10-days-before")];

        let summary = job.run(today(), &members, &rules).await;

        assert_eq!(summary.events_matched, 1);
        let calls = writer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "Half Birthday");

        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(
            sent[0].deep_link_url,
            "/dashboard/create?recipient=Ben&occasion=Half+Birthday"
        );
    }

    #[tokio::test]
    async fn identical_rules_are_deduplicated_within_a_run() {
        let writer = Arc::new(RecordingWriter::new());
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = job_with(writer.clone(), dispatcher.clone());

        let members = vec![
            member("+12065551234", "Ben", Some("1990-01-11")),
            member("+12068887777", "Alice", None),
        ];
        // Same rule row loaded twice: same dedup key, one notification
        let rule_id = Uuid::new_v4();
        let rules = vec![
            birthday_rule(rule_id, "10-days-before"),
            birthday_rule(rule_id, "10-days-before"),
        ];

        let summary = job.run(today(), &members, &rules).await;

        assert_eq!(writer.calls.lock().unwrap().len(), 1);
        assert_eq!(summary.notifications_dispatched, 1);
        assert_eq!(summary.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn distinct_rules_each_produce_their_own_notification() {
        let writer = Arc::new(RecordingWriter::new());
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = job_with(writer.clone(), dispatcher.clone());

        let members = vec![
            member("+12065551234", "Ben", Some("1990-01-11")),
            member("+12068887777", "Alice", None),
        ];
        let rules = vec![
            birthday_rule(Uuid::new_v4(), "10-days-before"),
            birthday_rule(Uuid::new_v4(), "10-days-before"),
        ];

        let summary = job.run(today(), &members, &rules).await;

        // Dedup keys include the rule id, so two configured rules both fire
        assert_eq!(summary.notifications_dispatched, 2);
        assert_eq!(summary.duplicates_skipped, 0);
    }

    #[tokio::test]
    async fn unparseable_timing_skips_the_rule() {
        let writer = Arc::new(RecordingWriter::new());
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = job_with(writer.clone(), dispatcher.clone());

        let members = vec![
            member("+12065551234", "Ben", Some("1990-01-11")),
            member("+12068887777", "Alice", None),
        ];
        let rules = vec![birthday_rule(Uuid::new_v4(), "whenever")];

        let summary = job.run(today(), &members, &rules).await;

        assert_eq!(summary.rules_checked, 0);
        assert!(writer.calls.lock().unwrap().is_empty());
        assert!(dispatcher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_scoped_rules_are_not_evaluated() {
        let writer = Arc::new(RecordingWriter::new());
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = job_with(writer.clone(), dispatcher.clone());

        let members = vec![
            member("+12065551234", "Ben", Some("1990-01-11")),
            member("+12068887777", "Alice", None),
        ];
        let mut rule = birthday_rule(Uuid::new_v4(), "10-days-before");
        rule.target = "Group: Xmas Cards".to_string();

        let summary = job.run(today(), &members, &[rule]).await;

        assert_eq!(summary.rules_checked, 0);
        assert!(dispatcher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_skips_the_pair_and_continues() {
        let writer = Arc::new(RecordingWriter::failing_on(vec![1]));
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = job_with(writer.clone(), dispatcher.clone());

        let members = vec![
            member("+12065551234", "Ben", Some("1990-01-11")),
            member("+12068887777", "Alice", None),
            member("+13125559876", "Diana", None),
        ];
        let rules = vec![birthday_rule(Uuid::new_v4(), "10-days-before")];

        let summary = job.run(today(), &members, &rules).await;

        assert_eq!(summary.generation_failures, 1);
        assert_eq!(summary.notifications_dispatched, 1);
        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient_id, "+13125559876");
    }

    #[tokio::test]
    async fn connectivity_predicate_limits_recipients() {
        let writer = Arc::new(RecordingWriter::new());
        let dispatcher = Arc::new(CollectingDispatcher::default());
        let job = EventNotificationJob::new(
            writer.clone(),
            dispatcher.clone(),
            Arc::new(PairGraph(vec![("+12068887777", "+12065551234")])),
        );

        let members = vec![
            member("+12065551234", "Ben", Some("1990-01-11")),
            member("+12068887777", "Alice", None),
            member("+13125559876", "Diana", None),
        ];
        let rules = vec![birthday_rule(Uuid::new_v4(), "10-days-before")];

        let summary = job.run(today(), &members, &rules).await;

        assert_eq!(summary.notifications_dispatched, 1);
        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent[0].recipient_id, "+12068887777");
    }

    #[test]
    fn deep_link_encodes_name_and_occasion() {
        assert_eq!(
            card_creation_deep_link("Ben Brashen", "Half Birthday"),
            "/dashboard/create?recipient=Ben+Brashen&occasion=Half+Birthday"
        );
    }
}
