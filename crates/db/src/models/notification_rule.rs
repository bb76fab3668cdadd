use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Audience scope for rules that apply to every member
pub const ALL_USERS_TARGET: &str = "All Users";

/// Kind of upcoming event a rule watches for
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display)]
#[sqlx(type_name = "rule_trigger", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RuleTrigger {
    UpcomingBirthday,
    Holiday,
    Anniversary,
}

/// Admin-configured rule describing when event reminders go out.
///
/// `timing` keeps the raw encoding used by the admin UI ("10-days-before");
/// rules with a timing that cannot be parsed are skipped by the job, never
/// fatal.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct NotificationRule {
    pub id: Uuid,
    pub name: String,
    pub trigger: RuleTrigger,
    pub timing: String,
    /// "All Users" or a group scope such as "Group: Xmas Cards". Only the
    /// All Users audience is evaluated by the notification job.
    pub target: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateNotificationRule {
    pub name: String,
    pub trigger: RuleTrigger,
    pub timing: String,
    pub target: Option<String>,
}

const RULE_COLUMNS: &str =
    r#"id, name, "trigger", timing, target, enabled, created_at, updated_at"#;

impl NotificationRule {
    /// Lead time in days encoded in the timing string ("10-days-before" -> 10)
    pub fn timing_days(&self) -> Option<i64> {
        self.timing.split('-').next()?.parse().ok()
    }

    pub fn applies_to_all(&self) -> bool {
        self.target == ALL_USERS_TARGET
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateNotificationRule,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, NotificationRule>(&format!(
            r#"INSERT INTO notification_rules (id, name, "trigger", timing, target)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {RULE_COLUMNS}"#
        ))
        .bind(id)
        .bind(&data.name)
        .bind(data.trigger)
        .bind(&data.timing)
        .bind(data.target.as_deref().unwrap_or(ALL_USERS_TARGET))
        .fetch_one(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, NotificationRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM notification_rules ORDER BY created_at"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn find_enabled_by_trigger(
        pool: &SqlitePool,
        trigger: RuleTrigger,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, NotificationRule>(&format!(
            r#"SELECT {RULE_COLUMNS} FROM notification_rules
            WHERE "trigger" = $1 AND enabled = 1
            ORDER BY created_at"#
        ))
        .bind(trigger)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn rule_with_timing(timing: &str) -> NotificationRule {
        NotificationRule {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            trigger: RuleTrigger::UpcomingBirthday,
            timing: timing.to_string(),
            target: ALL_USERS_TARGET.to_string(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn timing_days_parses_leading_integer() {
        assert_eq!(rule_with_timing("10-days-before").timing_days(), Some(10));
        assert_eq!(rule_with_timing("7-days-before").timing_days(), Some(7));
        assert_eq!(rule_with_timing("3-days-before").timing_days(), Some(3));
    }

    #[test]
    fn timing_days_rejects_malformed_strings() {
        assert_eq!(rule_with_timing("whenever").timing_days(), None);
        assert_eq!(rule_with_timing("").timing_days(), None);
        assert_eq!(rule_with_timing("-5-days-before").timing_days(), None);
    }

    #[tokio::test]
    async fn find_enabled_by_trigger_filters_trigger_kind() {
        let db = DBService::in_memory().await.unwrap();
        NotificationRule::create(
            &db.pool,
            &CreateNotificationRule {
                name: "Weekly Birthday Reminder".to_string(),
                trigger: RuleTrigger::UpcomingBirthday,
                timing: "7-days-before".to_string(),
                target: None,
            },
        )
        .await
        .unwrap();
        NotificationRule::create(
            &db.pool,
            &CreateNotificationRule {
                name: "Xmas Card Push".to_string(),
                trigger: RuleTrigger::Holiday,
                timing: "10-days-before".to_string(),
                target: Some("Group: Xmas Cards".to_string()),
            },
        )
        .await
        .unwrap();

        let birthday_rules =
            NotificationRule::find_enabled_by_trigger(&db.pool, RuleTrigger::UpcomingBirthday)
                .await
                .unwrap();
        assert_eq!(birthday_rules.len(), 1);
        assert_eq!(birthday_rules[0].name, "Weekly Birthday Reminder");
        assert!(birthday_rules[0].applies_to_all());
        assert_eq!(birthday_rules[0].timing_days(), Some(7));
    }
}
