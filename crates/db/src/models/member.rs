use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

/// Standing of a member within the network
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "member_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

/// A member of the greeting network. The phone number (E.164) is the unique
/// identifier, matching the mobile-first onboarding flow.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Member {
    pub phone: String,
    pub full_name: String,
    pub preferred_name: String,
    pub email: Option<String>,
    pub birthdate: Option<String>, // YYYY-MM-DD
    pub push_token: Option<String>,
    pub status: MemberStatus,
    pub connections: i64,
    pub cards_sent: i64,
    pub referrals: i64,
    pub app_spend_total: f64,
    pub login_streak: i64,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateMember {
    pub phone: String,
    pub full_name: String,
    pub preferred_name: Option<String>,
    pub email: Option<String>,
    pub birthdate: Option<String>,
    pub push_token: Option<String>,
}

const MEMBER_COLUMNS: &str = "phone, full_name, preferred_name, email, birthdate, push_token, \
     status, connections, cards_sent, referrals, app_spend_total, login_streak, \
     joined_at, updated_at";

impl Member {
    /// Name used when addressing or referring to this member
    pub fn display_name(&self) -> &str {
        if self.preferred_name.trim().is_empty() {
            &self.full_name
        } else {
            &self.preferred_name
        }
    }

    pub async fn create(pool: &SqlitePool, data: &CreateMember) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            r#"INSERT INTO members (phone, full_name, preferred_name, email, birthdate, push_token)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {MEMBER_COLUMNS}"#
        ))
        .bind(&data.phone)
        .bind(&data.full_name)
        .bind(data.preferred_name.as_deref().unwrap_or(&data.full_name))
        .bind(&data.email)
        .bind(&data.birthdate)
        .bind(&data.push_token)
        .fetch_one(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members ORDER BY full_name"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn find_active(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE status = $1 ORDER BY full_name"
        ))
        .bind(MemberStatus::Active)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_phone(
        pool: &SqlitePool,
        phone: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE phone = $1"
        ))
        .bind(phone)
        .fetch_optional(pool)
        .await
    }

    pub async fn update_status(
        pool: &SqlitePool,
        phone: &str,
        status: MemberStatus,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            r#"UPDATE members
            SET status = $1, updated_at = datetime('now', 'subsec')
            WHERE phone = $2
            RETURNING {MEMBER_COLUMNS}"#
        ))
        .bind(status)
        .bind(phone)
        .fetch_one(pool)
        .await
    }
}
