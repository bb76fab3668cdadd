//! Tree growth scoring and narrative milestone progress.
//!
//! A member's engagement activity is converted into a single "tree height"
//! in feet, which in turn unlocks entries on a fixed milestone ladder. The
//! whole module is pure: no I/O, no stored state, recomputed on every read.

use db::models::member::Member;
use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

const FEET_PER_CONNECTION: f64 = 1.0;
const FEET_PER_CARD_SENT: f64 = 0.5;
const FEET_PER_LOGIN_STREAK_DAY: f64 = 0.1;
// Spending and referrals are the high-leverage actions: large base
// multipliers, each perturbed independently so the displayed height is not
// perfectly reproducible from the inputs.
const SPEND_GROWTH_FACTOR: f64 = 1.0;
const FEET_PER_REFERRAL_BASE: f64 = 100.0;
const GROWTH_RANDOMIZATION_RANGE: f64 = 0.2; // +/- 20%

/// Activity counters a tree height is computed from. Recomputed from the
/// member record per request, never persisted by this module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct UserActivity {
    pub connections: i64,
    pub cards_sent: i64,
    pub referrals: i64,
    pub app_spend_total: f64,
    pub login_streak: i64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActivityValidationError {
    #[error("negative activity count: {0}")]
    NegativeCount(&'static str),
    #[error("negative spend total")]
    NegativeSpend,
}

impl UserActivity {
    /// Boundary check for callers assembling activity from untrusted input.
    /// The growth functions themselves assume validated input.
    pub fn validate(&self) -> Result<(), ActivityValidationError> {
        if self.connections < 0 {
            return Err(ActivityValidationError::NegativeCount("connections"));
        }
        if self.cards_sent < 0 {
            return Err(ActivityValidationError::NegativeCount("cards_sent"));
        }
        if self.referrals < 0 {
            return Err(ActivityValidationError::NegativeCount("referrals"));
        }
        if self.login_streak < 0 {
            return Err(ActivityValidationError::NegativeCount("login_streak"));
        }
        if self.app_spend_total < 0.0 {
            return Err(ActivityValidationError::NegativeSpend);
        }
        Ok(())
    }
}

impl From<&Member> for UserActivity {
    fn from(member: &Member) -> Self {
        Self {
            connections: member.connections,
            cards_sent: member.cards_sent,
            referrals: member.referrals,
            app_spend_total: member.app_spend_total,
            login_streak: member.login_streak,
        }
    }
}

/// A fixed height threshold unlocking narrative content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Milestone {
    pub height: f64,
    pub title: String,
    pub description: String,
}

/// Progress state for the tree view, derived fresh from an activity snapshot
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct TreeMilestoneInfo {
    pub current_height: f64,
    pub progress_percentage: i32,
    pub next_milestone: Option<Milestone>,
    pub last_milestone: Option<Milestone>,
    pub unlocked_milestones: Vec<Milestone>,
}

/// The narrative milestone ladder, ascending by height with unique heights.
static NARRATIVE_MILESTONES: Lazy<Vec<Milestone>> = Lazy::new(|| {
    let entries = [
        (
            30.0,
            "A Bird Family Moved In!",
            "Your tree is now a home. A donation has been made to the Humane Society in your honor.",
        ),
        (
            85.0,
            "Your Tree Dropped a Seed!",
            "Look closely! Your tree dropped a seed that's already sprouting. This represents new life and new beginnings.",
        ),
        (
            150.0,
            "A River Flows & Squirrels Appear",
            "Your tree is creating its own ecosystem! You've attracted squirrels, and a river now flows nearby. A donation has been made to protect natural waterways.",
        ),
        (
            250.0,
            "Campers Arrived!",
            "A family of campers has set up nearby, enjoying the shade and beauty of your tree.",
        ),
        (
            500.0,
            "A Mighty Oak",
            "Your tree has become a landmark in the growing forest community!",
        ),
        (
            1000.0,
            "Heart of the Forest",
            "You've grown a true giant, supporting a vibrant ecosystem for all to enjoy.",
        ),
    ];
    entries
        .into_iter()
        .map(|(height, title, description)| Milestone {
            height,
            title: title.to_string(),
            description: description.to_string(),
        })
        .collect()
});

pub fn narrative_milestones() -> &'static [Milestone] {
    &NARRATIVE_MILESTONES
}

/// Perturb a base value by a uniform factor in the +/-20% band
fn randomized_growth(base: f64, rng: &mut impl Rng) -> f64 {
    let factor = rng.random_range(-GROWTH_RANDOMIZATION_RANGE..=GROWTH_RANDOMIZATION_RANGE);
    base * (1.0 + factor)
}

/// Total tree height in feet for the given activity.
///
/// Connections, cards and login streak contribute linearly; spend and
/// referral contributions are each randomized within +/-20% of their base,
/// independently sampled. With zero spend and zero referrals the result is
/// exact: `connections + 0.5*cards_sent + 0.1*login_streak`.
pub fn calculate_tree_height(activity: &UserActivity) -> f64 {
    calculate_tree_height_with_rng(activity, &mut rand::rng())
}

pub fn calculate_tree_height_with_rng(activity: &UserActivity, rng: &mut impl Rng) -> f64 {
    let from_connections = activity.connections as f64 * FEET_PER_CONNECTION;
    let from_cards = activity.cards_sent as f64 * FEET_PER_CARD_SENT;
    let from_engagement = activity.login_streak as f64 * FEET_PER_LOGIN_STREAK_DAY;
    let from_spend = randomized_growth(activity.app_spend_total * SPEND_GROWTH_FACTOR, rng);
    let from_referrals =
        randomized_growth(activity.referrals as f64 * FEET_PER_REFERRAL_BASE, rng);

    from_connections + from_cards + from_engagement + from_spend + from_referrals
}

/// Milestone progress against the narrative ladder
pub fn tree_milestone_info(current_height: f64) -> TreeMilestoneInfo {
    milestone_info(current_height, narrative_milestones())
}

/// Milestone progress against an arbitrary catalog (ascending by height)
pub fn milestone_info(current_height: f64, catalog: &[Milestone]) -> TreeMilestoneInfo {
    let unlocked_milestones: Vec<Milestone> = catalog
        .iter()
        .filter(|m| current_height >= m.height)
        .cloned()
        .collect();
    let last_milestone = unlocked_milestones.last().cloned();
    let next_milestone = catalog.iter().find(|m| current_height < m.height).cloned();

    let progress_percentage = match &next_milestone {
        Some(next) => {
            let base = last_milestone.as_ref().map(|m| m.height).unwrap_or(0.0);
            let span = next.height - base;
            if span <= 0.0 {
                // Malformed catalog (non-ascending heights); report the bar full
                100
            } else {
                (((current_height - base) / span * 100.0).floor() as i32).min(100)
            }
        }
        // Past the last milestone, the bar stays full
        None if last_milestone.is_some() => 100,
        // Degenerate: nothing unlocked and nothing ahead (empty catalog)
        None => 0,
    };

    TreeMilestoneInfo {
        current_height,
        progress_percentage,
        next_milestone,
        last_milestone,
        unlocked_milestones,
    }
}
