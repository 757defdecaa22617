use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hour of day (UTC) at which scheduled digests go out
pub const SEND_HOUR: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
        }
    }

    fn interval(&self) -> Duration {
        match self {
            Frequency::Daily => Duration::days(1),
            Frequency::Weekly => Duration::days(7),
            // Twice a week
            Frequency::Biweekly => Duration::days(3),
        }
    }

    /// Next delivery: one interval from `now`, at the send hour of that day.
    pub fn next_send_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let day = (now + self.interval()).date_naive();
        let send_time = NaiveTime::from_hms_opt(SEND_HOUR, 0, 0).unwrap_or_default();
        day.and_time(send_time).and_utc()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = PreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            _ => Err(PreferenceError::InvalidFrequency),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("Select at least one category")]
    NoCategories,
    #[error("Valid frequency is required (daily, weekly, biweekly)")]
    InvalidFrequency,
    #[error("An email address is required")]
    MissingEmail,
}

/// Body of a preference update as it arrives over HTTP. Every field is
/// optional here so validation can report which one is wrong.
#[derive(Debug, Default, Deserialize)]
pub struct PreferencesRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPreferences {
    pub email: String,
    pub frequency: Frequency,
    pub categories: Vec<String>,
}

impl PreferencesRequest {
    pub fn validate(self) -> Result<ValidPreferences, PreferenceError> {
        let categories = match self.categories {
            Some(categories) if !categories.is_empty() => categories,
            _ => return Err(PreferenceError::NoCategories),
        };

        let frequency = self
            .frequency
            .as_deref()
            .ok_or(PreferenceError::InvalidFrequency)?
            .parse::<Frequency>()?;

        let email = self
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(PreferenceError::MissingEmail)?;

        Ok(ValidPreferences {
            email,
            frequency,
            categories,
        })
    }
}

/// A stored subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preference {
    pub user_id: String,
    pub email: String,
    pub categories: Vec<String>,
    pub frequency: Frequency,
    pub is_active: bool,
    pub next_send_at: Option<DateTime<Utc>>,
}
