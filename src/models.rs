//! Wire and cache schemas for the poll API.
//!
//! The server models ids as integers while the client treats them as opaque
//! strings, so every id field accepts either form on the way in. Optional
//! fields default when absent instead of failing the whole payload.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A poll as returned by `GET /polls` and `GET /polls/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(deserialize_with = "id_from_json")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_time")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_votes: u64,
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Poll {
    /// Whether the poll has passed its end date. Polls without one never close.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end| end <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    #[serde(deserialize_with = "id_from_json")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub votes: u64,
}

/// Vote tallies from `GET /polls/{id}/results`.
///
/// Accepts both `{poll, options}` and a bare poll with embedded options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawResults")]
pub struct PollResults {
    pub poll: Poll,
    pub options: Vec<PollOption>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResults {
    Wrapped {
        poll: Poll,
        #[serde(default)]
        options: Vec<PollOption>,
    },
    Flat(Poll),
}

impl From<RawResults> for PollResults {
    fn from(raw: RawResults) -> Self {
        match raw {
            RawResults::Wrapped { poll, options } if options.is_empty() => Self {
                options: poll.options.clone(),
                poll,
            },
            RawResults::Wrapped { poll, options } => Self { poll, options },
            RawResults::Flat(poll) => Self {
                options: poll.options.clone(),
                poll,
            },
        }
    }
}

impl PollResults {
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    /// Percentage of all votes that went to `option_id`, 0 when nobody voted.
    pub fn share(&self, option_id: &str) -> f64 {
        let total = self.total_votes();
        if total == 0 {
            return 0.0;
        }
        self.options
            .iter()
            .find(|o| o.id == option_id)
            .map(|o| o.votes as f64 * 100.0 / total as f64)
            .unwrap_or(0.0)
    }
}

/// Body of `POST /votes`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteRequest {
    #[serde(serialize_with = "id_to_json")]
    pub poll_id: String,
    #[serde(serialize_with = "id_to_json")]
    pub option_id: String,
    pub student_id: String,
}

/// Response of `GET /votes/check/{pollId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteCheck {
    #[serde(default)]
    pub has_voted: bool,
    #[serde(deserialize_with = "id_from_json")]
    pub poll_id: String,
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub student_id: String,
    pub name: String,
    pub faculty: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: RemoteUser,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteUser {
    #[serde(default, deserialize_with = "optional_id_from_json")]
    pub student_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// Body of `POST /polls`. Admin only.
///
/// Options go out as plain strings; the server creates one option per entry.
/// A missing `end_date` lets the server pick its default of one week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPoll {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub options: Vec<String>,
}

impl NewPoll {
    /// Trim every field and drop blank options. Needs a title and at least
    /// two options.
    pub fn normalized(&self) -> Result<NewPoll, String> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("poll title must not be empty".to_string());
        }
        let options: Vec<String> = self
            .options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if options.len() < 2 {
            return Err("a poll needs at least two options".to_string());
        }
        Ok(NewPoll {
            title: title.to_string(),
            description: self.description.trim().to_string(),
            end_date: self.end_date,
            options,
        })
    }
}

/// Reply to `POST /polls`. The server reports rejections in the body with
/// a 2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePollReply {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, deserialize_with = "optional_id_from_json")]
    pub poll_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

fn id_from_json<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

fn optional_id_from_json<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(String::from))
}

/// Numeric ids go out as JSON integers, anything else as a string.
fn id_to_json<S: Serializer>(id: &str, s: S) -> Result<S::Ok, S::Error> {
    match id.parse::<i64>() {
        Ok(n) if id.bytes().all(|b| b.is_ascii_digit()) => s.serialize_i64(n),
        _ => s.serialize_str(id),
    }
}

/// RFC 3339, or a naive timestamp taken as UTC. Anything else becomes `None`.
fn lenient_time<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(d)? else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc()))
}
