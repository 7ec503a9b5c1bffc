//! Calendar capability client -- Google Calendar-backed.
//!
//! Event times travel as RFC-3339 strings that may or may not carry an
//! offset; when the offset is absent the value is treated as UTC
//! ([`parse_rfc3339_utc`]). Free/busy returns the raw busy intervals; the
//! calendar agent computes the gaps.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{map_error_status, parse_retry_after, ProviderError};

/// A calendar event as surfaced to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    /// RFC-3339, offset optional (absent means UTC).
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub meeting_link: String,
    #[serde(default)]
    pub status: String,
}

/// Fields for a new event.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub title: String,
    pub start: String,
    pub end: String,
    pub description: String,
    pub attendees: Vec<String>,
    pub location: String,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
    pub attendees: Option<Vec<String>>,
    pub location: Option<String>,
}

/// Window for listing upcoming events.
#[derive(Debug, Clone, Default)]
pub struct ListWindow {
    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub max_results: u32,
}

/// One busy span from a free/busy query, normalized to UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Free/busy query across the primary calendar and attendees.
#[derive(Debug, Clone)]
pub struct FreeBusyQuery {
    pub time_min: String,
    pub time_max: String,
    pub attendees: Vec<String>,
}

/// Calendar capability interface.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn create(
        &self,
        token: &str,
        event: &NewEvent,
        cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError>;

    async fn update(
        &self,
        token: &str,
        id: &str,
        patch: &EventPatch,
        cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError>;

    async fn delete(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError>;

    async fn list(
        &self,
        token: &str,
        window: &ListWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CalendarEvent>, ProviderError>;

    async fn get(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError>;

    async fn search(
        &self,
        token: &str,
        query: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<CalendarEvent>, ProviderError>;

    /// Busy intervals for `[primary] ∪ attendees` in the window.
    async fn free_busy(
        &self,
        token: &str,
        query: &FreeBusyQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<BusyInterval>, ProviderError>;
}

/// Parse an RFC-3339 timestamp that may omit its offset; offset-less
/// values are treated as UTC.
pub fn parse_rfc3339_utc(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Google Calendar REST implementation.
pub struct GoogleCalendarClient {
    base_url: String,
    client: reqwest::Client,
}

impl GoogleCalendarClient {
    pub fn new() -> Self {
        Self::with_base_url("https://www.googleapis.com")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    async fn request_json(
        &self,
        token: &str,
        builder: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        if token.is_empty() {
            return Err(ProviderError::AuthMissing);
        }
        let fut = builder.bearer_auth(token).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            resp = fut => resp.map_err(|e| ProviderError::Permanent(e.to_string()))?,
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = parse_retry_after(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_error_status(status, &body, true, retry_after));
        }
        if resp.status() == reqwest::StatusCode::NO_CONTENT || resp.content_length() == Some(0) {
            return Ok(serde_json::Value::Null);
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("malformed provider response: {e}")))
    }

    fn events_url(&self, suffix: &str) -> String {
        format!(
            "{}/calendar/v3/calendars/primary/events{suffix}",
            self.base_url
        )
    }
}

impl Default for GoogleCalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Google event resource body for create/update.
fn event_body(event: &NewEvent) -> serde_json::Value {
    let mut body = serde_json::json!({
        "summary": event.title,
        "description": event.description,
        "start": time_field(&event.start),
        "end": time_field(&event.end),
    });
    if !event.location.is_empty() {
        body["location"] = serde_json::Value::String(event.location.clone());
    }
    if !event.attendees.is_empty() {
        body["attendees"] = serde_json::Value::Array(
            event
                .attendees
                .iter()
                .map(|email| serde_json::json!({"email": email}))
                .collect(),
        );
    }
    body
}

/// A `start`/`end` field. Offset-carrying values let the provider infer
/// the zone from the string; offset-less values are pinned to UTC.
fn time_field(value: &str) -> serde_json::Value {
    if has_explicit_offset(value) {
        serde_json::json!({"dateTime": value})
    } else {
        serde_json::json!({"dateTime": value, "timeZone": "UTC"})
    }
}

/// Whether an RFC-3339 string carries an explicit offset (`Z` or `±hh:mm`).
pub fn has_explicit_offset(value: &str) -> bool {
    if value.ends_with('Z') {
        return true;
    }
    // An offset sign appears after the time separator; date dashes do not count.
    match value.find('T') {
        Some(t) => value
            .get(t..)
            .is_some_and(|time| time.contains('+') || time.contains('-')),
        None => false,
    }
}

fn parse_event(value: &serde_json::Value) -> CalendarEvent {
    let time_of = |field: &str| -> String {
        value
            .get(field)
            .and_then(|f| f.get("dateTime").or_else(|| f.get("date")))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned()
    };
    CalendarEvent {
        id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        title: value
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        start: time_of("start"),
        end: time_of("end"),
        description: value
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        location: value
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        attendees: value
            .get("attendees")
            .and_then(|a| a.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|att| att.get("email").and_then(|e| e.as_str()))
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        meeting_link: value
            .get("hangoutLink")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        status: value
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
    }
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn create(
        &self,
        token: &str,
        event: &NewEvent,
        cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError> {
        let url = self.events_url("");
        let value = self
            .request_json(token, self.client.post(&url).json(&event_body(event)), cancel)
            .await?;
        Ok(parse_event(&value))
    }

    async fn update(
        &self,
        token: &str,
        id: &str,
        patch: &EventPatch,
        cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError> {
        // Read-modify-write: fetch the event, overlay provided fields.
        let url = self.events_url(&format!("/{id}"));
        let mut current = self
            .request_json(token, self.client.get(&url), cancel)
            .await?;

        if let Some(title) = &patch.title {
            current["summary"] = serde_json::Value::String(title.clone());
        }
        if let Some(start) = &patch.start {
            current["start"] = time_field(start);
        }
        if let Some(end) = &patch.end {
            current["end"] = time_field(end);
        }
        if let Some(description) = &patch.description {
            current["description"] = serde_json::Value::String(description.clone());
        }
        if let Some(location) = &patch.location {
            current["location"] = serde_json::Value::String(location.clone());
        }
        if let Some(attendees) = &patch.attendees {
            current["attendees"] = serde_json::Value::Array(
                attendees
                    .iter()
                    .map(|email| serde_json::json!({"email": email}))
                    .collect(),
            );
        }

        let value = self
            .request_json(token, self.client.put(&url).json(&current), cancel)
            .await?;
        Ok(parse_event(&value))
    }

    async fn delete(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let url = self.events_url(&format!("/{id}"));
        self.request_json(token, self.client.delete(&url), cancel)
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        token: &str,
        window: &ListWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let max = window.max_results.clamp(1, 250);
        let mut url = self.events_url(&format!(
            "?singleEvents=true&orderBy=startTime&maxResults={max}"
        ));
        if let Some(time_min) = &window.time_min {
            url.push_str(&format!("&timeMin={}", super::urlencode(time_min)));
        }
        if let Some(time_max) = &window.time_max {
            url.push_str(&format!("&timeMax={}", super::urlencode(time_max)));
        }
        let value = self
            .request_json(token, self.client.get(&url), cancel)
            .await?;
        Ok(value
            .get("items")
            .and_then(|i| i.as_array())
            .map(|items| items.iter().map(parse_event).collect())
            .unwrap_or_default())
    }

    async fn get(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError> {
        let url = self.events_url(&format!("/{id}"));
        let value = self
            .request_json(token, self.client.get(&url), cancel)
            .await?;
        Ok(parse_event(&value))
    }

    async fn search(
        &self,
        token: &str,
        query: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let max = max_results.clamp(1, 50);
        let url = self.events_url(&format!(
            "?singleEvents=true&orderBy=startTime&maxResults={max}&q={}",
            super::urlencode(query)
        ));
        let value = self
            .request_json(token, self.client.get(&url), cancel)
            .await?;
        Ok(value
            .get("items")
            .and_then(|i| i.as_array())
            .map(|items| items.iter().map(parse_event).collect())
            .unwrap_or_default())
    }

    async fn free_busy(
        &self,
        token: &str,
        query: &FreeBusyQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<BusyInterval>, ProviderError> {
        let url = format!("{}/calendar/v3/freeBusy", self.base_url);
        let mut ids = vec!["primary".to_owned()];
        ids.extend(query.attendees.iter().cloned());
        let body = serde_json::json!({
            "timeMin": query.time_min,
            "timeMax": query.time_max,
            "timeZone": "UTC",
            "items": ids.iter().map(|id| serde_json::json!({"id": id})).collect::<Vec<_>>(),
        });
        let value = self
            .request_json(token, self.client.post(&url).json(&body), cancel)
            .await?;

        let mut busy = Vec::new();
        if let Some(calendars) = value.get("calendars").and_then(|c| c.as_object()) {
            for cal in calendars.values() {
                if let Some(spans) = cal.get("busy").and_then(|b| b.as_array()) {
                    for span in spans {
                        let start = span.get("start").and_then(|v| v.as_str());
                        let end = span.get("end").and_then(|v| v.as_str());
                        if let (Some(start), Some(end)) = (start, end) {
                            if let (Some(start), Some(end)) =
                                (parse_rfc3339_utc(start), parse_rfc3339_utc(end))
                            {
                                busy.push(BusyInterval { start, end });
                            }
                        }
                    }
                }
            }
        }
        Ok(busy)
    }
}
