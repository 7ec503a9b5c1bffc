//! Calendar agent.
//!
//! Intent extraction in JSON mode, then dispatch. `update` and `delete`
//! never trust a model-guessed event id: the next 50 real events are
//! listed and a second JSON call picks the match, which must clear a 0.5
//! confidence bar AND appear in the listed ids (match-before-mutate).
//! Client errors surface as error results and are never retried here --
//! create/update/delete are not idempotent at this layer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeDelta};
use serde::Deserialize;
use tracing::{info, warn};

use crate::agents::{Agent, AgentContext};
use crate::clients::calendar::{
    parse_rfc3339_utc, BusyInterval, CalendarClient, CalendarEvent, EventPatch, FreeBusyQuery,
    ListWindow, NewEvent,
};
use crate::clients::ProviderError;
use crate::llm::{ChatTurn, CompletionRequest, LlmGateway};
use crate::types::{AgentKind, AgentResult, Clock};

/// Events pulled for match-before-mutate.
const MATCH_CANDIDATE_COUNT: u32 = 50;

/// Minimum match confidence for a mutation to proceed.
const MATCH_CONFIDENCE_FLOOR: f64 = 0.5;

/// Default event length when the user gives only a start time.
const DEFAULT_EVENT_MINUTES: i64 = 30;

/// Default duration for free-slot searches.
const DEFAULT_SLOT_MINUTES: i64 = 60;

/// `view_all` window bound: now + 30 days.
const VIEW_ALL_DAYS: i64 = 30;

/// At most this many free slots are returned.
const MAX_FREE_SLOTS: usize = 10;

/// Extracted intent, discriminated by `action`.
#[derive(Debug, Clone, Deserialize)]
struct CalendarIntent {
    action: CalendarAction,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    attendees: Vec<String>,
    #[serde(default)]
    location: Option<String>,
    /// Fuzzy reference to an existing event ("the client call").
    #[serde(default)]
    event_query: Option<String>,
    #[serde(default)]
    duration_minutes: Option<i64>,
    #[serde(default)]
    time_min: Option<String>,
    #[serde(default)]
    time_max: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CalendarAction {
    Create,
    Update,
    Delete,
    ViewAll,
    ViewSpecific,
    FindFreeSlots,
}

/// Match verdict from the second LLM call.
#[derive(Debug, Deserialize)]
struct EventMatch {
    #[serde(default)]
    matched_id: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// A bookable gap between busy intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSlot {
    pub start: DateTime<chrono::Utc>,
    pub end: DateTime<chrono::Utc>,
    pub duration_minutes: i64,
}

/// Calendar agent over the gateway and calendar client.
pub struct CalendarAgent {
    gateway: Arc<LlmGateway>,
    calendar: Arc<dyn CalendarClient>,
    clock: Arc<dyn Clock>,
}

impl CalendarAgent {
    pub fn new(
        gateway: Arc<LlmGateway>,
        calendar: Arc<dyn CalendarClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            calendar,
            clock,
        }
    }

    async fn extract_intent(&self, ctx: &AgentContext<'_>) -> Result<CalendarIntent, AgentResult> {
        let now = self.clock.now();
        let prompt = format!(
            "Extract the calendar operation from the user's request.\n\n\
             Current date: {date}\n\
             Current time (UTC): {time}\n\n\
             Recent conversation:\n{history}\n\n\
             Context from other agents: {peers}\n\n\
             Timestamp rules:\n\
             - If the user names a timezone (e.g. IST, PST, EST), emit RFC-3339 \
             timestamps with that zone's numeric offset (IST is +05:30, PST is -08:00, \
             EST is -05:00).\n\
             - If no timezone is named, emit a local-naive RFC-3339 timestamp with NO \
             offset suffix.\n\
             - If the user mentions both a reminder time and a meeting time, the \
             meeting time is the event time; discard the reminder.\n\n\
             Return JSON:\n\
             {{\n\
               \"action\": \"create|update|delete|view_all|view_specific|find_free_slots\",\n\
               \"title\": \"event title\",\n\
               \"start\": \"RFC-3339 start\",\n\
               \"end\": \"RFC-3339 end\",\n\
               \"description\": \"\",\n\
               \"attendees\": [\"email\"],\n\
               \"location\": \"\",\n\
               \"event_query\": \"reference to an existing event, for update/delete/view_specific\",\n\
               \"duration_minutes\": 60,\n\
               \"time_min\": \"window start for availability\",\n\
               \"time_max\": \"window end for availability\"\n\
             }}\n\n\
             User request: {request}",
            date = now.format("%Y-%m-%d"),
            time = now.format("%H:%M:%S"),
            history = ctx.history_lines(5),
            peers = ctx.peer_context(),
            request = ctx.user_request(),
        );

        let request = CompletionRequest::json(
            vec![
                ChatTurn::system(
                    "You are a calendar assistant. Extract structured event operations \
                     from natural language. Return only JSON.",
                ),
                ChatTurn::user(prompt),
            ],
            0.1,
        );

        let value = self
            .gateway
            .complete_json(&request, ctx.cancel)
            .await
            .map_err(|e| AgentResult::error(format!("Could not understand the calendar request: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| AgentResult::error(format!("Could not understand the calendar request: {e}")))
    }

    /// Ground a fuzzy event reference against the real upcoming events.
    async fn match_event(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        event_query: &str,
    ) -> Result<CalendarEvent, AgentResult> {
        let now = self.clock.now();
        let window = ListWindow {
            time_min: Some(now.to_rfc3339()),
            time_max: None,
            max_results: MATCH_CANDIDATE_COUNT,
        };
        let events = self
            .calendar
            .list(token, &window, ctx.cancel)
            .await
            .map_err(|e| provider_error_result(&e))?;

        if events.is_empty() {
            return Err(AgentResult::error(
                "Could not find a matching event: your calendar has no upcoming events.",
            ));
        }

        let listing: Vec<serde_json::Value> = events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "title": e.title,
                    "start": e.start,
                    "end": e.end,
                })
            })
            .collect();

        let prompt = format!(
            "The user referred to an event as: \"{event_query}\"\n\n\
             These are the user's actual upcoming events:\n{}\n\n\
             Pick the best match. Return JSON:\n\
             {{\"matched_id\": \"id or null\", \"confidence\": 0.0, \"reason\": \"\"}}\n\
             Use null and a low confidence when nothing matches well.",
            serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_owned()),
        );
        let request = CompletionRequest::json(vec![ChatTurn::user(prompt)], 0.1);
        let value = self
            .gateway
            .complete_json(&request, ctx.cancel)
            .await
            .map_err(|e| AgentResult::error(format!("Could not match the event: {e}")))?;
        let verdict: EventMatch = serde_json::from_value(value)
            .map_err(|e| AgentResult::error(format!("Could not match the event: {e}")))?;

        let Some(matched_id) = verdict.matched_id.filter(|id| !id.is_empty()) else {
            return Err(disambiguation_error(event_query, &events));
        };
        if verdict.confidence < MATCH_CONFIDENCE_FLOOR {
            return Err(disambiguation_error(event_query, &events));
        }
        let Some(event) = events.into_iter().find(|e| e.id == matched_id) else {
            // The model invented an id; never mutate on a guess.
            warn!(matched_id = %matched_id, "match returned an unlisted event id");
            return Err(AgentResult::error(format!(
                "Could not find a matching event for '{event_query}'. Please be more specific."
            )));
        };

        info!(event_id = %event.id, confidence = verdict.confidence, reason = %verdict.reason, "event matched");
        Ok(event)
    }

    async fn handle_create(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &CalendarIntent,
    ) -> AgentResult {
        let Some(start) = intent.start.clone() else {
            return AgentResult::error(
                "I need a start time to create the event. When should it begin?",
            );
        };
        let end = match intent.end.clone() {
            Some(end) => end,
            None => match add_minutes(&start, DEFAULT_EVENT_MINUTES) {
                Some(end) => end,
                None => {
                    return AgentResult::error(format!(
                        "Could not parse the event start time '{start}'."
                    ));
                }
            },
        };
        let title = intent
            .title
            .clone()
            .unwrap_or_else(|| "New Meeting".to_owned());

        let event = NewEvent {
            title: title.clone(),
            start,
            end,
            description: intent.description.clone().unwrap_or_default(),
            attendees: intent.attendees.clone(),
            location: intent.location.clone().unwrap_or_default(),
        };

        match self.calendar.create(token, &event, ctx.cancel).await {
            Ok(created) => AgentResult::success(
                format!(
                    "Event '{}' created for {} ({} attendee(s))",
                    created.title,
                    created.start,
                    created.attendees.len()
                ),
                serde_json::to_value(&created).unwrap_or_default(),
            )
            .with_collaboration(serde_json::json!({
                "event_id": created.id,
                "meeting_link": created.meeting_link,
            })),
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_update(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &CalendarIntent,
    ) -> AgentResult {
        let query = intent
            .event_query
            .clone()
            .or_else(|| intent.title.clone())
            .unwrap_or_else(|| ctx.user_request().to_owned());
        let event = match self.match_event(ctx, token, &query).await {
            Ok(event) => event,
            Err(result) => return result,
        };

        let mut patch = EventPatch {
            title: intent.title.clone(),
            start: intent.start.clone(),
            end: intent.end.clone(),
            description: intent.description.clone(),
            location: intent.location.clone(),
            attendees: if intent.attendees.is_empty() {
                None
            } else {
                Some(intent.attendees.clone())
            },
        };
        // Moving the start without an explicit end keeps the old duration
        // when it is known, else the default.
        if let (Some(new_start), None) = (&patch.start, &patch.end) {
            let minutes = event_duration_minutes(&event).unwrap_or(DEFAULT_EVENT_MINUTES);
            patch.end = add_minutes(new_start, minutes);
        }

        match self
            .calendar
            .update(token, &event.id, &patch, ctx.cancel)
            .await
        {
            Ok(updated) => AgentResult::success(
                format!("Successfully updated event '{}'", updated.title),
                serde_json::to_value(&updated).unwrap_or_default(),
            )
            .with_collaboration(serde_json::json!({"event_id": updated.id})),
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_delete(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &CalendarIntent,
    ) -> AgentResult {
        let query = intent
            .event_query
            .clone()
            .or_else(|| intent.title.clone())
            .unwrap_or_else(|| ctx.user_request().to_owned());
        let event = match self.match_event(ctx, token, &query).await {
            Ok(event) => event,
            Err(result) => return result,
        };

        match self.calendar.delete(token, &event.id, ctx.cancel).await {
            Ok(()) => AgentResult::success(
                format!("Successfully deleted event '{}'", event.title),
                serde_json::json!({"id": event.id, "title": event.title, "status": "deleted"}),
            ),
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_view_all(&self, ctx: &AgentContext<'_>, token: &str) -> AgentResult {
        let now = self.clock.now();
        let horizon = now
            .checked_add_signed(TimeDelta::days(VIEW_ALL_DAYS))
            .unwrap_or(now);
        let window = ListWindow {
            time_min: Some(now.to_rfc3339()),
            time_max: Some(horizon.to_rfc3339()),
            max_results: 10,
        };

        match self.calendar.list(token, &window, ctx.cancel).await {
            Ok(events) => {
                let lines: Vec<String> = events
                    .iter()
                    .map(|e| format!("- {} ({})", e.title, e.start))
                    .collect();
                let message = if events.is_empty() {
                    "You have no upcoming events in the next 30 days.".to_owned()
                } else {
                    format!(
                        "You have {} upcoming event(s):\n{}",
                        events.len(),
                        lines.join("\n")
                    )
                };
                AgentResult::success(
                    message,
                    serde_json::json!({
                        "events": events,
                        "total_count": events.len(),
                    }),
                )
            }
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_view_specific(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &CalendarIntent,
    ) -> AgentResult {
        let query = intent
            .event_query
            .clone()
            .or_else(|| intent.title.clone())
            .unwrap_or_else(|| ctx.user_request().to_owned());

        // Direct id lookup first; fuzzy references fall back to search.
        let found = match self.calendar.get(token, &query, ctx.cancel).await {
            Ok(event) => vec![event],
            Err(ProviderError::NotFound(_)) => {
                match self.calendar.search(token, &query, 5, ctx.cancel).await {
                    Ok(events) => events,
                    Err(e) => return provider_error_result(&e),
                }
            }
            Err(e) => return provider_error_result(&e),
        };

        if found.is_empty() {
            return AgentResult::error(format!("No events found matching '{query}'."));
        }
        let lines: Vec<String> = found
            .iter()
            .map(|e| format!("- {} ({} to {})", e.title, e.start, e.end))
            .collect();
        AgentResult::success(
            format!("Found {} event(s):\n{}", found.len(), lines.join("\n")),
            serde_json::json!({"events": found, "total_count": found.len()}),
        )
    }

    async fn handle_find_free_slots(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &CalendarIntent,
    ) -> AgentResult {
        let now = self.clock.now();
        let window_start = intent
            .time_min
            .as_deref()
            .and_then(parse_rfc3339_utc)
            .unwrap_or(now);
        let window_end = intent
            .time_max
            .as_deref()
            .and_then(parse_rfc3339_utc)
            .unwrap_or_else(|| {
                window_start
                    .checked_add_signed(TimeDelta::days(7))
                    .unwrap_or(window_start)
            });
        let duration = intent.duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES).max(1);

        let query = FreeBusyQuery {
            time_min: window_start.to_rfc3339(),
            time_max: window_end.to_rfc3339(),
            attendees: intent.attendees.clone(),
        };
        let busy = match self.calendar.free_busy(token, &query, ctx.cancel).await {
            Ok(busy) => busy,
            Err(e) => return provider_error_result(&e),
        };

        let slots = compute_free_slots(&busy, window_start, window_end, duration);
        let listing: Vec<serde_json::Value> = slots
            .iter()
            .map(|s| {
                serde_json::json!({
                    "start": s.start.to_rfc3339(),
                    "end": s.end.to_rfc3339(),
                    "duration_minutes": s.duration_minutes,
                })
            })
            .collect();

        let message = if slots.is_empty() {
            format!("No free slots of at least {duration} minutes found in that window.")
        } else {
            let lines: Vec<String> = slots
                .iter()
                .map(|s| format!("- {} to {}", s.start.to_rfc3339(), s.end.to_rfc3339()))
                .collect();
            format!(
                "Found {} free slot(s) of at least {duration} minutes:\n{}",
                slots.len(),
                lines.join("\n")
            )
        };
        AgentResult::success(
            message,
            serde_json::json!({"free_slots": listing, "total_slots": slots.len()}),
        )
    }
}

#[async_trait]
impl Agent for CalendarAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Calendar
    }

    async fn process(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let Some(token) = ctx.provider_token() else {
            return AgentResult::error(
                "Please sign in with Google to access your calendar.",
            );
        };

        let intent = match self.extract_intent(ctx).await {
            Ok(intent) => intent,
            Err(result) => return result,
        };
        info!(action = ?intent.action, "calendar agent dispatching");

        match intent.action {
            CalendarAction::Create => self.handle_create(ctx, token, &intent).await,
            CalendarAction::Update => self.handle_update(ctx, token, &intent).await,
            CalendarAction::Delete => self.handle_delete(ctx, token, &intent).await,
            CalendarAction::ViewAll => self.handle_view_all(ctx, token).await,
            CalendarAction::ViewSpecific => self.handle_view_specific(ctx, token, &intent).await,
            CalendarAction::FindFreeSlots => {
                self.handle_find_free_slots(ctx, token, &intent).await
            }
        }
    }
}

/// Merge busy intervals and emit every gap of at least `duration_minutes`
/// inside the window, capped at [`MAX_FREE_SLOTS`].
pub fn compute_free_slots(
    busy: &[BusyInterval],
    window_start: DateTime<chrono::Utc>,
    window_end: DateTime<chrono::Utc>,
    duration_minutes: i64,
) -> Vec<FreeSlot> {
    let mut sorted: Vec<&BusyInterval> = busy.iter().collect();
    sorted.sort_by_key(|b| b.start);

    let needed = TimeDelta::minutes(duration_minutes);
    let mut slots = Vec::new();
    let mut cursor = window_start;

    for interval in sorted {
        if interval.start > cursor {
            let gap_end = interval.start.min(window_end);
            push_slot_if_long_enough(&mut slots, cursor, gap_end, needed);
        }
        cursor = cursor.max(interval.end);
        if cursor >= window_end {
            break;
        }
    }
    if window_end > cursor {
        push_slot_if_long_enough(&mut slots, cursor, window_end, needed);
    }

    slots.truncate(MAX_FREE_SLOTS);
    slots
}

fn push_slot_if_long_enough(
    slots: &mut Vec<FreeSlot>,
    start: DateTime<chrono::Utc>,
    end: DateTime<chrono::Utc>,
    needed: TimeDelta,
) {
    let gap = end.signed_duration_since(start);
    if gap >= needed {
        slots.push(FreeSlot {
            start,
            end,
            duration_minutes: gap.num_minutes(),
        });
    }
}

/// Add minutes to an RFC-3339 timestamp, preserving its offset style:
/// offset-carrying values keep the offset, naive values stay naive.
fn add_minutes(timestamp: &str, minutes: i64) -> Option<String> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(timestamp) {
        let later = with_offset.checked_add_signed(ChronoDuration::minutes(minutes))?;
        // Keep the original fixed offset in the output.
        return Some(later.to_rfc3339_opts(chrono::SecondsFormat::Secs, false));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, format) {
            let later = naive.checked_add_signed(ChronoDuration::minutes(minutes))?;
            return Some(later.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    None
}

/// Duration of an existing event in minutes, when both ends parse.
fn event_duration_minutes(event: &CalendarEvent) -> Option<i64> {
    let start = parse_rfc3339_utc(&event.start)?;
    let end = parse_rfc3339_utc(&event.end)?;
    let minutes = end.signed_duration_since(start).num_minutes();
    if minutes > 0 {
        Some(minutes)
    } else {
        None
    }
}

fn provider_error_result(error: &ProviderError) -> AgentResult {
    if error.is_auth() {
        AgentResult::error("Please sign in with Google to access your calendar.")
    } else {
        AgentResult::error(format!("Calendar operation failed: {error}"))
    }
}

fn disambiguation_error(event_query: &str, events: &[CalendarEvent]) -> AgentResult {
    let sample: Vec<String> = events
        .iter()
        .take(5)
        .map(|e| format!("- {} ({})", e.title, e.start))
        .collect();
    AgentResult::error(format!(
        "Could not find a matching event for '{event_query}'. \
         Did you mean one of these?\n{}",
        sample.join("\n")
    ))
}
