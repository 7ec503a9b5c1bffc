//! Integration tests for `src/orchestrator/`.

#[path = "orchestrator/harness.rs"]
mod harness;

#[path = "orchestrator/calendar_scheduling_test.rs"]
mod calendar_scheduling_test;
#[path = "orchestrator/email_send_test.rs"]
mod email_send_test;
#[path = "orchestrator/file_notes_test.rs"]
mod file_notes_test;
#[path = "orchestrator/plan_ordering_test.rs"]
mod plan_ordering_test;
