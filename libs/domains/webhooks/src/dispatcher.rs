//! Event → webhook matching.

use crate::models::WebhookRegistration;
use domain_jobs::events::EventEnvelope;

/// Whether an event should be delivered to a registration.
///
/// The event type must be among the webhook's subscribed events, and
/// every declared filter must pass. Filters are strict: a filter on an
/// attribute the event does not carry fails, so a `job_types` filter on
/// a webhook subscribed to worker events delivers nothing rather than
/// everything.
pub fn webhook_matches(webhook: &WebhookRegistration, envelope: &EventEnvelope) -> bool {
    if !webhook.active {
        return false;
    }

    let event_type = envelope.event.event_type();
    if !webhook.events.iter().any(|e| e == event_type) {
        return false;
    }

    let filters = &webhook.filters;

    if let Some(job_types) = &filters.job_types {
        match envelope.event.job_type() {
            Some(job_type) if job_types.iter().any(|t| t == job_type) => {}
            _ => return false,
        }
    }

    if let Some(priorities) = &filters.priorities {
        match envelope.event.priority() {
            Some(priority) if priorities.contains(&priority) => {}
            _ => return false,
        }
    }

    if let Some(worker_ids) = &filters.worker_ids {
        match envelope.event.worker_id() {
            Some(worker_id) if worker_ids.iter().any(|w| w == worker_id) => {}
            _ => return false,
        }
    }

    if let Some(machine_ids) = &filters.machine_ids {
        // Only worker_connected carries a machine id.
        match &envelope.event {
            domain_jobs::events::LifecycleEvent::WorkerConnected { machine_id, .. }
                if machine_ids.iter().any(|m| m == machine_id) => {}
            _ => return false,
        }
    }

    true
}
