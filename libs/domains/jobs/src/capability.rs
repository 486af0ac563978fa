//! Structural capability predicate.
//!
//! Decides whether a job can run on a worker by walking the job's
//! requirement tree against the worker's capability document. The claim
//! script in `matcher` evaluates the same rules inside Redis; this Rust
//! version backs unit tests, submission-time diagnostics and the
//! forensics "why is this job still pending" view. The two must stay in
//! lockstep.
//!
//! Rules:
//! - `service_required` must be in the worker's `services` list.
//! - Every hardware minimum (unless `"all"`) must be met numerically.
//! - `customer_isolation: strict` requires the worker to advertise strict;
//!   allow/deny lists apply whenever the job carries a `customer_id`.
//! - Every required model must exist in `models[service_required]`.
//! - Any other requirement key resolves by dotted-path lookup: numbers
//!   compare with `>=`, arrays require subset containment, objects recurse
//!   member-wise, everything else compares for equality. A path missing on
//!   the worker is a non-match.

use crate::models::{CustomerIsolation, Job, ModelsRequirement};
use serde_json::Value;

/// Evaluate the full predicate: does `worker` (a capability document from
/// [`crate::models::WorkerInfo::capability_document`]) satisfy `job`?
pub fn requirements_match(job: &Job, worker: &Value) -> bool {
    if !service_supported(&job.service_required, worker) {
        return false;
    }

    let requirements = &job.requirements;

    if let Some(hardware) = &requirements.hardware {
        for (field, minimum) in hardware {
            if minimum == "all" {
                continue;
            }
            let Some(required) = minimum.as_f64() else {
                return false;
            };
            let actual = worker
                .pointer(&format!("/hardware/{}", field))
                .and_then(Value::as_f64);
            match actual {
                Some(actual) if actual >= required => {}
                _ => return false,
            }
        }
    }

    if !isolation_allows(requirements.customer_isolation, job.customer_id.as_deref(), worker) {
        return false;
    }

    if let Some(models) = &requirements.models {
        if !models.is_all() {
            let Some(required) = models.as_list() else {
                return false;
            };
            let available = worker
                .pointer(&format!("/models/{}", job.service_required))
                .and_then(Value::as_array);
            let Some(available) = available else {
                return false;
            };
            for model in required {
                if !available.iter().any(|m| m.as_str() == Some(model)) {
                    return false;
                }
            }
        }
    }

    for (key, required) in &requirements.extra {
        let actual = lookup_dotted(worker, key);
        match actual {
            Some(actual) => {
                if !value_satisfies(actual, required) {
                    return false;
                }
            }
            None => return false,
        }
    }

    true
}

fn service_supported(service: &str, worker: &Value) -> bool {
    worker
        .get("services")
        .and_then(Value::as_array)
        .map(|services| services.iter().any(|s| s.as_str() == Some(service)))
        .unwrap_or(false)
}

fn isolation_allows(
    required: Option<CustomerIsolation>,
    customer_id: Option<&str>,
    worker: &Value,
) -> bool {
    let advertised = worker
        .pointer("/customer_access/isolation")
        .and_then(Value::as_str)
        .unwrap_or("none");

    if required == Some(CustomerIsolation::Strict) && advertised != "strict" {
        return false;
    }

    // Allow/deny lists are enforced whenever the job names a customer,
    // regardless of the isolation level requested.
    if let Some(customer) = customer_id {
        let denied = worker
            .pointer("/customer_access/denied_customers")
            .and_then(Value::as_array);
        if let Some(denied) = denied {
            if denied.iter().any(|c| c.as_str() == Some(customer)) {
                return false;
            }
        }

        let allowed = worker
            .pointer("/customer_access/allowed_customers")
            .and_then(Value::as_array);
        if let Some(allowed) = allowed {
            // A non-empty allow list is a whitelist.
            if !allowed.is_empty() && !allowed.iter().any(|c| c.as_str() == Some(customer)) {
                return false;
            }
        }
    }

    true
}

/// Resolve a possibly-dotted requirement key against the capability tree.
fn lookup_dotted<'a>(worker: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = worker;
    for segment in key.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Structural comparison of one requirement value against the worker's.
fn value_satisfies(actual: &Value, required: &Value) -> bool {
    match required {
        Value::Number(required) => match (actual.as_f64(), required.as_f64()) {
            (Some(actual), Some(required)) => actual >= required,
            _ => false,
        },
        Value::Array(required) => {
            let Some(actual) = actual.as_array() else {
                return false;
            };
            required.iter().all(|item| actual.contains(item))
        }
        Value::Object(required) => required.iter().all(|(k, v)| match actual.get(k) {
            Some(actual) => value_satisfies(actual, v),
            None => false,
        }),
        _ => actual == required,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerAccess, JobSubmission, WorkerInfo};
    use serde_json::json;

    fn worker_with(services: &[&str]) -> WorkerInfo {
        let mut worker = WorkerInfo::new("w1", "m1");
        worker.services = services.iter().map(|s| s.to_string()).collect();
        worker
    }

    fn job_for(service: &str, requirements: serde_json::Value) -> Job {
        JobSubmission::new(service)
            .with_requirements(serde_json::from_value(requirements).unwrap())
            .into_job(50, 3)
    }

    #[test]
    fn test_service_gating() {
        let worker = worker_with(&["comfyui"]).capability_document();
        assert!(requirements_match(&job_for("comfyui", json!({})), &worker));
        assert!(!requirements_match(&job_for("a1111", json!({})), &worker));
    }

    #[test]
    fn test_hardware_gating() {
        let mut worker = worker_with(&["comfyui"]);
        worker.hardware.insert("gpu_memory_gb".into(), json!(24));
        worker.hardware.insert("cpu_cores".into(), json!(16));
        let doc = worker.capability_document();

        let fits = job_for("comfyui", json!({"hardware": {"gpu_memory_gb": 24}}));
        assert!(requirements_match(&fits, &doc));

        let too_big = job_for("comfyui", json!({"hardware": {"gpu_memory_gb": 48}}));
        assert!(!requirements_match(&too_big, &doc));

        let missing_field = job_for("comfyui", json!({"hardware": {"ram_gb": 8}}));
        assert!(!requirements_match(&missing_field, &doc));
    }

    #[test]
    fn test_hardware_all_sentinel_disables_check() {
        let worker = worker_with(&["comfyui"]).capability_document();
        let job = job_for("comfyui", json!({"hardware": {"gpu_memory_gb": "all"}}));
        assert!(requirements_match(&job, &worker));
    }

    #[test]
    fn test_model_gating() {
        let mut worker = worker_with(&["comfyui"]);
        worker
            .models
            .insert("comfyui".into(), vec!["sdxl".into(), "sd15".into()]);
        let doc = worker.capability_document();

        let missing = job_for("comfyui", json!({"models": ["sdxl", "controlnet"]}));
        assert!(!requirements_match(&missing, &doc));

        let mut capable = worker_with(&["comfyui"]);
        capable.models.insert(
            "comfyui".into(),
            vec!["sdxl".into(), "controlnet".into(), "sd15".into()],
        );
        assert!(requirements_match(&missing, &capable.capability_document()));
    }

    #[test]
    fn test_models_all_sentinel() {
        let worker = worker_with(&["comfyui"]).capability_document();
        let job = job_for("comfyui", json!({"models": "all"}));
        assert!(requirements_match(&job, &worker));
    }

    #[test]
    fn test_strict_isolation_requires_strict_worker() {
        let mut loose = worker_with(&["comfyui"]);
        loose.customer_access = CustomerAccess {
            isolation: CustomerIsolation::Loose,
            allowed_customers: vec!["C1".into()],
            denied_customers: vec![],
        };

        let mut job = job_for("comfyui", json!({"customer_isolation": "strict"}));
        job.customer_id = Some("C1".into());

        // Loose worker never satisfies strict, even with C1 allowed.
        assert!(!requirements_match(&job, &loose.capability_document()));

        let mut strict = worker_with(&["comfyui"]);
        strict.customer_access.isolation = CustomerIsolation::Strict;
        assert!(requirements_match(&job, &strict.capability_document()));
    }

    #[test]
    fn test_customer_deny_list() {
        let mut worker = worker_with(&["comfyui"]);
        worker.customer_access.denied_customers = vec!["C2".into()];
        let doc = worker.capability_document();

        let mut job = job_for("comfyui", json!({}));
        job.customer_id = Some("C2".into());
        assert!(!requirements_match(&job, &doc));

        job.customer_id = Some("C3".into());
        assert!(requirements_match(&job, &doc));
    }

    #[test]
    fn test_customer_allow_list_is_whitelist_when_nonempty() {
        let mut worker = worker_with(&["comfyui"]);
        worker.customer_access.allowed_customers = vec!["C1".into()];
        let doc = worker.capability_document();

        let mut job = job_for("comfyui", json!({}));
        job.customer_id = Some("C1".into());
        assert!(requirements_match(&job, &doc));

        job.customer_id = Some("C9".into());
        assert!(!requirements_match(&job, &doc));
    }

    #[test]
    fn test_extra_key_numeric_ge() {
        let mut worker = worker_with(&["sim"]);
        worker.custom.insert("max_batch".into(), json!(8));
        let doc = worker.capability_document();

        assert!(requirements_match(&job_for("sim", json!({"max_batch": 4})), &doc));
        assert!(!requirements_match(&job_for("sim", json!({"max_batch": 16})), &doc));
    }

    #[test]
    fn test_extra_key_array_subset() {
        let mut worker = worker_with(&["sim"]);
        worker
            .custom
            .insert("features".into(), json!(["lora", "upscale", "inpaint"]));
        let doc = worker.capability_document();

        assert!(requirements_match(
            &job_for("sim", json!({"features": ["lora", "inpaint"]})),
            &doc
        ));
        assert!(!requirements_match(
            &job_for("sim", json!({"features": ["video"]})),
            &doc
        ));
    }

    #[test]
    fn test_extra_key_dotted_path_and_object_walk() {
        let mut worker = worker_with(&["sim"]);
        worker.custom.insert(
            "region".into(),
            json!({"zone": "us-east", "tier": {"level": 3}}),
        );
        let doc = worker.capability_document();

        // Dotted-path lookup.
        assert!(requirements_match(
            &job_for("sim", json!({"region.zone": "us-east"})),
            &doc
        ));
        // Member-wise object comparison with nested numeric >=.
        assert!(requirements_match(
            &job_for("sim", json!({"region": {"tier": {"level": 2}}})),
            &doc
        ));
        assert!(!requirements_match(
            &job_for("sim", json!({"region": {"tier": {"level": 4}}})),
            &doc
        ));
    }

    #[test]
    fn test_extra_key_missing_on_worker_is_no_match() {
        let doc = worker_with(&["sim"]).capability_document();
        assert!(!requirements_match(
            &job_for("sim", json!({"accelerator": "tpu"})),
            &doc
        ));
    }
}
