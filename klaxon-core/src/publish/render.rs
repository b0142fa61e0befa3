//! Turn a group flush into per-target notifications.

use std::collections::BTreeMap;

use klaxon_contracts::notification::RenderedNotification;
use klaxon_model::{AlertStatus, GroupKey, Priority, Severity, StoredAlert, Target};

const MAX_BODY_LINES: usize = 20;
const MAX_LINKS: usize = 5;

/// Highest severity among members; drives the job priority.
pub fn max_severity(alerts: &[StoredAlert]) -> Severity {
    alerts
        .iter()
        .filter_map(|stored| stored.alert.severity)
        .max()
        .unwrap_or(Severity::Warning)
}

/// Build the sink-agnostic notification for one target. The body is line
/// oriented; per-sink ceilings are applied by `clamped` at the end.
pub fn render(
    group_key: &GroupKey,
    alerts: &[StoredAlert],
    target: &Target,
) -> RenderedNotification {
    let severity = max_severity(alerts);
    let priority = Priority::from(severity);

    let firing = alerts
        .iter()
        .filter(|stored| stored.alert.status == AlertStatus::Firing)
        .count();
    let resolved = alerts.len() - firing;

    let lead = alerts
        .first()
        .map(|stored| stored.alert.alert_name.as_str())
        .unwrap_or("alerts");
    let title = if alerts.len() == 1 {
        format!("[{}] {}", severity.as_str().to_uppercase(), lead)
    } else {
        format!(
            "[{}] {} (+{} more)",
            severity.as_str().to_uppercase(),
            lead,
            alerts.len() - 1
        )
    };

    let mut lines = Vec::with_capacity(alerts.len().min(MAX_BODY_LINES) + 1);
    for stored in alerts.iter().take(MAX_BODY_LINES) {
        let alert = &stored.alert;
        let summary = alert
            .annotations
            .get("summary")
            .or_else(|| alert.annotations.get("description"))
            .unwrap_or("");
        let instance = alert.labels.get("instance").unwrap_or("");
        let mut line = format!("• {} [{}]", alert.alert_name, alert.status.as_str());
        if !instance.is_empty() {
            line.push_str(&format!(" on {instance}"));
        }
        if stored.occurrence_count > 1 {
            line.push_str(&format!(" ×{}", stored.occurrence_count));
        }
        if !summary.is_empty() {
            line.push_str(&format!(" — {summary}"));
        }
        lines.push(line);
    }
    if alerts.len() > MAX_BODY_LINES {
        lines.push(format!("… and {} more", alerts.len() - MAX_BODY_LINES));
    }

    let mut structured_fields = BTreeMap::new();
    structured_fields.insert("group_key".to_string(), group_key.to_string());
    structured_fields.insert("alert_count".to_string(), alerts.len().to_string());
    structured_fields.insert("firing".to_string(), firing.to_string());
    structured_fields.insert("resolved".to_string(), resolved.to_string());
    structured_fields.insert("severity".to_string(), severity.as_str().to_string());

    let mut links: Vec<String> = alerts
        .iter()
        .filter_map(|stored| stored.alert.generator_url.as_ref())
        .map(|url| url.to_string())
        .collect();
    links.sort();
    links.dedup();
    links.truncate(MAX_LINKS);

    RenderedNotification {
        target_name: target.name.clone(),
        target_type: target.target_type,
        priority,
        title,
        body: lines.join("\n"),
        structured_fields,
        links,
    }
    .clamped()
}
