use std::cmp::Ordering;

use crate::models::agent::Agent;

/// Filter and order discovery candidates, best first.
///
/// Ties on score fall back to name then id so the order is stable across calls.
pub fn rank(candidates: Vec<Agent>, specialization: Option<&str>, limit: usize) -> Vec<Agent> {
    let mut ranked: Vec<Agent> = candidates
        .into_iter()
        .filter(|a| a.is_active())
        .filter(|a| specialization.map_or(true, |s| a.specialization.eq_ignore_ascii_case(s)))
        .collect();

    ranked.sort_by(|a, b| {
        b.performance_metrics
            .score()
            .partial_cmp(&a.performance_metrics.score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::AgentStatus;
    use chrono::Utc;

    fn agent(id: &str, spec: &str, success: f64, avg_ms: f64) -> Agent {
        let mut a = Agent::new(
            id.into(),
            id.into(),
            spec.into(),
            ["sms".to_string()].into_iter().collect(),
            None,
            false,
        );
        a.performance_metrics.success_rate_percent = success;
        a.performance_metrics.average_response_time_ms = avg_ms;
        a.performance_metrics.last_task_time = Some(Utc::now());
        a
    }

    #[test]
    fn test_ranked_by_weighted_score() {
        let ranked = rank(
            vec![
                agent("slow", "general", 100.0, 60_000.0),
                agent("flaky", "general", 50.0, 100.0),
                agent("best", "general", 100.0, 100.0),
            ],
            None,
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["best", "slow", "flaky"]);
    }

    #[test]
    fn test_filters_and_limit() {
        let mut inactive = agent("off", "sms", 100.0, 0.0);
        inactive.status = AgentStatus::Inactive;
        let ranked = rank(
            vec![
                inactive,
                agent("a", "SMS", 90.0, 0.0),
                agent("b", "sms", 80.0, 0.0),
                agent("c", "email", 100.0, 0.0),
            ],
            Some("sms"),
            1,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "a");
    }
}
