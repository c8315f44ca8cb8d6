use knowbot_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

use super::escape_json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 3] = ["slack_token_readiness", "agent_configuration", "model_configuration"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_owned(),
            });
            checks.push(check_slack_tokens(&config));
            checks.push(check_agent(&config));
            checks.push(check_model(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.iter().map(|&name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_owned(),
            }));
        }
    }

    let any_failed = checks.iter().any(|check| matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped));
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_owned()
    } else {
        "doctor: all readiness checks passed".to_owned()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_slack_tokens(config: &AppConfig) -> DoctorCheck {
    let (status, details) = match &config.slack.signing_secret {
        Some(_) => (CheckStatus::Pass, "bot token format validated; events api requests will be signature-checked"),
        None => (CheckStatus::Warn, "bot token format validated; no signing secret, events api requests are not verified"),
    };
    DoctorCheck { name: "slack_token_readiness", status, details: details.to_owned() }
}

fn check_agent(config: &AppConfig) -> DoctorCheck {
    if config.agent.is_configured() {
        return DoctorCheck {
            name: "agent_configuration",
            status: CheckStatus::Pass,
            details: format!(
                "agent `{}` alias `{}`; {} knowledge base(s) in priority order",
                config.agent.agent_id,
                config.agent.alias_id,
                config.knowledge_bases.ids.len()
            ),
        };
    }

    DoctorCheck {
        name: "agent_configuration",
        status: CheckStatus::Warn,
        details: "agent id, alias, or base_url unset; every question goes to the direct model".to_owned(),
    }
}

fn check_model(config: &AppConfig) -> DoctorCheck {
    DoctorCheck {
        name: "model_configuration",
        status: CheckStatus::Pass,
        details: format!("`{}` via {}", config.model.model, config.model.base_url),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
