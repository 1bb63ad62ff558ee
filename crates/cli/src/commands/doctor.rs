use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use serde::Serialize;
use ticketdesk_core::config::{AppConfig, LoadOptions};
use ticketdesk_db::{connect_with_settings, migrations};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

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
                details: format!(
                    "configuration loaded; {} ticket type(s) configured",
                    config.tickets.types.len()
                ),
            });
            checks.push(check_gateway_token(&config));
            checks.push(check_database(&config));
            checks.push(check_transcript_dir(config.tickets.transcript_dir.as_deref()));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck::skipped("gateway_token_readiness"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("transcript_directory"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail)
        && checks.iter().any(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_gateway_token(config: &AppConfig) -> DoctorCheck {
    let token = config.gateway.token.expose_secret();
    if token.chars().any(char::is_whitespace) {
        return DoctorCheck {
            name: "gateway_token_readiness",
            status: CheckStatus::Fail,
            details: "gateway token contains whitespace".to_string(),
        };
    }

    DoctorCheck {
        name: "gateway_token_readiness",
        status: CheckStatus::Pass,
        details: format!("token present ({} characters)", token.len()),
    }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let versions = migrations::applied_versions(&pool).await;
        pool.close().await;
        versions.map_err(|error| format!("failed to read migration state: {error}"))
    });

    match result {
        Ok(versions) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!(
                "connected using `{}`; {} of {} migration(s) applied",
                config.database.url,
                versions.len(),
                migrations::MIGRATOR
                    .iter()
                    .filter(|migration| migration.migration_type.is_up_migration())
                    .count()
            ),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn check_transcript_dir(directory: Option<&Path>) -> DoctorCheck {
    let Some(directory) = directory else {
        return DoctorCheck {
            name: "transcript_directory",
            status: CheckStatus::Skipped,
            details: "tickets.transcript_dir not set; transcripts go to the database only"
                .to_string(),
        };
    };

    match fs::create_dir_all(directory).and_then(|()| fs::metadata(directory)) {
        Ok(metadata) if !metadata.permissions().readonly() => DoctorCheck {
            name: "transcript_directory",
            status: CheckStatus::Pass,
            details: format!("`{}` is writable", directory.display()),
        },
        Ok(_) => DoctorCheck {
            name: "transcript_directory",
            status: CheckStatus::Fail,
            details: format!("`{}` is read-only", directory.display()),
        },
        Err(error) => DoctorCheck {
            name: "transcript_directory",
            status: CheckStatus::Fail,
            details: format!("`{}` is not usable: {error}", directory.display()),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
