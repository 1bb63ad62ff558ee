use ticketdesk_db::migrations;

use crate::commands::{with_database, CommandResult};

pub fn run() -> CommandResult {
    with_database("migrate", |pool| async move {
        match migrations::applied_versions(&pool).await {
            Ok(versions) => CommandResult::success(
                "migrate",
                format!("applied pending migrations; schema versions {versions:?}"),
            ),
            Err(error) => CommandResult::failure("migrate", "migration", error.to_string(), 5),
        }
    })
}
