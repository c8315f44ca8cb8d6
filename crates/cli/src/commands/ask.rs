use knowbot_agent::runtime::AgentRuntime;
use knowbot_agent::selector::DispatchMode;
use knowbot_core::config::{AppConfig, LoadOptions};
use knowbot_core::domain::citation::Citation;
use knowbot_core::domain::query::{BackendKind, BackendResponse, Query};
use serde::Serialize;

use super::{serialize_payload, CommandResult};

const COMMAND: &str = "ask";
const CLI_USER_ID: &str = "cli";
const CLI_CHANNEL_ID: &str = "cli";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AskRequest {
    pub question: String,
    pub knowledge_bases: Vec<String>,
    pub direct: bool,
}

#[derive(Debug, Serialize)]
struct AskOutcome<'a> {
    command: &'static str,
    status: &'static str,
    backend: BackendKind,
    answer: &'a str,
    citations: &'a [Citation],
    error_message: Option<&'a str>,
}

pub fn run(request: AskRequest) -> CommandResult {
    if request.question.trim().is_empty() {
        return CommandResult::failure(COMMAND, "invalid_input", "question must not be empty", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match AgentRuntime::from_config(&config) {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure(COMMAND, "backend_setup", error.to_string(), 3),
    };

    let executor = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(executor) => executor,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    executor.block_on(execute(&runtime, &request))
}

/// `--direct` wins over `--kb`; otherwise the given ids (or the configured list) are searched in order.
pub async fn execute(runtime: &AgentRuntime, request: &AskRequest) -> CommandResult {
    let query = Query::new(request.question.trim(), CLI_USER_ID, CLI_CHANNEL_ID);

    let response = if request.direct {
        runtime.query(&query, DispatchMode::DirectModel).await
    } else if request.knowledge_bases.is_empty() {
        runtime.query_knowledge_bases(&query, None).await
    } else {
        runtime.query_knowledge_bases(&query, Some(&request.knowledge_bases)).await
    };

    render(&response)
}

fn render(response: &BackendResponse) -> CommandResult {
    let usable = response.is_usable();
    let payload = AskOutcome {
        command: COMMAND,
        status: if usable { "ok" } else { "error" },
        backend: response.source_backend,
        answer: &response.response_text,
        citations: response.citations.as_slice(),
        error_message: response.error_message.as_deref(),
    };

    CommandResult { exit_code: if usable { 0 } else { 4 }, output: serialize_payload(&payload) }
}
