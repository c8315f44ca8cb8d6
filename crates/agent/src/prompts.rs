use knowbot_core::domain::query::Query;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions from \
a team in Slack. Answer clearly and concisely using Slack mrkdwn formatting. If you are not sure \
of an answer, say so instead of guessing.";

pub fn system_prompt(configured: Option<&str>, knowledge_base_id: Option<&str>) -> String {
    let base = configured.map(str::trim).filter(|prompt| !prompt.is_empty()).unwrap_or(DEFAULT_SYSTEM_PROMPT);
    match knowledge_base_id {
        Some(id) => format!(
            "{base}\nThe user asked about knowledge base `{id}`. Focus the answer on that topic area."
        ),
        None => base.to_owned(),
    }
}

pub fn agent_input(query: &Query) -> String {
    match &query.knowledge_base_id {
        Some(id) => format!("Using knowledge base {id}: {}", query.question_text),
        None => query.question_text.clone(),
    }
}
