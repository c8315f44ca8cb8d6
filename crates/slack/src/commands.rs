use std::sync::LazyLock;

use regex::Regex;

use knowbot_agent::selector::DispatchMode;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@[UW][A-Z0-9]+>").expect("valid mention pattern"));

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(hi|hello|hey|howdy|greetings|good\s+(morning|afternoon|evening))(\s+there)?[\s!.,?]*$",
    )
    .expect("valid greeting pattern")
});

static HELP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(help|\?|commands|what\s+can\s+you\s+do)[\s!.?]*$").expect("valid help pattern")
});

static THANKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(thanks|thank\s+you|thx|ty|cheers)(\s+(a\s+lot|so\s+much|again))?[\s!.]*$")
        .expect("valid thanks pattern")
});

static STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(status|ping|health)[\s!.?]*$").expect("valid status pattern")
});

static INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(info|about|kbs|knowledge\s+bases|list\s+kbs)[\s!.?]*$").expect("valid info pattern")
});

static KNOWLEDGE_BASE_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(?:ask\s+)?kb[:\s]\s*([A-Za-z0-9_-]+)(?:\s+(.*))?$")
        .expect("valid knowledge base pattern")
});

static DIRECT_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^direct(?:[:\s]\s*(.*))?$").expect("valid direct pattern")
});

static ASK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^ask(?:\s+(.*))?$").expect("valid ask pattern"));

/// What the user wants, decided from message text alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Help,
    Thanks,
    Status,
    Info,
    EmptyQuestion,
    Ask { question: String, knowledge_base_id: Option<String>, mode: DispatchMode },
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Help => "help",
            Self::Thanks => "thanks",
            Self::Status => "status",
            Self::Info => "info",
            Self::EmptyQuestion => "empty_question",
            Self::Ask { knowledge_base_id: Some(_), .. } => "knowledge_base_query",
            Self::Ask { mode: DispatchMode::DirectModel, .. } => "direct_query",
            Self::Ask { .. } => "query",
        }
    }
}

pub fn strip_mentions(text: &str) -> String {
    MENTION.replace_all(text, "").trim().to_owned()
}

/// Ordered pattern table. The first matching rule wins; plain text falls through to a question.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntentRouter;

impl IntentRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, text: &str) -> Intent {
        let text = strip_mentions(text);

        if GREETING.is_match(&text) {
            return Intent::Greeting;
        }
        if HELP.is_match(&text) {
            return Intent::Help;
        }
        if THANKS.is_match(&text) {
            return Intent::Thanks;
        }
        if STATUS.is_match(&text) {
            return Intent::Status;
        }
        if INFO.is_match(&text) {
            return Intent::Info;
        }
        if let Some(captures) = KNOWLEDGE_BASE_QUERY.captures(&text) {
            let knowledge_base_id = captures.get(1).map(|id| id.as_str().to_owned());
            let question = captures.get(2).map(|question| question.as_str()).unwrap_or_default();
            return question_intent(question, knowledge_base_id, DispatchMode::Auto);
        }
        if let Some(captures) = DIRECT_QUERY.captures(&text) {
            let question = captures.get(1).map(|question| question.as_str()).unwrap_or_default();
            return question_intent(question, None, DispatchMode::DirectModel);
        }
        if let Some(captures) = ASK.captures(&text) {
            let question = captures.get(1).map(|question| question.as_str()).unwrap_or_default();
            return question_intent(question, None, DispatchMode::Auto);
        }

        question_intent(&text, None, DispatchMode::Auto)
    }
}

fn question_intent(question: &str, knowledge_base_id: Option<String>, mode: DispatchMode) -> Intent {
    let question = question.trim();
    if question.is_empty() {
        return Intent::EmptyQuestion;
    }
    Intent::Ask { question: question.to_owned(), knowledge_base_id, mode }
}
