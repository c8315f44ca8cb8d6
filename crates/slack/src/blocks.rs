use serde::Serialize;

use knowbot_core::config::KnowledgeBaseConfig;
use knowbot_core::domain::query::BackendResponse;

pub const THINKING_TEXT: &str = "🤔 Thinking...";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    /// Plain mrkdwn rendering for surfaces that only accept text.
    pub fn render_text(&self) -> String {
        if self.blocks.is_empty() {
            return self.fallback_text.clone();
        }

        self.blocks
            .iter()
            .map(|block| match block {
                Block::Section { text, .. } => text.text().to_owned(),
                Block::Context { elements, .. } => {
                    elements.iter().map(|element| format!("_{}_", element.text())).collect::<Vec<_>>().join(" ")
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub fn greeting_message(user_id: &str) -> MessageTemplate {
    MessageBuilder::new("Hello! Ask me anything about our knowledge base.")
        .section("kb.greeting.v1", |section| {
            section.mrkdwn(format!(
                "👋 Hi <@{user_id}>! Ask me anything about our documentation and I'll search the knowledge base for you."
            ));
        })
        .build()
}

pub fn help_message() -> MessageTemplate {
    MessageBuilder::new("Knowledge base assistant help")
        .section("kb.help.summary.v1", |section| {
            section.mrkdwn(
                "*How to ask me things*\n\
                 • Mention me or send a DM with your question\n\
                 • `ask <question>` asks across the configured knowledge bases\n\
                 • `kb:<id> <question>` asks one specific knowledge base\n\
                 • `direct: <question>` skips the knowledge base and asks the model\n\
                 • `status` shows backend status, `kbs` lists knowledge bases",
            );
        })
        .context("kb.help.context.v1", |context| {
            context.plain("Answers from the knowledge base include a numbered Sources list.");
        })
        .build()
}

pub fn thanks_message() -> MessageTemplate {
    MessageBuilder::new("You're welcome!")
        .section("kb.thanks.v1", |section| {
            section.plain("😊 You're welcome! Let me know if there's anything else I can look up.");
        })
        .build()
}

pub fn status_message(agent_configured: bool, model: &str, knowledge_base_count: usize) -> MessageTemplate {
    let agent = if agent_configured { "✅ configured" } else { "⚪ not configured (model only)" };
    MessageBuilder::new("Assistant status")
        .section("kb.status.v1", |section| {
            section.mrkdwn(format!(
                "*Status*\n• Knowledge base agent: {agent}\n• Model: `{model}`\n• Knowledge bases: {knowledge_base_count}"
            ));
        })
        .build()
}

pub fn knowledge_base_info_message(knowledge_bases: &KnowledgeBaseConfig) -> MessageTemplate {
    if knowledge_bases.ids.is_empty() {
        return MessageBuilder::new("No knowledge bases configured")
            .section("kb.info.empty.v1", |section| {
                section.plain("No knowledge bases are configured. Questions go straight to the model.");
            })
            .build();
    }

    let lines = knowledge_bases
        .ids
        .iter()
        .enumerate()
        .map(|(index, id)| {
            let description = knowledge_bases
                .entries
                .iter()
                .find(|entry| entry.id == *id)
                .and_then(|entry| entry.description.as_deref())
                .map(|description| format!(" - {description}"))
                .unwrap_or_default();
            format!("{}. *{}* (`{id}`){description}", index + 1, knowledge_bases.display_name(id))
        })
        .collect::<Vec<_>>()
        .join("\n");

    MessageBuilder::new("Configured knowledge bases")
        .section("kb.info.list.v1", |section| {
            section.mrkdwn(format!("📚 *Knowledge bases* (searched in this order)\n{lines}"));
        })
        .context("kb.info.context.v1", |context| {
            context.mrkdwn("Use `kb:<id> <question>` to ask a single knowledge base.");
        })
        .build()
}

pub fn empty_question_message() -> MessageTemplate {
    MessageBuilder::new("What would you like to know?")
        .section("kb.empty_question.v1", |section| {
            section.mrkdwn("🤷 What would you like to know? Try `ask how do I request time off?`");
        })
        .build()
}

pub fn welcome_message(user_id: &str) -> MessageTemplate {
    MessageBuilder::new(format!("Welcome <@{user_id}>!"))
        .section("kb.welcome.v1", |section| {
            section.mrkdwn(format!(
                "🎉 Welcome <@{user_id}>! Mention me with a question any time, or say `help` to see what I can do."
            ));
        })
        .build()
}

pub fn feedback_message(positive: bool) -> MessageTemplate {
    let (fallback, text) = if positive {
        ("Thanks for the feedback!", "🙏 Thanks for the feedback! Glad that answer helped.")
    } else {
        ("Sorry that wasn't helpful.", "😔 Sorry that wasn't helpful. Try rephrasing, or ask a specific knowledge base with `kb:<id>`.")
    };
    MessageBuilder::new(fallback)
        .section("kb.feedback.v1", |section| {
            section.plain(text);
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("kb.error.summary.v1", |section| {
            section.mrkdwn(format!("❌ {summary}"));
        })
        .context("kb.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

/// Wraps an orchestrator answer. A failed response already carries its `❌` user message.
pub fn answer_message(response: &BackendResponse) -> MessageTemplate {
    let text = if response.is_usable() {
        response.response_text.clone()
    } else {
        response
            .error_message
            .clone()
            .unwrap_or_else(|| "❌ No answer was produced. Please try again.".to_owned())
    };

    MessageBuilder::new(text.clone())
        .section("kb.answer.v1", |section| {
            section.mrkdwn(text);
        })
        .build()
}

#[cfg(test)]
mod tests {
    use knowbot_core::config::{KnowledgeBaseConfig, KnowledgeBaseEntry};
    use knowbot_core::domain::query::{BackendKind, BackendResponse};

    use super::{
        answer_message, error_message, feedback_message, knowledge_base_info_message, status_message, Block,
        MessageBuilder, TextObject,
    };

    #[test]
    fn message_builder_creates_typed_block_structure() {
        let message = MessageBuilder::new("fallback")
            .section("kb.summary.v1", |section| {
                section.mrkdwn("*Summary*");
            })
            .context("kb.summary.context.v1", |context| {
                context.plain("footnote");
            })
            .build();

        assert_eq!(message.blocks.len(), 2);
        assert!(matches!(
            &message.blocks[0],
            Block::Section { block_id, text: TextObject::Mrkdwn { .. } } if block_id == "kb.summary.v1"
        ));
        assert_eq!(message.render_text(), "*Summary*\n\n_footnote_");
    }

    #[test]
    fn blocks_serialize_with_slack_type_tags() {
        let message = MessageBuilder::new("x")
            .section("s", |section| {
                section.plain("hi");
            })
            .build();
        let json = serde_json::to_value(&message.blocks).expect("serialize");

        assert_eq!(json[0]["type"], "section");
        assert_eq!(json[0]["text"]["type"], "plain");
    }

    #[test]
    fn error_template_contains_correlation_id() {
        let message = error_message("Cannot process request", "req-123");
        let Block::Context { elements, .. } = &message.blocks[1] else {
            panic!("expected context block");
        };
        assert!(matches!(
            elements.first(),
            Some(TextObject::Plain { text }) if text.contains("req-123")
        ));
        assert!(message.render_text().starts_with("❌ Cannot process request"));
    }

    #[test]
    fn info_lists_knowledge_bases_in_priority_order_with_names() {
        let config = KnowledgeBaseConfig {
            ids: vec!["KB-HR".to_owned(), "KB-ENG".to_owned()],
            entries: vec![KnowledgeBaseEntry {
                id: "KB-ENG".to_owned(),
                name: "Engineering".to_owned(),
                description: Some("runbooks".to_owned()),
            }],
        };

        let text = knowledge_base_info_message(&config).render_text();
        assert!(text.contains("1. *KB-HR* (`KB-HR`)"));
        assert!(text.contains("2. *Engineering* (`KB-ENG`) - runbooks"));
        assert!(knowledge_base_info_message(&KnowledgeBaseConfig::default())
            .render_text()
            .contains("No knowledge bases"));
    }

    #[test]
    fn status_reports_model_only_mode() {
        let text = status_message(false, "llama3.1", 0).render_text();
        assert!(text.contains("not configured"));
        assert!(text.contains("`llama3.1`"));
    }

    #[test]
    fn answer_uses_error_message_for_failed_responses() {
        let failed = BackendResponse::failure(BackendKind::Model, "❌ down");
        assert_eq!(answer_message(&failed).render_text(), "❌ down");

        let ok = BackendResponse::success(BackendKind::Agent, "answer", Vec::new());
        assert_eq!(answer_message(&ok).fallback_text, "answer");
        assert_ne!(feedback_message(true), feedback_message(false));
    }
}
