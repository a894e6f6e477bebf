use serde::Serialize;

use mockops_core::config::ReactionNames;
use mockops_core::domain::ticket::{Comment, StatusChange, Ticket, TicketStatus};
use mockops_core::text::truncate_chars;
use mockops_core::tracker::{ThreadTranscript, TicketAction};

/// Slack rejects a section whose text is longer than this with `invalid_blocks`.
pub const SECTION_TEXT_LIMIT: usize = 3000;
/// Slack allows at most 50 blocks per message; transcripts stay well under it.
pub const TRANSCRIPT_MAX_SECTIONS: usize = 40;
pub const SUMMARY_MAX_CHARS: usize = 1000;
pub const COMMENTS_ADDED_MAX_PREVIEWS: usize = 15;
pub const COMMENT_PREVIEW_CHARS: usize = 50;
pub const DETAIL_MAX_COMMENTS: usize = 5;
pub const LIST_MAX_ROWS: usize = 20;

pub const SUMMARY_BLOCK_ID: &str = "ticket_summary_block";
pub const SUMMARY_INPUT_ID: &str = "ticket_summary_input";
pub const SUMMARY_SUBMIT_ACTION: &str = "ticket.summary.submit.v1";
pub const SUMMARY_CANCEL_ACTION: &str = "ticket.summary.cancel.v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
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
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputElement {
    PlainTextInput {
        action_id: String,
        multiline: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        placeholder: Option<TextObject>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
    Input { block_id: String, label: TextObject, element: InputElement, optional: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
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

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
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

    pub fn text_input(
        mut self,
        block_id: impl Into<String>,
        action_id: impl Into<String>,
        label: impl Into<String>,
        placeholder: Option<&str>,
        max_length: Option<usize>,
    ) -> Self {
        self.blocks.push(Block::Input {
            block_id: block_id.into(),
            label: TextObject::plain(label),
            element: InputElement::PlainTextInput {
                action_id: action_id.into(),
                multiline: true,
                placeholder: placeholder.map(TextObject::plain),
                max_length,
            },
            optional: false,
        });
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

    /// Text longer than [`SECTION_TEXT_LIMIT`] is cut so the block stays postable.
    fn build(self) -> TextObject {
        match self.text {
            Some(TextObject::Plain { text }) => TextObject::plain(truncate_chars(&text, SECTION_TEXT_LIMIT)),
            Some(TextObject::Mrkdwn { text }) => {
                TextObject::mrkdwn(truncate_chars(&text, SECTION_TEXT_LIMIT))
            }
            None => TextObject::plain(""),
        }
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
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

fn status_icon(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => ":memo:",
        TicketStatus::InReview => ":arrows_counterclockwise:",
        TicketStatus::Closed => ":white_check_mark:",
    }
}

fn key_link(ticket: &Ticket, browse_url: &str) -> String {
    format!("<{browse_url}|{}>", ticket.key)
}

fn comment_preview(comment: &Comment) -> String {
    format!("• *{}*: {}", comment.author_name, truncate_chars(&comment.text, COMMENT_PREVIEW_CHARS))
}

fn change_line(label: &str, change: &StatusChange) -> String {
    let when = change.at.format("%Y-%m-%d %H:%M UTC");
    match &change.summary {
        Some(summary) => format!("*{label}:* <@{}> on {when}\n>{summary}", change.actor),
        None => format!("*{label}:* <@{}> on {when}", change.actor),
    }
}

pub fn ticket_created_message(
    ticket: &Ticket,
    browse_url: &str,
    reactions: &ReactionNames,
) -> MessageTemplate {
    MessageBuilder::new(format!("Created ticket {}: {}", ticket.key, ticket.title))
        .section("ticket.created.header.v1", |section| {
            section.mrkdwn(format!(
                "{} Created mock ticket *{}*",
                status_icon(ticket.status),
                key_link(ticket, browse_url)
            ));
        })
        .section("ticket.created.details.v1", |section| {
            section.mrkdwn(format!(
                "*Title:* {}\n*Status:* {}\n*Reporter:* <@{}>",
                ticket.title,
                ticket.status.label(),
                ticket.created_by
            ));
        })
        .context("ticket.created.hint.v1", |context| {
            context.mrkdwn(format!(
                "Reply in this thread and react with :{}: on a reply to capture comments. \
                 :{}: moves the ticket to review, :{}: closes it.",
                reactions.comment, reactions.review, reactions.close
            ));
        })
        .build()
}

pub fn ticket_transition_message(ticket: &Ticket, browse_url: &str) -> MessageTemplate {
    let change = match ticket.status {
        TicketStatus::InReview => ticket.review.as_ref(),
        TicketStatus::Closed => ticket.closure.as_ref(),
        TicketStatus::Open => None,
    };
    let actor = change.map(|change| format!(" (set by <@{}>)", change.actor)).unwrap_or_default();
    let headline = match ticket.status {
        TicketStatus::Closed => format!(
            "{} {} has been *Closed*{actor}",
            status_icon(ticket.status),
            key_link(ticket, browse_url)
        ),
        status => format!(
            "{} {} is now *{}*{actor}",
            status_icon(status),
            key_link(ticket, browse_url),
            status.label()
        ),
    };

    let mut builder = MessageBuilder::new(format!("{} is now {}", ticket.key, ticket.status.label()))
        .section("ticket.transition.header.v1", |section| {
            section.mrkdwn(headline);
        });
    if let Some(summary) = change.and_then(|change| change.summary.as_deref()) {
        builder = builder.section("ticket.transition.summary.v1", |section| {
            section.mrkdwn(format!("*Summary:* {}", truncate_chars(summary, SUMMARY_MAX_CHARS)));
        });
    }
    builder.build()
}

pub fn comments_added_message(
    ticket: &Ticket,
    added: &[Comment],
    browse_url: &str,
) -> MessageTemplate {
    let noun = if added.len() == 1 { "comment" } else { "comments" };
    let mut previews = added
        .iter()
        .take(COMMENTS_ADDED_MAX_PREVIEWS)
        .map(comment_preview)
        .collect::<Vec<_>>()
        .join("\n");
    let hidden = added.len().saturating_sub(COMMENTS_ADDED_MAX_PREVIEWS);
    if hidden > 0 {
        previews.push_str(&format!("\n…and {hidden} more"));
    }

    MessageBuilder::new(format!("Added {} user {noun} to {}", added.len(), ticket.key))
        .section("ticket.comments.header.v1", |section| {
            section.mrkdwn(format!(
                ":speech_balloon: Added {} user {noun} to *{}*",
                added.len(),
                key_link(ticket, browse_url)
            ));
        })
        .section("ticket.comments.preview.v1", |section| {
            section.mrkdwn(previews);
        })
        .context("ticket.comments.total.v1", |context| {
            context.plain(format!("{} comments on this ticket", ticket.comments.len()));
        })
        .build()
}

pub fn ticket_detail_message(ticket: &Ticket, browse_url: &str) -> MessageTemplate {
    let mut details = format!(
        "*Title:* {}\n*Status:* {}\n*Reporter:* <@{}>\n*Created:* {}",
        ticket.title,
        ticket.status.label(),
        ticket.created_by,
        ticket.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(review) = &ticket.review {
        details.push('\n');
        details.push_str(&change_line("Reviewed", review));
    }
    if let Some(closure) = &ticket.closure {
        details.push('\n');
        details.push_str(&change_line("Closed", closure));
    }

    let comments = if ticket.comments.is_empty() {
        "_No comments yet._".to_owned()
    } else {
        let skip = ticket.comments.len().saturating_sub(DETAIL_MAX_COMMENTS);
        let recent =
            ticket.comments.iter().skip(skip).map(comment_preview).collect::<Vec<_>>().join("\n");
        format!("*Comments ({}):*\n{recent}", ticket.comments.len())
    };

    MessageBuilder::new(format!("{} [{}] {}", ticket.key, ticket.status.label(), ticket.title))
        .section("ticket.detail.header.v1", |section| {
            section.mrkdwn(format!("{} *{}*", status_icon(ticket.status), key_link(ticket, browse_url)));
        })
        .section("ticket.detail.fields.v1", |section| {
            section.mrkdwn(details);
        })
        .section("ticket.detail.comments.v1", |section| {
            section.mrkdwn(comments);
        })
        .build()
}

pub fn ticket_list_message<F>(
    tickets: &[Ticket],
    filter: Option<TicketStatus>,
    browse_url: F,
) -> MessageTemplate
where
    F: Fn(&Ticket) -> String,
{
    let scope = filter.map(|status| status.label().to_owned()).unwrap_or_else(|| "All".to_owned());
    if tickets.is_empty() {
        return notice_message(
            "ticket.list.empty.v1",
            &format!("No tickets found ({} tickets).", scope.to_lowercase()),
        );
    }

    let rows = tickets
        .iter()
        .take(LIST_MAX_ROWS)
        .map(|ticket| {
            format!(
                "{} {} `{}` {}",
                status_icon(ticket.status),
                key_link(ticket, &browse_url(ticket)),
                ticket.status.label(),
                truncate_chars(&ticket.title, COMMENT_PREVIEW_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    MessageBuilder::new(format!("{scope} tickets: {}", tickets.len()))
        .section("ticket.list.header.v1", |section| {
            section.mrkdwn(format!("*{scope} tickets*"));
        })
        .section("ticket.list.rows.v1", |section| {
            section.mrkdwn(rows);
        })
        .build()
}

pub fn summary_form_message(ticket: &Ticket, action: TicketAction, value: &str) -> MessageTemplate {
    let (verb, label) = match action {
        TicketAction::Review => ("review", "Review summary"),
        TicketAction::Close => ("close", "Closure summary"),
    };

    MessageBuilder::new(format!("Add a {verb} summary for {}", ticket.key))
        .section("ticket.summary.header.v1", |section| {
            section.mrkdwn(format!("Add a {verb} summary for *{}* ({})", ticket.key, ticket.title));
        })
        .text_input(
            SUMMARY_BLOCK_ID,
            SUMMARY_INPUT_ID,
            label,
            Some("What happened?"),
            Some(SUMMARY_MAX_CHARS),
        )
        .actions("ticket.summary.actions.v1", |actions| {
            actions
                .button(
                    ButtonElement::new(SUMMARY_SUBMIT_ACTION, "Submit")
                        .style(ButtonStyle::Primary)
                        .value(value),
                )
                .button(ButtonElement::new(SUMMARY_CANCEL_ACTION, "Cancel").value(value));
        })
        .build()
}

fn transcript_entry(index: usize, author: &str, when: &str, text: &str) -> String {
    format!("[{index}] {author} - {when}\n{text}\n")
}

/// Packs entries into code-block sections that each fit [`SECTION_TEXT_LIMIT`].
fn transcript_sections(entries: &[String]) -> Vec<String> {
    const FENCE: &str = "```";
    let budget = SECTION_TEXT_LIMIT - 2 * (FENCE.len() + 1);

    let mut sections = Vec::new();
    let mut current = String::new();
    for entry in entries {
        let entry = truncate_chars(entry, budget);
        if !current.is_empty() && current.chars().count() + entry.chars().count() + 1 > budget {
            sections.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&entry);
    }
    if !current.is_empty() {
        sections.push(current);
    }

    sections.into_iter().map(|body| format!("{FENCE}\n{body}\n{FENCE}")).collect()
}

pub fn thread_transcript_message(transcript: &ThreadTranscript, browse_url: &str) -> MessageTemplate {
    let ticket = &transcript.ticket;
    let count = transcript.entries.len();
    let noun = if count == 1 { "message" } else { "messages" };
    let entries = transcript
        .entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let when = entry
                .posted_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "Unknown Time".to_owned());
            transcript_entry(index + 1, &entry.author_name, &when, &entry.text)
        })
        .collect::<Vec<_>>();
    let mut sections = transcript_sections(&entries);
    let dropped = sections.len().saturating_sub(TRANSCRIPT_MAX_SECTIONS);
    sections.truncate(TRANSCRIPT_MAX_SECTIONS);

    let mut builder = MessageBuilder::new(format!("Transcript of {}: {count} {noun}", ticket.key))
        .section("ticket.transcript.header.v1", |section| {
            section.mrkdwn(format!(
                ":page_facing_up: Thread transcript for *{}* ({count} {noun})",
                key_link(ticket, browse_url)
            ));
        });
    for (index, body) in sections.into_iter().enumerate() {
        builder = builder.section(format!("ticket.transcript.part.{}.v1", index + 1), |section| {
            section.mrkdwn(body);
        });
    }
    if dropped > 0 {
        builder = builder.context("ticket.transcript.truncated.v1", |context| {
            context.plain(format!("Transcript truncated: {dropped} more part(s) not shown."));
        });
    }
    builder.build()
}

pub fn form_cancelled_message(action: TicketAction) -> MessageTemplate {
    notice_message(
        "ticket.summary.cancelled.v1",
        &format!(":x: Cancelled. The {action} was not applied and the ticket is unchanged."),
    )
}

pub fn notice_message(block_id: &str, text: &str) -> MessageTemplate {
    MessageBuilder::new(text.to_owned())
        .section(block_id, |section| {
            section.mrkdwn(text.to_owned());
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("ticket.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {summary}"));
        })
        .context("ticket.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

pub fn help_message(command: &str, reactions: &ReactionNames) -> MessageTemplate {
    MessageBuilder::new("Ticket tracker help")
        .section("ticket.help.reactions.v1", |section| {
            section.mrkdwn(format!(
                "*Reactions*\n• :{}: on a thread's first message creates a ticket\n\
                 • :{}: moves the thread's ticket to review\n\
                 • :{}: closes the thread's ticket\n\
                 • :{}: on a reply captures replies up to it as comments",
                reactions.create, reactions.review, reactions.close, reactions.comment
            ));
        })
        .section("ticket.help.commands.v1", |section| {
            section.mrkdwn(format!(
                "*Commands*\n• `{command} show <KEY>`\n• `{command} list [open|in_review|closed]`\n\
                 • `{command} export <KEY>` posts the ticket's thread as a transcript\n• `{command} help`"
            ));
        })
        .build()
}
