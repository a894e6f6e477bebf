use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::{MessageTs, ThreadRef};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketKey(pub String);

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    Open,
    InReview,
    Closed,
}

impl TicketStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InReview => "In Review",
            Self::Closed => "Closed",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InReview => "in_review",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TicketStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "open" => Ok(Self::Open),
            "in_review" | "inreview" | "review" => Ok(Self::InReview),
            "closed" | "close" => Ok(Self::Closed),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown ticket status `{other}` (expected open|in_review|closed)"
            ))),
        }
    }
}

/// Who moved a ticket, when, and the optional free-text summary they supplied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub actor: String,
    pub at: DateTime<Utc>,
    pub summary: Option<String>,
}

impl StatusChange {
    pub fn new(actor: impl Into<String>, at: DateTime<Utc>, summary: Option<String>) -> Self {
        let summary = summary.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty());
        Self { actor: actor.into(), at, summary }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    pub source_ts: MessageTs,
    pub posted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadBinding {
    pub thread: ThreadRef,
    pub ticket_key: TicketKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub key: TicketKey,
    pub thread: ThreadRef,
    pub title: String,
    pub status: TicketStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub review: Option<StatusChange>,
    pub closure: Option<StatusChange>,
    pub comments: Vec<Comment>,
    pub last_comment_ts: Option<MessageTs>,
    pub revision: u32,
}

impl Ticket {
    pub fn open(
        key: TicketKey,
        thread: ThreadRef,
        title: impl Into<String>,
        created_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            thread,
            title: title.into(),
            status: TicketStatus::Open,
            created_by: created_by.into(),
            created_at,
            review: None,
            closure: None,
            comments: Vec::new(),
            last_comment_ts: None,
            revision: 0,
        }
    }

    pub fn binding(&self) -> ThreadBinding {
        ThreadBinding { thread: self.thread.clone(), ticket_key: self.key.clone() }
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self.status, next),
            (TicketStatus::Open, TicketStatus::InReview)
                | (TicketStatus::Open, TicketStatus::Closed)
                | (TicketStatus::InReview, TicketStatus::Closed)
        )
    }

    fn transition_to(&mut self, next: TicketStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidTicketTransition { from: self.status, to: next })
    }

    pub fn mark_in_review(&mut self, change: StatusChange) -> Result<(), DomainError> {
        self.transition_to(TicketStatus::InReview)?;
        self.review = Some(change);
        Ok(())
    }

    pub fn close(&mut self, change: StatusChange) -> Result<(), DomainError> {
        self.transition_to(TicketStatus::Closed)?;
        self.closure = Some(change);
        Ok(())
    }

    /// Appends comments in source order and raises the high-water mark to `upto`.
    /// The mark never moves backwards.
    pub fn append_comments(&mut self, mut comments: Vec<Comment>, upto: MessageTs) {
        comments.sort_by(|left, right| left.source_ts.cmp(&right.source_ts));
        self.comments.extend(comments);

        let advance = match &self.last_comment_ts {
            Some(current) => upto > *current,
            None => true,
        };
        if advance {
            self.last_comment_ts = Some(upto);
        }
    }

    /// True when `ts` falls after the high-water mark.
    pub fn is_uncaptured(&self, ts: &MessageTs) -> bool {
        match &self.last_comment_ts {
            Some(mark) => ts > mark,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Comment, StatusChange, Ticket, TicketKey, TicketStatus};
    use crate::domain::message::{MessageTs, ThreadRef};
    use crate::errors::DomainError;

    fn ticket() -> Ticket {
        Ticket::open(
            TicketKey("MOCK-OPS-123456".to_owned()),
            ThreadRef::new("C1", "1000.000000"),
            "Printer on fire",
            "U1",
            Utc::now(),
        )
    }

    fn comment(ts: &str) -> Comment {
        Comment {
            author_id: "U2".to_owned(),
            author_name: "Jane".to_owned(),
            text: format!("reply {ts}"),
            source_ts: MessageTs::from(ts),
            posted_at: None,
        }
    }

    #[test]
    fn open_ticket_moves_through_review_to_closed() {
        let mut ticket = ticket();
        ticket
            .mark_in_review(StatusChange::new("U2", Utc::now(), Some("looks good".to_owned())))
            .expect("open -> in review");
        ticket.close(StatusChange::new("U3", Utc::now(), None)).expect("in review -> closed");

        assert_eq!(ticket.status, TicketStatus::Closed);
        assert_eq!(
            ticket.review.as_ref().and_then(|change| change.summary.as_deref()),
            Some("looks good")
        );
        assert_eq!(ticket.closure.as_ref().map(|change| change.actor.as_str()), Some("U3"));
    }

    #[test]
    fn open_ticket_can_close_directly() {
        let mut ticket = ticket();
        ticket.close(StatusChange::new("U2", Utc::now(), None)).expect("open -> closed");
        assert_eq!(ticket.status, TicketStatus::Closed);
        assert!(ticket.review.is_none());
    }

    #[test]
    fn closed_ticket_rejects_review_and_second_close() {
        let mut ticket = ticket();
        ticket.close(StatusChange::new("U2", Utc::now(), Some("done".to_owned()))).expect("close");
        let before = ticket.clone();

        let review = ticket.mark_in_review(StatusChange::new("U9", Utc::now(), None));
        let reclose = ticket.close(StatusChange::new("U9", Utc::now(), None));

        assert!(matches!(
            review,
            Err(DomainError::InvalidTicketTransition {
                from: TicketStatus::Closed,
                to: TicketStatus::InReview
            })
        ));
        assert!(matches!(reclose, Err(DomainError::InvalidTicketTransition { .. })));
        assert_eq!(ticket, before);
    }

    #[test]
    fn in_review_ticket_rejects_second_review() {
        let mut ticket = ticket();
        ticket.mark_in_review(StatusChange::new("U2", Utc::now(), None)).expect("review");
        let error = ticket
            .mark_in_review(StatusChange::new("U3", Utc::now(), None))
            .expect_err("second review should fail");
        assert!(matches!(error, DomainError::InvalidTicketTransition { .. }));
        assert_eq!(ticket.review.as_ref().map(|change| change.actor.as_str()), Some("U2"));
    }

    #[test]
    fn blank_summary_is_dropped() {
        let change = StatusChange::new("U1", Utc::now(), Some("   ".to_owned()));
        assert!(change.summary.is_none());
    }

    #[test]
    fn appended_comments_are_sorted_and_mark_only_moves_forward() {
        let mut ticket = ticket();
        ticket.append_comments(vec![comment("1003.0"), comment("1001.0")], MessageTs::from("1003.0"));
        assert_eq!(ticket.comments[0].source_ts, MessageTs::from("1001.0"));
        assert_eq!(ticket.last_comment_ts, Some(MessageTs::from("1003.0")));

        ticket.append_comments(Vec::new(), MessageTs::from("1002.0"));
        assert_eq!(ticket.last_comment_ts, Some(MessageTs::from("1003.0")));
        assert!(!ticket.is_uncaptured(&MessageTs::from("1003.0")));
        assert!(ticket.is_uncaptured(&MessageTs::from("1003.5")));
    }

    #[test]
    fn status_parses_storage_and_display_labels() {
        assert_eq!("in_review".parse::<TicketStatus>().expect("storage"), TicketStatus::InReview);
        assert_eq!("In Review".parse::<TicketStatus>().expect("label"), TicketStatus::InReview);
        assert_eq!("CLOSED".parse::<TicketStatus>().expect("upper"), TicketStatus::Closed);
        assert!("resolved".parse::<TicketStatus>().is_err());
    }
}
