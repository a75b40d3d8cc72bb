//! Poll conversation, one per person per chat.
//!
//! Nothing in here talks to Telegram or touches the disk. Each turn takes the
//! current state and what the person typed, and yields the next state, what
//! to say back, and what to do to the stored poll.

use chrono::NaiveDateTime;

use super::{parse_end, Answers, Poll, NONE_SENTINEL};

/// Word that aborts any conversation step.
pub const CANCEL: &str = "cancel";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PollState {
    #[default]
    Idle,
    /// Waiting for someone's answer to the running poll.
    AwaitingAnswer,
    AwaitingTopic,
    AwaitingAnswers {
        topic: String,
    },
    AwaitingEnd {
        topic: String,
        answers: Answers,
    },
    AwaitingDeleteConfirm,
}

impl PollState {
    pub fn is_idle(&self) -> bool {
        matches!(self, PollState::Idle)
    }
}

/// Change to make to the stored poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Nothing,
    Record { respondent: String, answer: String },
    Replace(Poll),
    Clear,
}

impl Effect {
    pub fn apply(self, poll: &mut Poll) {
        match self {
            Effect::Nothing => (),
            Effect::Record { respondent, answer } => poll.record(&respondent, answer),
            Effect::Replace(new_poll) => *poll = new_poll,
            Effect::Clear => poll.clear(),
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Effect::Nothing)
    }
}

/// What to tell the person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    NoPoll,
    PollEnded,
    AskAnswer { topic: String, answers: Answers },
    InvalidAnswer { answers: Answers },
    AnswerSaved(String),
    Cancelled,
    AskTopic,
    AskAnswers,
    InvalidAnswers,
    AskEnd,
    InvalidEnd,
    EndInPast,
    PollCreated(Poll),
    ConfirmDelete { topic: String },
    InvalidConfirm,
    Deleted,
    DeleteAborted,
    /// Not in a conversation, nothing to say.
    Silence,
}

/// Result of one conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: PollState,
    pub reply: Reply,
    pub effect: Effect,
}

impl Step {
    fn to(next: PollState, reply: Reply) -> Self {
        Self {
            next,
            reply,
            effect: Effect::Nothing,
        }
    }

    fn idle(reply: Reply) -> Self {
        Self::to(PollState::Idle, reply)
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }
}

/// Someone sent `/poll` with no arguments.
pub fn begin_answer(poll: &Poll, now: NaiveDateTime) -> Step {
    if !poll.is_active() {
        return Step::idle(Reply::NoPoll);
    }
    if poll.has_ended(now) {
        return Step::idle(Reply::PollEnded);
    }

    Step::to(
        PollState::AwaitingAnswer,
        Reply::AskAnswer {
            topic: poll.topic.clone(),
            answers: poll.answers.clone(),
        },
    )
}

/// An admin sent `/poll create`.
pub fn begin_create() -> Step {
    Step::to(PollState::AwaitingTopic, Reply::AskTopic)
}

/// An admin sent `/poll delete`.
pub fn begin_delete(poll: &Poll) -> Step {
    if !poll.is_active() {
        return Step::idle(Reply::NoPoll);
    }

    Step::to(
        PollState::AwaitingDeleteConfirm,
        Reply::ConfirmDelete {
            topic: poll.topic.clone(),
        },
    )
}

fn is_cancel(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case(CANCEL)
}

/// Feed one message from a person into their conversation.
///
/// `poll` is the stored poll as it is now. Answers are identified by
/// `respondent`.
pub fn advance(
    state: PollState,
    input: &str,
    poll: &Poll,
    respondent: &str,
    now: NaiveDateTime,
) -> Step {
    if state.is_idle() {
        return Step::idle(Reply::Silence);
    }

    if is_cancel(input) {
        return Step::idle(Reply::Cancelled);
    }

    match state {
        PollState::Idle => Step::idle(Reply::Silence),

        PollState::AwaitingAnswer => {
            // The poll might have been deleted or closed while they were thinking.
            if !poll.is_active() {
                return Step::idle(Reply::NoPoll);
            }
            if poll.has_ended(now) {
                return Step::idle(Reply::PollEnded);
            }

            match poll.answers.accept(input) {
                Some(answer) => Step::idle(Reply::AnswerSaved(answer.clone())).with(
                    Effect::Record {
                        respondent: respondent.to_string(),
                        answer,
                    },
                ),
                None => Step::to(
                    PollState::AwaitingAnswer,
                    Reply::InvalidAnswer {
                        answers: poll.answers.clone(),
                    },
                ),
            }
        }

        PollState::AwaitingTopic => {
            let topic = input.trim();
            if topic.is_empty() {
                return Step::to(PollState::AwaitingTopic, Reply::AskTopic);
            }
            Step::to(
                PollState::AwaitingAnswers {
                    topic: topic.to_string(),
                },
                Reply::AskAnswers,
            )
        }

        PollState::AwaitingAnswers { topic } => match Answers::parse(input) {
            Some(answers) => Step::to(PollState::AwaitingEnd { topic, answers }, Reply::AskEnd),
            None => Step::to(PollState::AwaitingAnswers { topic }, Reply::InvalidAnswers),
        },

        PollState::AwaitingEnd { topic, answers } => {
            let end = if input.trim().eq_ignore_ascii_case(NONE_SENTINEL) {
                None
            } else {
                match parse_end(input) {
                    Some(end) if end <= now => {
                        return Step::to(
                            PollState::AwaitingEnd { topic, answers },
                            Reply::EndInPast,
                        );
                    }
                    Some(end) => Some(end),
                    None => {
                        return Step::to(
                            PollState::AwaitingEnd { topic, answers },
                            Reply::InvalidEnd,
                        );
                    }
                }
            };

            let new_poll = Poll::new(topic, answers, end);
            Step::idle(Reply::PollCreated(new_poll.clone())).with(Effect::Replace(new_poll))
        }

        PollState::AwaitingDeleteConfirm => match input.trim().to_lowercase().as_str() {
            "yes" | "y" => Step::idle(Reply::Deleted).with(Effect::Clear),
            "no" | "n" => Step::idle(Reply::DeleteAborted),
            _ => Step::to(PollState::AwaitingDeleteConfirm, Reply::InvalidConfirm),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        parse_end("2030-06-01 12:00:00").unwrap()
    }

    fn running_poll() -> Poll {
        Poll::new(
            String::from("Best feature?"),
            Answers::parse("speed, privacy, community").unwrap(),
            parse_end("2031-06-01 12:00:00"),
        )
    }

    /// Run a whole conversation, applying effects along the way.
    fn converse(
        mut poll: Poll,
        start: Step,
        respondent: &str,
        inputs: &[&str],
    ) -> (Poll, PollState, Vec<Reply>) {
        let mut replies = vec![start.reply];
        let mut state = start.next;
        start.effect.apply(&mut poll);

        for input in inputs {
            let step = advance(state, input, &poll, respondent, now());
            replies.push(step.reply);
            state = step.next;
            step.effect.apply(&mut poll);
        }

        (poll, state, replies)
    }

    #[test]
    fn latest_answer_wins() {
        let poll = running_poll();

        let (poll, _, _) =
            converse(poll.clone(), begin_answer(&poll, now()), "@ann", &["privacy"]);
        assert_eq!(poll.answer_of("@ann"), Some("privacy"));

        let (poll, state, replies) =
            converse(poll.clone(), begin_answer(&poll, now()), "@ann", &["SPEED"]);
        assert_eq!(poll.answer_of("@ann"), Some("speed"));
        assert_eq!(poll.data.len(), 1);
        assert_eq!(state, PollState::Idle);
        assert_eq!(replies.last(), Some(&Reply::AnswerSaved(String::from("speed"))));
    }

    #[test]
    fn cancel_leaves_data_alone() {
        let mut poll = running_poll();
        poll.record("@bob", String::from("community"));
        let before = poll.data.clone();

        let (after, state, replies) =
            converse(poll.clone(), begin_answer(&poll, now()), "@ann", &["Cancel"]);

        assert_eq!(after.data, before);
        assert_eq!(state, PollState::Idle);
        assert_eq!(replies.last(), Some(&Reply::Cancelled));
    }

    #[test]
    fn invalid_answer_reprompts() {
        let poll = running_poll();
        let (after, state, replies) = converse(
            poll.clone(),
            begin_answer(&poll, now()),
            "@ann",
            &["price", "community"],
        );

        assert!(matches!(replies[1], Reply::InvalidAnswer { .. }));
        assert_eq!(replies[2], Reply::AnswerSaved(String::from("community")));
        assert_eq!(after.answer_of("@ann"), Some("community"));
        assert_eq!(state, PollState::Idle);
    }

    #[test]
    fn free_form_takes_anything() {
        let poll = Poll::new(String::from("Thoughts?"), Answers::FreeForm, None);
        let (after, _, _) = converse(
            poll.clone(),
            begin_answer(&poll, now()),
            "@ann",
            &["more exchanges please"],
        );
        assert_eq!(after.answer_of("@ann"), Some("more exchanges please"));
    }

    #[test]
    fn no_answers_without_a_poll_or_after_the_end() {
        assert_eq!(begin_answer(&Poll::default(), now()).reply, Reply::NoPoll);

        let mut ended = running_poll();
        ended.end = parse_end("2030-01-01 00:00:00");
        let step = begin_answer(&ended, now());
        assert_eq!(step.reply, Reply::PollEnded);
        assert_eq!(step.next, PollState::Idle);
    }

    #[test]
    fn poll_closing_mid_answer_refuses_it() {
        let mut poll = running_poll();
        let step = begin_answer(&poll, now());
        poll.end = parse_end("2030-06-01 11:00:00");

        let step = advance(step.next, "speed", &poll, "@ann", now());
        assert_eq!(step.reply, Reply::PollEnded);
        assert!(step.effect.is_nothing());
    }

    #[test]
    fn creation_flow() {
        let (poll, state, replies) = converse(
            Poll::default(),
            begin_create(),
            "@admin",
            &[
                "Best feature?",
                " , ",
                "speed, privacy, community",
                "2099-13-40 99:99:99",
                "2099-01-01 00:00:00",
            ],
        );

        assert_eq!(
            replies,
            vec![
                Reply::AskTopic,
                Reply::AskAnswers,
                Reply::InvalidAnswers,
                Reply::AskEnd,
                Reply::InvalidEnd,
                Reply::PollCreated(poll.clone()),
            ]
        );
        assert_eq!(state, PollState::Idle);
        assert_eq!(poll.topic, "Best feature?");
        assert_eq!(poll.answers.options().len(), 3);
        assert_eq!(poll.end, parse_end("2099-01-01 00:00:00"));
    }

    #[test]
    fn bad_end_does_not_advance() {
        let state = PollState::AwaitingEnd {
            topic: String::from("Q"),
            answers: Answers::FreeForm,
        };
        let step = advance(state.clone(), "2099-13-40 99:99:99", &Poll::default(), "@a", now());
        assert_eq!(step.next, state);
        assert_eq!(step.reply, Reply::InvalidEnd);
        assert!(step.effect.is_nothing());

        let step = advance(state.clone(), "2001-01-01 00:00:00", &Poll::default(), "@a", now());
        assert_eq!(step.next, state);
        assert_eq!(step.reply, Reply::EndInPast);

        let step = advance(state, "none", &Poll::default(), "@a", now());
        assert_eq!(
            step.effect,
            Effect::Replace(Poll::new(String::from("Q"), Answers::FreeForm, None))
        );
    }

    #[test]
    fn creating_replaces_old_poll_wholesale() {
        let mut old = running_poll();
        old.record("@bob", String::from("speed"));

        let (poll, _, _) = converse(old, begin_create(), "@admin", &["New?", "none", "none"]);
        assert_eq!(poll.topic, "New?");
        assert!(poll.answers.is_free_form());
        assert!(poll.data.is_empty());
        assert_eq!(poll.end, None);
    }

    #[test]
    fn cancel_can_not_be_an_option() {
        let (poll, _, _) = converse(
            Poll::default(),
            begin_create(),
            "@admin",
            &["Keep it?", "keep, cancel", "none"],
        );
        assert_eq!(poll.answers.options(), [String::from("keep")]);

        let (poll, state, _) =
            converse(poll.clone(), begin_answer(&poll, now()), "@ann", &["KEEP"]);
        assert_eq!(poll.answer_of("@ann"), Some("keep"));
        assert_eq!(state, PollState::Idle);
    }

    #[test]
    fn cancel_aborts_creation() {
        let old = running_poll();
        let (poll, state, replies) =
            converse(old.clone(), begin_create(), "@admin", &["New?", "cancel"]);
        assert_eq!(poll, old);
        assert_eq!(state, PollState::Idle);
        assert_eq!(replies.last(), Some(&Reply::Cancelled));
    }

    #[test]
    fn delete_needs_confirmation() {
        let mut poll = running_poll();
        poll.record("@bob", String::from("speed"));

        let (kept, _, replies) =
            converse(poll.clone(), begin_delete(&poll), "@admin", &["maybe", "no"]);
        assert_eq!(kept, poll);
        assert_eq!(replies[1], Reply::InvalidConfirm);
        assert_eq!(replies[2], Reply::DeleteAborted);

        let (deleted, state, _) = converse(poll.clone(), begin_delete(&poll), "@admin", &["YES"]);
        assert_eq!(deleted.topic, "");
        assert_eq!(deleted.answers, Answers::default());
        assert!(deleted.data.is_empty());
        assert_eq!(deleted.end, None);
        assert_eq!(deleted, Poll::default());
        assert_eq!(state, PollState::Idle);
    }

    #[test]
    fn nothing_to_delete() {
        let step = begin_delete(&Poll::default());
        assert_eq!(step.reply, Reply::NoPoll);
        assert_eq!(step.next, PollState::Idle);
    }

    #[test]
    fn idle_ignores_chatter() {
        let step = advance(PollState::Idle, "cancel", &running_poll(), "@ann", now());
        assert_eq!(step.reply, Reply::Silence);
        assert!(step.effect.is_nothing());
    }
}
