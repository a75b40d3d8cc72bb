//! The single global poll and the conversation that drives it.

pub mod machine;
pub mod results;

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use machine::CANCEL;

/// Format poll end times are typed and stored in.
pub const END_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Word that stands for "no fixed answers" or "no end".
pub const NONE_SENTINEL: &str = "none";

/// Parse a poll end time as typed by a person.
pub fn parse_end(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), END_FORMAT).ok()
}

/// Answers a poll accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answers {
    /// Any text goes.
    FreeForm,
    /// One of these, compared ignoring case.
    Fixed(Vec<String>),
}

impl Default for Answers {
    fn default() -> Self {
        Answers::Fixed(Vec::new())
    }
}

impl Answers {
    /// Parse a comma separated answer list, or the free-form sentinel.
    /// The word that cancels a conversation can't be an answer, so it's left out.
    ///
    /// Returns [`None`] if there are no answers in there at all.
    pub fn parse(text: &str) -> Option<Answers> {
        let text = text.trim();
        if text.eq_ignore_ascii_case(NONE_SENTINEL) {
            return Some(Answers::FreeForm);
        }

        let mut answers: Vec<String> = Vec::new();
        for answer in text
            .split(',')
            .map(str::trim)
            .filter(|x| !x.is_empty() && !x.eq_ignore_ascii_case(CANCEL))
        {
            // Duplicates would only split the vote.
            if !answers.iter().any(|x| x.to_lowercase() == answer.to_lowercase()) {
                answers.push(answer.to_string());
            }
        }

        if answers.is_empty() {
            None
        } else {
            Some(Answers::Fixed(answers))
        }
    }

    /// Check an answer someone typed. Returns the answer as it should be
    /// stored, or [`None`] if it's not acceptable.
    pub fn accept(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match self {
            Answers::FreeForm => Some(text.to_string()),
            Answers::Fixed(answers) => {
                let lowercase = text.to_lowercase();
                answers
                    .iter()
                    .find(|answer| answer.to_lowercase() == lowercase)
                    .cloned()
            }
        }
    }

    /// True for a fixed answer list with nothing in it. No answer fits that.
    pub fn is_empty(&self) -> bool {
        matches!(self, Answers::Fixed(answers) if answers.is_empty())
    }

    pub fn is_free_form(&self) -> bool {
        matches!(self, Answers::FreeForm)
    }

    /// The fixed options, or nothing for free-form polls.
    pub fn options(&self) -> &[String] {
        match self {
            Answers::FreeForm => &[],
            Answers::Fixed(answers) => answers,
        }
    }
}

impl Serialize for Answers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Answers::FreeForm => serializer.serialize_str(NONE_SENTINEL),
            Answers::Fixed(answers) => answers.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Answers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            List(Vec<String>),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::List(answers) => Answers::Fixed(answers),
            Raw::Text(text) if text.trim().is_empty() => Answers::default(),
            // Hand-edited configs might have the list as one string.
            Raw::Text(text) => Answers::parse(&text).unwrap_or_default(),
        })
    }
}

/// Stored as `""` when there is no end, so the key is always there.
mod end_format {
    use super::{parse_end, END_FORMAT, NONE_SENTINEL};
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        end: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match end {
            Some(end) => serializer.serialize_str(&end.format(END_FORMAT).to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case(NONE_SENTINEL) {
            return Ok(None);
        }
        parse_end(text)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("poll end {text:?} is not {END_FORMAT}")))
    }
}

/// A question, the answers it takes, and who answered what.
///
/// A poll with an empty topic means there is no poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default, with = "end_format")]
    pub end: Option<NaiveDateTime>,
    /// Respondent display name to their answer.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Poll {
    /// A fresh poll with nobody having answered yet.
    pub fn new(topic: String, answers: Answers, end: Option<NaiveDateTime>) -> Self {
        Self {
            topic,
            answers,
            end,
            data: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.topic.is_empty()
    }

    pub fn has_ended(&self, now: NaiveDateTime) -> bool {
        self.end.is_some_and(|end| now >= end)
    }

    /// True if answers are being taken right now.
    pub fn is_open(&self, now: NaiveDateTime) -> bool {
        self.is_active() && !self.has_ended(now)
    }

    /// Store an answer. A previous answer by the same respondent is replaced.
    pub fn record(&mut self, respondent: &str, answer: String) {
        self.data.insert(respondent.to_string(), answer);
    }

    pub fn answer_of(&self, respondent: &str) -> Option<&str> {
        self.data.get(respondent).map(String::as_str)
    }

    /// Forget everything, all at once.
    pub fn clear(&mut self) {
        *self = Poll::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn end_parsing() {
        assert!(parse_end("2099-01-01 00:00:00").is_some());
        assert!(parse_end(" 2099-01-01 00:00:00 ").is_some());
        assert!(parse_end("2099-13-40 99:99:99").is_none());
        assert!(parse_end("2099-01-01").is_none());
        assert!(parse_end("tomorrow").is_none());
    }

    #[test]
    fn answer_lists() {
        assert_eq!(
            Answers::parse("speed, privacy ,community"),
            Some(Answers::Fixed(vec![
                String::from("speed"),
                String::from("privacy"),
                String::from("community"),
            ]))
        );
        assert_eq!(
            Answers::parse("yes, Yes, no"),
            Some(Answers::Fixed(vec![String::from("yes"), String::from("no")]))
        );
        assert_eq!(Answers::parse("None"), Some(Answers::FreeForm));
        assert_eq!(Answers::parse(" , ,"), None);
        assert_eq!(Answers::parse(""), None);
    }

    #[test]
    fn cancel_is_not_an_answer() {
        assert_eq!(
            Answers::parse("keep, Cancel"),
            Some(Answers::Fixed(vec![String::from("keep")]))
        );
        assert_eq!(Answers::parse("cancel, CANCEL"), None);
    }

    #[test]
    fn accepting_answers() {
        let fixed = Answers::parse("Speed, Privacy").unwrap();
        assert_eq!(fixed.accept("privacy"), Some(String::from("Privacy")));
        assert_eq!(fixed.accept("  SPEED "), Some(String::from("Speed")));
        assert_eq!(fixed.accept("price"), None);

        assert_eq!(
            Answers::FreeForm.accept(" whatever I want "),
            Some(String::from("whatever I want"))
        );
        assert_eq!(Answers::FreeForm.accept("   "), None);
    }

    #[test]
    fn stored_shape() {
        let mut poll = Poll::new(
            String::from("Best feature?"),
            Answers::FreeForm,
            parse_end("2099-01-01 00:00:00"),
        );
        poll.record("@ann", String::from("speed"));

        let document = serde_json::to_value(&poll).unwrap();
        assert_eq!(
            document,
            json!({
                "topic": "Best feature?",
                "answers": "none",
                "end": "2099-01-01 00:00:00",
                "data": { "@ann": "speed" },
            })
        );
        assert_eq!(serde_json::from_value::<Poll>(document).unwrap(), poll);
    }

    #[test]
    fn empty_poll_reads_back_empty() {
        let poll: Poll =
            serde_json::from_value(json!({ "topic": "", "answers": [], "end": "", "data": {} }))
                .unwrap();
        assert_eq!(poll, Poll::default());
        assert!(!poll.is_active());
        assert_eq!(serde_json::from_value::<Poll>(json!({})).unwrap(), poll);
    }

    #[test]
    fn bad_end_in_file_is_an_error() {
        let result = serde_json::from_value::<Poll>(json!({ "end": "2099-13-40 99:99:99" }));
        assert!(result.is_err());
    }

    #[test]
    fn opening_hours() {
        let now = parse_end("2030-06-01 12:00:00").unwrap();
        let mut poll = Poll::new(String::from("Q"), Answers::FreeForm, None);
        assert!(poll.is_open(now));

        poll.end = parse_end("2030-06-01 12:00:00");
        assert!(!poll.is_open(now));

        poll.end = parse_end("2030-06-01 12:00:01");
        assert!(poll.is_open(now));

        assert!(!Poll::default().is_open(now));
    }

    #[test]
    fn resubmission_overwrites() {
        let mut poll = Poll::new(String::from("Q"), Answers::FreeForm, None);
        poll.record("@ann", String::from("one"));
        poll.record("@ann", String::from("two"));
        assert_eq!(poll.answer_of("@ann"), Some("two"));
        assert_eq!(poll.data.len(), 1);
    }
}
