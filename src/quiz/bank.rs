use std::fs::File;
use std::io::{BufReader, Read};

use thiserror::Error;

use crate::quiz::{Question, QuestionSet};

#[derive(Error, Debug)]
pub enum BankError {
    #[error("Failed to read question bank: {0}")]
    Io(#[from] std::io::Error),

    #[error("Question bank is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Question bank has no body parts")]
    Empty,

    #[error("Body part '{0}' is listed twice")]
    DuplicatePart(String),

    #[error("Body part '{part}' is invalid: {reason}")]
    InvalidPart { part: String, reason: String },
}

#[derive(Debug, Clone, serde::Deserialize)]
struct BodyPartEntry {
    id: String,
    label: String,
    questions: Vec<Question>,
}

/// Every questionnaire the bot knows about, in menu order.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    parts: Vec<(String, QuestionSet)>,
}

impl QuestionBank {
    pub fn new(file: File) -> Result<Self, BankError> {
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, BankError> {
        let entries: Vec<BodyPartEntry> = serde_json::from_reader(reader)?;
        let bank = Self {
            parts: entries
                .into_iter()
                .map(|e| (e.id, QuestionSet::new(e.label, e.questions)))
                .collect(),
        };
        bank.validate()?;
        Ok(bank)
    }

    fn validate(&self) -> Result<(), BankError> {
        if self.parts.is_empty() {
            return Err(BankError::Empty);
        }
        for (i, (id, set)) in self.parts.iter().enumerate() {
            let invalid = |reason: String| BankError::InvalidPart {
                part: id.clone(),
                reason,
            };
            if self.parts[..i].iter().any(|(other, _)| other == id) {
                return Err(BankError::DuplicatePart(id.clone()));
            }
            if set.label.trim().is_empty() {
                return Err(invalid("empty label".to_string()));
            }
            if set.is_empty() {
                return Err(invalid("no questions".to_string()));
            }
            if let Some(n) = set.questions.iter().position(|q| q.options.is_empty()) {
                return Err(invalid(format!("question {} has no options", n + 1)));
            }
        }
        Ok(())
    }

    pub fn get(&self, part_id: &str) -> Option<&QuestionSet> {
        self.parts
            .iter()
            .find(|(id, _)| id == part_id)
            .map(|(_, set)| set)
    }

    /// Looks a body part up by its display label, which is what the menu shows.
    pub fn find_by_label(&self, label: &str) -> Option<(&str, &QuestionSet)> {
        self.parts
            .iter()
            .find(|(_, set)| set.label == label)
            .map(|(id, set)| (id.as_str(), set))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(_, set)| set.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
