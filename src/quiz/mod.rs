pub mod ai_helper;
pub mod bank;
pub mod parser;
pub mod provider;
pub mod session;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
}
impl Question {
    pub fn new(text: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            text: text.into(),
            options,
        }
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// Ordered questionnaire for one body part.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuestionSet {
    /// Display name of the body part, e.g. "肾脏".
    pub label: String,
    pub questions: Vec<Question>,
}
impl QuestionSet {
    pub fn new(label: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            label: label.into(),
            questions,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
