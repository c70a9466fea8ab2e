use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quiz::bank::QuestionBank;
use crate::quiz::Question;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuizError {
    #[error("no questionnaire for '{0}'")]
    UnknownTopic(String),

    #[error("'{0}' is not one of the offered options")]
    UnknownOption(String),

    #[error("the questionnaire is already finished")]
    AlreadyFinished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisOutcome {
    Success { summary: String, advice: String },
    Failure { reason: String },
}

impl AnalysisOutcome {
    pub fn summary(&self) -> &str {
        match self {
            AnalysisOutcome::Success { summary, .. } => summary,
            AnalysisOutcome::Failure { reason } => reason,
        }
    }

    pub fn advice(&self) -> &str {
        match self {
            AnalysisOutcome::Success { advice, .. } => advice,
            AnalysisOutcome::Failure { .. } => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Status {
    InProgress,
    AwaitingAnalysis { in_flight: bool },
    Analysed(AnalysisOutcome),
}

/// What the front end should show for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiState {
    InProgress,
    AnalysisPending,
    AnalysisReady,
    AnalysisFailed,
}

/// Result of a successful `select_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    NextQuestion(usize),
    Finished,
}

/// Everything the analysis needs, stamped with the session token it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTicket {
    pub token: u64,
    pub part_id: String,
    pub label: String,
    pub questions: Vec<Question>,
    pub answers: Vec<String>,
}

/// One run through a body part's questionnaire.
///
/// `answers.len() == current_index` while in progress and
/// `answers.len() == questions.len()` once finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSession {
    part_id: String,
    label: String,
    questions: Vec<Question>,
    current_index: usize,
    answers: Vec<String>,
    token: u64,
    status: Status,
}

impl QuizSession {
    pub fn start(part_id: &str, bank: &QuestionBank) -> Result<Self, QuizError> {
        let set = bank
            .get(part_id)
            .ok_or_else(|| QuizError::UnknownTopic(part_id.to_string()))?;
        Ok(Self {
            part_id: part_id.to_string(),
            label: set.label.clone(),
            questions: set.questions.clone(),
            current_index: 0,
            answers: Vec::new(),
            token: rand::random(),
            status: Status::InProgress,
        })
    }

    pub fn select_option(&mut self, option: &str) -> Result<Progress, QuizError> {
        if self.status != Status::InProgress {
            return Err(QuizError::AlreadyFinished);
        }
        if !self.questions[self.current_index].has_option(option) {
            return Err(QuizError::UnknownOption(option.to_string()));
        }

        self.answers.push(option.to_string());
        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            Ok(Progress::NextQuestion(self.current_index))
        } else {
            self.status = Status::AwaitingAnalysis { in_flight: false };
            Ok(Progress::Finished)
        }
    }

    /// Returns false when there is nothing to go back to.
    pub fn go_back(&mut self) -> bool {
        if self.status != Status::InProgress || self.current_index == 0 {
            return false;
        }
        self.current_index -= 1;
        self.answers.pop();
        true
    }

    /// Starts the same questionnaire over. Results still in flight for the old
    /// run will no longer match the token.
    pub fn reset(&mut self) {
        self.current_index = 0;
        self.answers.clear();
        self.status = Status::InProgress;
        self.token = self.fresh_token();
    }

    fn fresh_token(&self) -> u64 {
        loop {
            let token = rand::random();
            if token != self.token {
                return token;
            }
        }
    }

    /// Hands out the one analysis request for a finished session. Every later
    /// call returns `None`, whether the request is still running or done.
    pub fn begin_analysis(&mut self) -> Option<AnalysisTicket> {
        if self.status != (Status::AwaitingAnalysis { in_flight: false }) {
            return None;
        }
        self.status = Status::AwaitingAnalysis { in_flight: true };
        Some(AnalysisTicket {
            token: self.token,
            part_id: self.part_id.clone(),
            label: self.label.clone(),
            questions: self.questions.clone(),
            answers: self.answers.clone(),
        })
    }

    /// Stores the outcome if it answers this session's pending request.
    /// Returns false when the outcome is stale and was dropped.
    pub fn complete_analysis(&mut self, token: u64, outcome: AnalysisOutcome) -> bool {
        if token != self.token || self.status != (Status::AwaitingAnalysis { in_flight: true }) {
            return false;
        }
        self.status = Status::Analysed(outcome);
        true
    }

    pub fn part_id(&self) -> &str {
        &self.part_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    /// `None` once the questionnaire is finished.
    pub fn current_question(&self) -> Option<&Question> {
        match self.status {
            Status::InProgress => self.questions.get(self.current_index),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != Status::InProgress
    }

    pub fn is_analysis_pending(&self) -> bool {
        matches!(self.status, Status::AwaitingAnalysis { .. })
    }

    pub fn outcome(&self) -> Option<&AnalysisOutcome> {
        match &self.status {
            Status::Analysed(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn ui_state(&self) -> UiState {
        match &self.status {
            Status::InProgress => UiState::InProgress,
            Status::AwaitingAnalysis { .. } => UiState::AnalysisPending,
            Status::Analysed(AnalysisOutcome::Success { .. }) => UiState::AnalysisReady,
            Status::Analysed(AnalysisOutcome::Failure { .. }) => UiState::AnalysisFailed,
        }
    }
}
