use crate::quiz::parser::{self, ADVICE_LABEL, ADVICE_MAX_CHARS, SUMMARY_LABEL, SUMMARY_MAX_CHARS};
use crate::quiz::provider::{CompletionProvider, CompletionRequest, ResponseFormat};
use crate::quiz::session::{AnalysisOutcome, AnalysisTicket};
use crate::quiz::Question;

pub const ANALYSIS_FAILED_TEXT: &str = "AI分析失败，请检查网络或API Key。";

const SYSTEM_PERSONA: &str = "你是一位专业的医学健康顾问。";

const DOCTOR_PERSONA: &str = "要求：请用一名有多年临床经验的医生和患者面对面沟通的口语化表达方式，亲切、自然、贴心地给出分析和建议，称呼尽量都是使用你我他。不要用AI或书面语风格，不要使用敬词，要像医生和患者聊天那样，表达关心和鼓励。例如'别太担心，这种情况很常见，建议你……'。";

/// The reply of whichever provider answered first, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub provider: String,
    pub format: ResponseFormat,
    pub model: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult {
    Payload(RawPayload),
    Failed(AnalysisOutcome),
}

/// Turns a finished questionnaire into a health summary, trying each provider
/// in order until one answers.
pub struct HealthAdvisor {
    providers: Vec<Box<dyn CompletionProvider>>,
}

impl HealthAdvisor {
    pub fn new(providers: Vec<Box<dyn CompletionProvider>>) -> Self {
        Self { providers }
    }

    pub async fn analyze(&self, ticket: &AnalysisTicket) -> AnalysisOutcome {
        match self.run(&ticket.label, &ticket.questions, &ticket.answers).await {
            PipelineResult::Payload(payload) => {
                let parsed = parser::parse(&payload.content, payload.format);
                AnalysisOutcome::Success {
                    summary: parsed.summary,
                    advice: parsed.advice,
                }
            }
            PipelineResult::Failed(outcome) => outcome,
        }
    }

    pub async fn run(&self, label: &str, questions: &[Question], answers: &[String]) -> PipelineResult {
        let body = questionnaire_prompt(label, questions, answers);

        for provider in &self.providers {
            let format = provider.response_format();
            let request = CompletionRequest {
                system: SYSTEM_PERSONA.to_string(),
                prompt: format!("{}\n{}\n{}", body, format_instruction(format), DOCTOR_PERSONA),
            };

            log::info!("Requesting {} analysis from {}", label, provider.name());
            match provider.complete(&request).await {
                Ok(reply) => {
                    log::debug!(
                        "{} answered (model {:?}): {:?}",
                        provider.name(),
                        reply.model,
                        reply.content
                    );
                    return PipelineResult::Payload(RawPayload {
                        provider: provider.name().to_string(),
                        format,
                        model: reply.model,
                        content: reply.content,
                    });
                }
                Err(e) => log::warn!("Provider {} failed: {}", provider.name(), e),
            }
        }

        log::error!("All {} providers failed for {}", self.providers.len(), label);
        PipelineResult::Failed(AnalysisOutcome::Failure {
            reason: ANALYSIS_FAILED_TEXT.to_string(),
        })
    }
}

fn questionnaire_prompt(label: &str, questions: &[Question], answers: &[String]) -> String {
    let pairs = questions
        .iter()
        .zip(answers)
        .enumerate()
        .map(|(i, (q, a))| format!("{}. {}\n用户选择：{}", i + 1, q.text, a))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "请根据以下{}健康自测问卷的用户答案，分析其健康状况，并给出医学建议。\n\n{}",
        label, pairs
    )
}

fn format_instruction(format: ResponseFormat) -> String {
    match format {
        ResponseFormat::BracketTagged => format!(
            "请严格按照如下格式输出，且不要超过字数限制：\n【{}】（{}字以内）：xxx\n【{}】（{}字以内）：yyy",
            SUMMARY_LABEL, SUMMARY_MAX_CHARS, ADVICE_LABEL, ADVICE_MAX_CHARS
        ),
        ResponseFormat::MarkdownHeading => format!(
            "请严格按照如下格式输出，且不要超过字数限制：\n### {}\n（{}字以内）xxx\n### {}\n（{}字以内）yyy",
            SUMMARY_LABEL, SUMMARY_MAX_CHARS, ADVICE_LABEL, ADVICE_MAX_CHARS
        ),
    }
}
