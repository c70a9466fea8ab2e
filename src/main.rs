use std::{fs::File, sync::Arc};

use dotenv::dotenv;
use health_quiz_bot::dialogue::{apply_outcome, ChatLocks, State};
use health_quiz_bot::quiz::provider::{CompletionProvider, HttpProvider};
use health_quiz_bot::quiz::session::{Progress, UiState};
use health_quiz_bot::{AnalysisOutcome, Config, HealthAdvisor, QuestionBank, QuizSession};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup},
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type UserInfoStorage = std::sync::Arc<ErasedStorage<State>>;

#[tokio::main]
async fn main() -> HandlerResult {
    let dotenv_result = dotenv();
    pretty_env_logger::init();
    if let Err(e) = dotenv_result {
        log::warn!("No .env file loaded: {}", e);
    }
    log::info!("Starting health quiz bot...");

    let config = Config::from_env()?;
    let bot = Bot::from_env();

    log::info!("Opening dialogue storage at {}", config.database_path.display());
    let storage: UserInfoStorage =
        SqliteStorage::open(&config.database_path.to_string_lossy(), Json)
            .await?
            .erase();

    log::info!("Loading question bank from {}", config.question_bank_path.display());
    let bank = Arc::new(QuestionBank::new(File::open(&config.question_bank_path)?)?);
    log::info!("Question bank loaded: {} body parts", bank.len());

    let providers = config
        .providers
        .into_iter()
        .map(|p| {
            log::info!("Provider {}: {} ({:?})", p.name, p.model_id, p.response_format);
            HttpProvider::new(p).map(|p| Box::new(p) as Box<dyn CompletionProvider>)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let advisor = Arc::new(HealthAdvisor::new(providers));
    let locks = Arc::new(ChatLocks::new());

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceivePartChoice].endpoint(receive_part_choice))
            .branch(dptree::case![State::Quiz { session }].endpoint(quiz)),
    )
    .dependencies(dptree::deps![storage, bank, advisor, locks])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    Ok(())
}

const GREETING_TEXT: &str =
    "🩺 身体有话对你说 💬\n用AI解读身体信号，获取个性化健康建议。\n\n请选择你的身体部位 👇";
const BACK: &str = "⬅️ 返回上一题";
const RESTART: &str = "🔄 重新作答";
const RESELECT: &str = "重新选择部位";

fn parts_keyboard(bank: &QuestionBank) -> KeyboardMarkup {
    let labels: Vec<KeyboardButton> = bank.labels().map(KeyboardButton::new).collect();
    KeyboardMarkup::new(labels.chunks(2).map(|row| row.to_vec()).collect::<Vec<_>>())
}

fn finished_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(RESTART),
        KeyboardButton::new(RESELECT),
    ]])
}

async fn start(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    bank: Arc<QuestionBank>,
    locks: Arc<ChatLocks>,
) -> HandlerResult {
    let lock = locks.lock_for(msg.chat.id);
    let _guard = lock.lock().await;

    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(parts_keyboard(&bank))
        .await?;

    dialogue.update(State::ReceivePartChoice).await?;
    Ok(())
}

async fn receive_part_choice(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    bank: Arc<QuestionBank>,
    locks: Arc<ChatLocks>,
) -> HandlerResult {
    let lock = locks.lock_for(msg.chat.id);
    let _guard = lock.lock().await;

    let Some((part_id, _)) = msg.text().and_then(|text| bank.find_by_label(text)) else {
        bot.send_message(msg.chat.id, "未找到该部位的题库，请从下面选择一个部位")
            .reply_markup(parts_keyboard(&bank))
            .await?;
        return Ok(());
    };

    let session = QuizSession::start(part_id, &bank)?;
    log::info!("Chat {} started the {} quiz", msg.chat.id, session.part_id());
    send_question(&bot, msg.chat.id, &session).await?;

    dialogue.update(State::Quiz { session }).await?;
    Ok(())
}

async fn quiz(
    bot: Bot,
    dialogue: QuizDialogue,
    session: QuizSession,
    msg: Message,
    bank: Arc<QuestionBank>,
    advisor: Arc<HealthAdvisor>,
    locks: Arc<ChatLocks>,
) -> HandlerResult {
    let lock = locks.lock_for(msg.chat.id);
    let _guard = lock.lock().await;

    // The injected session was read before the lock; an analysis may have
    // landed since.
    let mut session = match dialogue.get().await? {
        Some(State::Quiz { session: current }) if current.token() == session.token() => current,
        _ => session,
    };
    let text = msg.text().unwrap_or_default();

    match text {
        RESELECT | "/start" => {
            bot.send_message(msg.chat.id, GREETING_TEXT)
                .reply_markup(parts_keyboard(&bank))
                .await?;
            dialogue.update(State::ReceivePartChoice).await?;
            return Ok(());
        }
        RESTART => {
            session.reset();
            send_question(&bot, msg.chat.id, &session).await?;
            dialogue.update(State::Quiz { session }).await?;
            return Ok(());
        }
        BACK if !session.is_finished() => {
            if !session.go_back() {
                bot.send_message(msg.chat.id, "已经是第一题了").await?;
                return Ok(());
            }
            send_question(&bot, msg.chat.id, &session).await?;
            dialogue.update(State::Quiz { session }).await?;
            return Ok(());
        }
        _ => {}
    }

    match session.ui_state() {
        UiState::InProgress => {}
        UiState::AnalysisPending => {
            bot.send_message(msg.chat.id, "🤖 AI正在分析中，请稍候...")
                .reply_markup(finished_keyboard())
                .await?;
            return Ok(());
        }
        UiState::AnalysisReady | UiState::AnalysisFailed => {
            if let Some(outcome) = session.outcome() {
                send_outcome(&bot, msg.chat.id, session.ui_state(), outcome).await?;
            }
            return Ok(());
        }
    }

    match session.select_option(text) {
        Ok(Progress::NextQuestion(_)) => {
            send_question(&bot, msg.chat.id, &session).await?;
            dialogue.update(State::Quiz { session }).await?;
        }
        Ok(Progress::Finished) => {
            request_analysis(bot, dialogue, session, advisor, locks.clone()).await?
        }
        Err(e) => {
            log::debug!("Chat {} sent an invalid answer: {}", msg.chat.id, e);
            bot.send_message(msg.chat.id, "请从下面的选项中选择一个").await?;
        }
    }
    Ok(())
}

async fn send_question(bot: &Bot, chat_id: ChatId, session: &QuizSession) -> HandlerResult {
    let Some(question) = session.current_question() else {
        return Ok(());
    };

    let mut rows: Vec<Vec<KeyboardButton>> = question
        .options
        .iter()
        .map(|o| vec![KeyboardButton::new(o.clone())])
        .collect();
    let mut navigation = Vec::new();
    if session.current_index() > 0 {
        navigation.push(KeyboardButton::new(BACK));
    }
    navigation.push(KeyboardButton::new(RESELECT));
    rows.push(navigation);

    let question_text = format!(
        "{}健康自测\n第 {} / {} 题\n\n{}",
        session.label(),
        session.current_index() + 1,
        session.question_count(),
        question.text
    );
    bot.send_message(chat_id, question_text)
        .reply_markup(KeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

/// Fires the analysis for a just-finished session. The request runs in its own
/// task so the chat can still restart or reselect while it is in flight.
async fn request_analysis(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: QuizSession,
    advisor: Arc<HealthAdvisor>,
    locks: Arc<ChatLocks>,
) -> HandlerResult {
    let Some(ticket) = session.begin_analysis() else {
        dialogue.update(State::Quiz { session }).await?;
        return Ok(());
    };
    dialogue.update(State::Quiz { session }).await?;

    bot.send_message(dialogue.chat_id(), "🤖 AI正在分析中，请稍候...")
        .reply_markup(finished_keyboard())
        .await?;
    // Only cosmetic, so a failure here is ignored.
    let _ = bot
        .send_chat_action(dialogue.chat_id(), ChatAction::Typing)
        .await;

    tokio::spawn(async move {
        let outcome = advisor.analyze(&ticket).await;
        // Saved before it is shown, and shown outside the chat lock.
        match apply_outcome(&dialogue, &locks, ticket.token, outcome).await {
            Ok(Some(session)) => {
                if let Some(outcome) = session.outcome() {
                    let sent =
                        send_outcome(&bot, dialogue.chat_id(), session.ui_state(), outcome).await;
                    if let Err(e) = sent {
                        log::error!("Failed to send analysis to chat {}: {}", dialogue.chat_id(), e);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("Failed to save analysis for chat {}: {}", dialogue.chat_id(), e),
        }
    });
    Ok(())
}

async fn send_outcome(
    bot: &Bot,
    chat_id: ChatId,
    state: UiState,
    outcome: &AnalysisOutcome,
) -> HandlerResult {
    let text = match state {
        UiState::AnalysisFailed => format!("❌ 分析失败\n\n{}", outcome.summary()),
        _ => format!(
            "📋 分析结果\n{}\n\n💊 医学建议\n{}",
            outcome.summary(),
            outcome.advice()
        ),
    };
    bot.send_message(chat_id, text)
        .reply_markup(finished_keyboard())
        .await?;
    Ok(())
}
