use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use teloxide::dispatching::dialogue::{Dialogue, Storage};
use teloxide::types::ChatId;

use crate::quiz::session::{AnalysisOutcome, QuizSession};

#[derive(Clone, Default, Debug, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceivePartChoice,
    Quiz {
        session: QuizSession,
    },
}

/// One async lock per chat. Every read-modify-write of a chat's dialogue
/// state happens while holding it.
#[derive(Default)]
pub struct ChatLocks {
    locks: Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, chat_id: ChatId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(chat_id).or_default().clone()
    }
}

/// Loads the chat's current session, applies a finished analysis to it and
/// saves it back, all under the chat lock. Returns the updated session when
/// the outcome was accepted; `None` means it was stale and dropped.
pub async fn apply_outcome<S>(
    dialogue: &Dialogue<State, S>,
    locks: &ChatLocks,
    token: u64,
    outcome: AnalysisOutcome,
) -> Result<Option<QuizSession>, S::Error>
where
    S: Storage<State> + ?Sized,
{
    let lock = locks.lock_for(dialogue.chat_id());
    let _guard = lock.lock().await;

    let Some(State::Quiz { mut session }) = dialogue.get().await? else {
        log::info!("Chat {} left the quiz, dropping analysis", dialogue.chat_id());
        return Ok(None);
    };
    if !session.complete_analysis(token, outcome) {
        log::info!("Dropping stale analysis for chat {}", dialogue.chat_id());
        return Ok(None);
    }

    dialogue
        .update(State::Quiz {
            session: session.clone(),
        })
        .await?;
    Ok(Some(session))
}

#[cfg(test)]
mod tests {
    use teloxide::dispatching::dialogue::InMemStorage;

    use super::*;
    use crate::quiz::bank::QuestionBank;
    use crate::quiz::session::UiState;

    type TestDialogue = Dialogue<State, InMemStorage<State>>;

    const BANK: &str = r#"[
        {"id": "liver", "label": "肝脏", "questions": [
            {"text": "你经常熬夜吗？", "options": ["是", "否"]},
            {"text": "你喝酒吗？", "options": ["经常", "从不"]}
        ]}
    ]"#;

    fn finished_session() -> QuizSession {
        let bank = QuestionBank::from_reader(BANK.as_bytes()).unwrap();
        let mut session = QuizSession::start("liver", &bank).unwrap();
        session.select_option("是").unwrap();
        session.select_option("经常").unwrap();
        session
    }

    fn outcome() -> AnalysisOutcome {
        AnalysisOutcome::Success {
            summary: "肝脏有些疲劳".to_string(),
            advice: "早点睡，少喝酒".to_string(),
        }
    }

    async fn stored_session(dialogue: &TestDialogue) -> QuizSession {
        match dialogue.get().await.unwrap() {
            Some(State::Quiz { session }) => session,
            _ => panic!("chat is not in a quiz"),
        }
    }

    /// A pending session saved to storage, plus the token of its request.
    async fn pending_dialogue() -> (TestDialogue, u64) {
        let dialogue = Dialogue::new(InMemStorage::<State>::new(), ChatId(42));
        let mut session = finished_session();
        let ticket = session.begin_analysis().unwrap();
        dialogue.update(State::Quiz { session }).await.unwrap();
        (dialogue, ticket.token)
    }

    #[tokio::test]
    async fn outcome_is_saved() {
        let (dialogue, token) = pending_dialogue().await;
        let locks = ChatLocks::new();

        let applied = apply_outcome(&dialogue, &locks, token, outcome()).await.unwrap();
        assert_eq!(applied.unwrap().outcome(), Some(&outcome()));

        let stored = stored_session(&dialogue).await;
        assert_eq!(stored.ui_state(), UiState::AnalysisReady);
        assert_eq!(stored.outcome(), Some(&outcome()));
    }

    #[tokio::test]
    async fn restart_saved_first_wins() {
        let (dialogue, token) = pending_dialogue().await;
        let locks = ChatLocks::new();

        let mut restarted = stored_session(&dialogue).await;
        restarted.reset();
        dialogue
            .update(State::Quiz {
                session: restarted.clone(),
            })
            .await
            .unwrap();

        let applied = apply_outcome(&dialogue, &locks, token, outcome()).await.unwrap();
        assert!(applied.is_none());
        assert_eq!(stored_session(&dialogue).await, restarted);
    }

    #[tokio::test]
    async fn restart_during_delivery_is_not_overwritten() {
        let (dialogue, token) = pending_dialogue().await;
        let locks = Arc::new(ChatLocks::new());

        // A handler is busy with this chat when the analysis comes back.
        let lock = locks.lock_for(dialogue.chat_id());
        let guard = lock.lock().await;

        let delivery = tokio::spawn({
            let dialogue = dialogue.clone();
            let locks = locks.clone();
            async move { apply_outcome(&dialogue, &locks, token, outcome()).await }
        });
        tokio::task::yield_now().await;
        assert!(!delivery.is_finished());

        // The handler restarts the quiz and saves it before letting go.
        let mut restarted = stored_session(&dialogue).await;
        restarted.reset();
        dialogue
            .update(State::Quiz {
                session: restarted.clone(),
            })
            .await
            .unwrap();
        drop(guard);

        let applied = delivery.await.unwrap().unwrap();
        assert!(applied.is_none());
        let stored = stored_session(&dialogue).await;
        assert_eq!(stored, restarted);
        assert!(stored.outcome().is_none());
        assert_eq!(stored.ui_state(), UiState::InProgress);
    }

    #[tokio::test]
    async fn reselect_drops_outcome() {
        let (dialogue, token) = pending_dialogue().await;
        dialogue.update(State::ReceivePartChoice).await.unwrap();

        let applied = apply_outcome(&dialogue, &ChatLocks::new(), token, outcome())
            .await
            .unwrap();
        assert!(applied.is_none());
        assert!(matches!(
            dialogue.get().await.unwrap(),
            Some(State::ReceivePartChoice)
        ));
    }

    #[test]
    fn same_chat_shares_a_lock() {
        let locks = ChatLocks::new();
        assert!(Arc::ptr_eq(&locks.lock_for(ChatId(1)), &locks.lock_for(ChatId(1))));
        assert!(!Arc::ptr_eq(&locks.lock_for(ChatId(1)), &locks.lock_for(ChatId(2))));
    }
}
