use crate::models::{
    self, AnswerRecord, AttemptRecord, AttemptSummary, LeaderboardRow, Participant,
    QuestionType, QuizDefinition, QuizQuestion, Session,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::{env, fs};
use tokio::sync::RwLock;
use tracing::warn;

/// All scoring state for one process. Sessions and quizzes are immutable
/// after bootstrap; participants, answers and attempts sit behind locks.
/// Single-process by design: the idempotency check plus conditional append
/// for an answer runs under one write-lock acquisition.
pub struct InMemoryStore {
    sessions: Vec<Session>,
    quizzes: HashMap<String, QuizDefinition>,
    pub participants: RwLock<HashMap<String, Participant>>,
    pub answers: RwLock<Vec<AnswerRecord>>,
    pub attempts: RwLock<Vec<AttemptRecord>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistentSnapshot {
    participants: HashMap<String, Participant>,
    answers: Vec<AnswerRecord>,
    attempts: Vec<AttemptRecord>,
}

impl InMemoryStore {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path
            .and_then(|path| {
                let raw = fs::read_to_string(path).ok()?;
                match serde_json::from_str::<PersistentSnapshot>(&raw) {
                    Ok(s) => Some(s),
                    Err(err) => {
                        warn!("failed to read local snapshot {}: {}", path, err);
                        None
                    }
                }
            })
            .unwrap_or_default();

        Self {
            sessions: seed_sessions(),
            quizzes: seed_quizzes(),
            participants: RwLock::new(snapshot.participants),
            answers: RwLock::new(snapshot.answers),
            attempts: RwLock::new(snapshot.attempts),
        }
    }

    pub fn session_by_id(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn list_sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn quiz(&self, key: &str) -> Option<&QuizDefinition> {
        self.quizzes.get(key)
    }

    pub fn list_quizzes(&self) -> Vec<&QuizDefinition> {
        let mut all: Vec<&QuizDefinition> = self.quizzes.values().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Idempotent registration: an existing participant is returned
    /// unchanged, ignoring the display name and session passed on rejoin.
    /// A returning client with a stale cookie must not silently move
    /// sessions or rename itself.
    pub async fn ensure_participant(
        &self,
        participant_id: &str,
        display_name: &str,
        session_id: &str,
    ) -> Participant {
        let mut participants = self.participants.write().await;
        if let Some(existing) = participants.get(participant_id) {
            return existing.clone();
        }
        let participant = Participant {
            id: participant_id.to_string(),
            display_name: display_name.to_string(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        };
        participants.insert(participant_id.to_string(), participant.clone());
        participant
    }

    pub async fn participant(&self, participant_id: &str) -> Option<Participant> {
        self.participants.read().await.get(participant_id).cloned()
    }

    /// First submission wins: a record matching (participant, quiz,
    /// question) already in the ledger is returned as-is and nothing is
    /// appended. Linear scan, fine at workshop scale.
    pub async fn record_answer(&self, record: AnswerRecord) -> AnswerRecord {
        let mut answers = self.answers.write().await;
        if let Some(existing) = answers.iter().find(|a| {
            a.participant_id == record.participant_id
                && a.quiz_key == record.quiz_key
                && a.question_id == record.question_id
        }) {
            return existing.clone();
        }
        answers.push(record.clone());
        record
    }

    pub async fn attempt_summary(&self, participant_id: &str, quiz_key: &str) -> AttemptSummary {
        let question_count = self.quiz(quiz_key).map(|q| q.questions.len());
        let answers = self.answers.read().await;
        models::summarize_answers(participant_id, quiz_key, &answers, question_count)
    }

    /// Everyone who joined the session appears, quiz-takers or not;
    /// participants are ordered by join time before ranking so ties come
    /// out deterministic.
    pub async fn leaderboard(&self, session_id: &str, quiz_key: &str) -> Vec<LeaderboardRow> {
        let question_count = self.quiz(quiz_key).map(|q| q.questions.len());
        let mut members: Vec<Participant> = {
            let participants = self.participants.read().await;
            participants
                .values()
                .filter(|p| p.session_id == session_id)
                .cloned()
                .collect()
        };
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let answers = self.answers.read().await;
        let mut rows: Vec<LeaderboardRow> = members
            .into_iter()
            .map(|p| {
                let summary = models::summarize_answers(&p.id, quiz_key, &answers, question_count);
                LeaderboardRow {
                    participant_id: p.id,
                    display_name: p.display_name,
                    quiz_key: quiz_key.to_string(),
                    score: summary.score,
                    total: summary.total,
                    avg_time_ms: summary.avg_time_ms,
                    rank: 0,
                }
            })
            .collect();
        drop(answers);

        models::rank_rows(&mut rows);
        rows
    }

    pub async fn record_attempt(&self, record: AttemptRecord) -> AttemptRecord {
        self.attempts.write().await.push(record.clone());
        record
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            participants: self.participants.read().await.clone(),
            answers: self.answers.read().await.clone(),
            attempts: self.attempts.read().await.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InMemoryStore>,
    pub local_state_path: Option<String>,
}

impl AppState {
    /// Snapshot persistence is opt-in via LOCAL_STATE_PATH; unset means
    /// purely in-memory, which is what tests run with.
    pub fn new() -> Self {
        let local_state_path = env::var("LOCAL_STATE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self {
            store: Arc::new(InMemoryStore::new(local_state_path.as_deref())),
            local_state_path,
        }
    }

    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = self.local_state_path.as_ref() else {
            return Ok(());
        };
        let snapshot = self.store.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

fn seed_sessions() -> Vec<Session> {
    let active = [
        ("session-A", "Workshop Session A", "ALPHA"),
        ("session-B", "Workshop Session B", "BRAVO"),
        ("session-C", "Workshop Session C", "CHARLIE"),
        ("session-D", "Workshop Session D", "DELTA"),
        ("session-E", "Workshop Session E", "ECHO"),
    ];
    let mut sessions: Vec<Session> = active
        .iter()
        .map(|(id, name, code)| Session {
            id: id.to_string(),
            name: name.to_string(),
            code: Some(code.to_string()),
            is_active: true,
        })
        .collect();
    sessions.push(Session {
        id: "session-archive".into(),
        name: "Archived Pilot Session".into(),
        code: None,
        is_active: false,
    });
    sessions
}

fn mcq(id: &str, prompt: &str, options: &[&str], correct: &str) -> QuizQuestion {
    QuizQuestion {
        id: id.into(),
        q_type: QuestionType::Mcq,
        prompt: prompt.into(),
        options: Some(options.iter().map(|o| o.to_string()).collect()),
        correct_answer: correct.into(),
    }
}

fn truefalse(id: &str, prompt: &str, correct: &str) -> QuizQuestion {
    QuizQuestion {
        id: id.into(),
        q_type: QuestionType::Truefalse,
        prompt: prompt.into(),
        options: Some(vec!["True".into(), "False".into()]),
        correct_answer: correct.into(),
    }
}

fn numeric(id: &str, prompt: &str, correct: &str) -> QuizQuestion {
    QuizQuestion {
        id: id.into(),
        q_type: QuestionType::Numeric,
        prompt: prompt.into(),
        options: None,
        correct_answer: correct.into(),
    }
}

fn seed_quizzes() -> HashMap<String, QuizDefinition> {
    let session1 = QuizDefinition {
        key: "session1_practice".into(),
        title: "Session 1 Practice Quiz".into(),
        questions: vec![
            mcq(
                "p1",
                "Which temperature setting makes a language model's output more deterministic?",
                &["A higher temperature", "A lower temperature", "Temperature has no effect", "Only the prompt matters"],
                "1",
            ),
            mcq(
                "p2",
                "What is the best first step when a model's answer looks wrong?",
                &["Check the prompt and context you gave it", "Assume the model is broken", "Retrain the model", "Switch vendors"],
                "0",
            ),
            truefalse(
                "p3",
                "A language model can verify its own factual claims against live sources by default.",
                "1",
            ),
        ],
    };
    let session2 = QuizDefinition {
        key: "session2_practice".into(),
        title: "Session 2 Practice Quiz".into(),
        questions: vec![
            mcq(
                "p1",
                "Which task is the strongest early automation candidate?",
                &["High-volume repetitive drafting", "One-off strategic decisions", "Final sign-off on legal filings", "Hiring decisions"],
                "0",
            ),
            numeric(
                "p2",
                "A pilot saves 3 hours per person per week across 14 people. How many hours per week is that?",
                "42",
            ),
            truefalse(
                "p3",
                "Measuring adoption only by login counts is a reliable ROI signal.",
                "1",
            ),
        ],
    };

    let mut quizzes = HashMap::new();
    quizzes.insert(session1.key.clone(), session1);
    quizzes.insert(session2.key.clone(), session2);
    quizzes
}
