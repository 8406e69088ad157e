use crate::models::{AttemptSummary, QuizQuestion};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AnswerFeedback {
    pub is_correct: bool,
    pub summary: AttemptSummary,
}

/// The endpoints the runner drives. Implemented over HTTP below; tests use
/// a mock.
#[async_trait]
pub trait QuizBackend: Send + Sync {
    async fn submit_answer(
        &self,
        quiz_key: &str,
        question_id: &str,
        answer: &str,
        time_ms: u64,
    ) -> anyhow::Result<AnswerFeedback>;

    async fn create_attempt(
        &self,
        quiz_key: &str,
        score: u32,
        total: u32,
        total_time_ms: u64,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunnerPhase {
    Loading,
    QuestionActive { index: usize },
    Feedback { index: usize, is_correct: bool },
    Finished { score: u32, total: u32, attempt_id: String },
}

/// Drives one quiz run: loading, one active question at a time, per-answer
/// feedback, then a finished summary. Each question accepts exactly one
/// submission, and the attempt record is created exactly once per run.
pub struct QuizRunner {
    backend: Arc<dyn QuizBackend>,
    quiz_key: String,
    questions: Vec<QuizQuestion>,
    phase: RunnerPhase,
    question_started: Option<Instant>,
    score: u32,
    total_time_ms: u64,
    attempt_id: Option<String>,
}

impl QuizRunner {
    pub fn new(backend: Arc<dyn QuizBackend>, quiz_key: impl Into<String>, questions: Vec<QuizQuestion>) -> Self {
        Self {
            backend,
            quiz_key: quiz_key.into(),
            questions,
            phase: RunnerPhase::Loading,
            question_started: None,
            score: 0,
            total_time_ms: 0,
            attempt_id: None,
        }
    }

    pub fn phase(&self) -> &RunnerPhase {
        &self.phase
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        match self.phase {
            RunnerPhase::QuestionActive { index } | RunnerPhase::Feedback { index, .. } => {
                self.questions.get(index)
            }
            _ => None,
        }
    }

    pub async fn start(&mut self) {
        if self.phase != RunnerPhase::Loading {
            return;
        }
        if self.questions.is_empty() {
            self.finish().await;
        } else {
            self.activate(0);
        }
    }

    /// Entering a question captures the start timestamp and clears any
    /// prior selection/feedback.
    fn activate(&mut self, index: usize) {
        self.question_started = Some(Instant::now());
        self.phase = RunnerPhase::QuestionActive { index };
    }

    /// Accepted only while a question is active; the first submission moves
    /// the runner to feedback, so a second one for the same question is
    /// rejected.
    pub async fn submit(&mut self, answer: &str) -> anyhow::Result<AnswerFeedback> {
        let RunnerPhase::QuestionActive { index } = self.phase else {
            anyhow::bail!("no active question to answer");
        };
        let elapsed_ms = self
            .question_started
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let question_id = self.questions[index].id.clone();
        let feedback = self
            .backend
            .submit_answer(&self.quiz_key, &question_id, answer, elapsed_ms)
            .await?;
        if feedback.is_correct {
            self.score += 1;
        }
        self.total_time_ms += elapsed_ms;
        self.phase = RunnerPhase::Feedback {
            index,
            is_correct: feedback.is_correct,
        };
        Ok(feedback)
    }

    /// Moves to the next question, or finishes the run after the last one.
    /// Calling again after completion is a no-op.
    pub async fn advance(&mut self) {
        if let RunnerPhase::Feedback { index, .. } = self.phase {
            let next = index + 1;
            if next < self.questions.len() {
                self.activate(next);
            } else {
                self.finish().await;
            }
        }
    }

    async fn finish(&mut self) {
        let total = self.questions.len() as u32;
        if self.attempt_id.is_none() {
            let id = match self
                .backend
                .create_attempt(&self.quiz_key, self.score, total, self.total_time_ms)
                .await
            {
                Ok(id) => id,
                Err(err) => {
                    // The run still reports a finished summary locally.
                    warn!("failed to record attempt: {}", err);
                    String::new()
                }
            };
            self.attempt_id = Some(id);
        }
        self.phase = RunnerPhase::Finished {
            score: self.score,
            total,
            attempt_id: self.attempt_id.clone().unwrap_or_default(),
        };
    }
}

/// HTTP implementation of [`QuizBackend`]; the cookie store carries the
/// participant identity established by `join`.
pub struct HttpQuizClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpQuizClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub async fn join(&self, display_name: &str, session_id: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/v1/join", self.base_url))
            .json(&json!({ "displayName": display_name, "sessionId": session_id }))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("join rejected with status {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body["participantId"].as_str().unwrap_or_default().to_string())
    }

    pub async fn fetch_questions(&self, quiz_key: &str) -> anyhow::Result<Vec<QuizQuestion>> {
        let resp = self
            .client
            .get(format!("{}/api/v1/quizzes/current", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("quiz fetch failed with status {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        let questions = body["questions"]
            .get(quiz_key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("quiz {} not in catalog", quiz_key))?;
        Ok(serde_json::from_value(questions)?)
    }
}

#[async_trait]
impl QuizBackend for HttpQuizClient {
    async fn submit_answer(
        &self,
        quiz_key: &str,
        question_id: &str,
        answer: &str,
        time_ms: u64,
    ) -> anyhow::Result<AnswerFeedback> {
        let resp = self
            .client
            .post(format!("{}/api/v1/answers", self.base_url))
            .json(&json!({
                "quizKey": quiz_key,
                "questionId": question_id,
                "answer": answer,
                "timeMs": time_ms,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("answer rejected with status {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        let is_correct = body["isCorrect"].as_bool().unwrap_or(false);
        let summary: AttemptSummary = serde_json::from_value(body["summary"].clone())?;
        Ok(AnswerFeedback { is_correct, summary })
    }

    async fn create_attempt(
        &self,
        quiz_key: &str,
        score: u32,
        total: u32,
        total_time_ms: u64,
    ) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/v1/attempts", self.base_url))
            .json(&json!({
                "quizKey": quiz_key,
                "score": score,
                "total": total,
                "totalTimeMs": total_time_ms,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("attempt rejected with status {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body["attemptId"].as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionType;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockBackend {
        attempts_created: AtomicU32,
        fail_attempt: bool,
    }

    impl MockBackend {
        fn new(fail_attempt: bool) -> Arc<Self> {
            Arc::new(Self {
                attempts_created: AtomicU32::new(0),
                fail_attempt,
            })
        }
    }

    #[async_trait]
    impl QuizBackend for MockBackend {
        async fn submit_answer(
            &self,
            quiz_key: &str,
            _question_id: &str,
            answer: &str,
            _time_ms: u64,
        ) -> anyhow::Result<AnswerFeedback> {
            let is_correct = answer == "1";
            Ok(AnswerFeedback {
                is_correct,
                summary: AttemptSummary {
                    participant_id: "mock".into(),
                    quiz_key: quiz_key.into(),
                    score: u32::from(is_correct),
                    total: 2,
                    avg_time_ms: 0,
                },
            })
        }

        async fn create_attempt(
            &self,
            _quiz_key: &str,
            _score: u32,
            _total: u32,
            _total_time_ms: u64,
        ) -> anyhow::Result<String> {
            if self.fail_attempt {
                anyhow::bail!("backend unavailable");
            }
            let n = self.attempts_created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("attempt-{n}"))
        }
    }

    fn questions() -> Vec<QuizQuestion> {
        ["q1", "q2"]
            .iter()
            .map(|id| QuizQuestion {
                id: id.to_string(),
                q_type: QuestionType::Mcq,
                prompt: format!("prompt {id}"),
                options: Some(vec!["a".into(), "b".into()]),
                correct_answer: "1".into(),
            })
            .collect()
    }

    #[tokio::test]
    async fn run_finishes_and_records_one_attempt() {
        let backend = MockBackend::new(false);
        let mut runner = QuizRunner::new(backend.clone(), "quiz", questions());
        assert_eq!(*runner.phase(), RunnerPhase::Loading);

        runner.start().await;
        assert_eq!(*runner.phase(), RunnerPhase::QuestionActive { index: 0 });

        let feedback = runner.submit("1").await.unwrap();
        assert!(feedback.is_correct);
        runner.advance().await;

        let feedback = runner.submit("0").await.unwrap();
        assert!(!feedback.is_correct);
        runner.advance().await;

        match runner.phase() {
            RunnerPhase::Finished { score, total, attempt_id } => {
                assert_eq!(*score, 1);
                assert_eq!(*total, 2);
                assert_eq!(attempt_id, "attempt-1");
            }
            other => panic!("expected finished, got {other:?}"),
        }

        // hammering "next" after completion must not duplicate the attempt
        runner.advance().await;
        runner.advance().await;
        assert_eq!(backend.attempts_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_submission_for_same_question_is_rejected() {
        let backend = MockBackend::new(false);
        let mut runner = QuizRunner::new(backend, "quiz", questions());
        runner.start().await;
        runner.submit("1").await.unwrap();
        assert!(runner.submit("0").await.is_err());
    }

    #[tokio::test]
    async fn attempt_failure_still_finishes_with_empty_id() {
        let backend = MockBackend::new(true);
        let mut runner = QuizRunner::new(backend, "quiz", questions());
        runner.start().await;
        runner.submit("1").await.unwrap();
        runner.advance().await;
        runner.submit("1").await.unwrap();
        runner.advance().await;

        match runner.phase() {
            RunnerPhase::Finished { score, attempt_id, .. } => {
                assert_eq!(*score, 2);
                assert!(attempt_id.is_empty());
            }
            other => panic!("expected finished, got {other:?}"),
        }
    }
}
