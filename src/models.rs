use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Mcq,
    Truefalse,
    Numeric,
}

/// Workshop session seeded at startup. Immutable after bootstrap;
/// `is_active` gates whether new participants may join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub q_type: QuestionType,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Stored as a string for uniform comparison (option index, "0"/"1"
    /// for true/false, or the literal numeric answer).
    pub correct_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDefinition {
    pub key: String,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
}

/// One answer per (participant, quiz, question); first submission wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub participant_id: String,
    pub quiz_key: String,
    pub question_id: String,
    pub answer: String,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub participant_id: String,
    pub quiz_key: String,
    pub score: u32,
    pub total: u32,
    pub avg_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub participant_id: String,
    pub display_name: String,
    pub quiz_key: String,
    pub score: u32,
    pub total: u32,
    pub avg_time_ms: u64,
    pub rank: u32,
}

/// Persisted record of one completed quiz run, written once by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub id: String,
    pub participant_id: String,
    pub quiz_key: String,
    pub score: u32,
    pub total: u32,
    pub total_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

pub fn check_answer(question: &QuizQuestion, submitted: &str) -> bool {
    question.correct_answer == submitted
}

/// Summarize a participant's answers for one quiz. `question_count` is the
/// quiz's defined length when the quiz is known; for unknown quiz keys the
/// total falls back to the number of recorded answers.
pub fn summarize_answers(
    participant_id: &str,
    quiz_key: &str,
    answers: &[AnswerRecord],
    question_count: Option<usize>,
) -> AttemptSummary {
    let relevant: Vec<&AnswerRecord> = answers
        .iter()
        .filter(|a| a.participant_id == participant_id && a.quiz_key == quiz_key)
        .collect();
    let score = relevant.iter().filter(|a| a.is_correct).count() as u32;
    let total = question_count.unwrap_or(relevant.len()) as u32;
    let avg_time_ms = if relevant.is_empty() {
        0
    } else {
        let sum: u64 = relevant.iter().map(|a| a.time_ms.unwrap_or(0)).sum();
        (sum as f64 / relevant.len() as f64).round() as u64
    };
    AttemptSummary {
        participant_id: participant_id.to_string(),
        quiz_key: quiz_key.to_string(),
        score,
        total,
        avg_time_ms,
    }
}

/// Sort score descending, then average time ascending (faster wins a tie),
/// and assign dense 1-based ranks. Exact ties keep their incoming order and
/// receive distinct sequential ranks.
pub fn rank_rows(rows: &mut [LeaderboardRow]) {
    rows.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.avg_time_ms.cmp(&b.avg_time_ms))
    });
    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank = (idx + 1) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(pid: &str, quiz: &str, qid: &str, correct: bool, time_ms: Option<u64>) -> AnswerRecord {
        AnswerRecord {
            participant_id: pid.into(),
            quiz_key: quiz.into(),
            question_id: qid.into(),
            answer: "0".into(),
            is_correct: correct,
            time_ms,
            submitted_at: Utc::now(),
        }
    }

    fn row(pid: &str, score: u32, avg_time_ms: u64) -> LeaderboardRow {
        LeaderboardRow {
            participant_id: pid.into(),
            display_name: pid.to_uppercase(),
            quiz_key: "quiz".into(),
            score,
            total: 3,
            avg_time_ms,
            rank: 0,
        }
    }

    #[test]
    fn check_answer_is_exact_string_equality() {
        let q = QuizQuestion {
            id: "p1".into(),
            q_type: QuestionType::Mcq,
            prompt: "Pick one".into(),
            options: Some(vec!["a".into(), "b".into()]),
            correct_answer: "1".into(),
        };
        assert!(check_answer(&q, "1"));
        assert!(!check_answer(&q, "0"));
        assert!(!check_answer(&q, "1 "));
    }

    #[test]
    fn summary_counts_correct_and_uses_quiz_length() {
        let answers = vec![
            answer("p", "quiz", "q1", true, Some(400)),
            answer("p", "quiz", "q2", false, Some(600)),
            answer("p", "quiz", "q3", true, None),
        ];
        let summary = summarize_answers("p", "quiz", &answers, Some(5));
        assert_eq!(summary.score, 2);
        assert_eq!(summary.total, 5);
        // (400 + 600 + 0) / 3 rounded
        assert_eq!(summary.avg_time_ms, 333);
    }

    #[test]
    fn summary_ignores_other_participants_and_quizzes() {
        let answers = vec![
            answer("p", "quiz", "q1", true, Some(100)),
            answer("other", "quiz", "q1", true, Some(100)),
            answer("p", "other_quiz", "q1", true, Some(100)),
        ];
        let summary = summarize_answers("p", "quiz", &answers, Some(3));
        assert_eq!(summary.score, 1);
    }

    #[test]
    fn summary_for_unknown_quiz_falls_back_to_answer_count() {
        let answers = vec![
            answer("p", "mystery", "q1", true, Some(200)),
            answer("p", "mystery", "q2", false, Some(400)),
        ];
        let summary = summarize_answers("p", "mystery", &answers, None);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.score, 1);
        assert_eq!(summary.avg_time_ms, 300);
    }

    #[test]
    fn summary_with_no_answers_is_zeroed() {
        let summary = summarize_answers("p", "quiz", &[], Some(3));
        assert_eq!(summary.score, 0);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.avg_time_ms, 0);
    }

    #[test]
    fn ranking_orders_by_score_descending() {
        let mut rows = vec![row("low", 3, 100), row("high", 5, 900)];
        rank_rows(&mut rows);
        assert_eq!(rows[0].participant_id, "high");
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[1].rank, 2);
    }

    #[test]
    fn ranking_breaks_score_ties_by_faster_time() {
        let mut rows = vec![row("slow", 4, 1200), row("fast", 4, 500)];
        rank_rows(&mut rows);
        assert_eq!(rows[0].participant_id, "fast");
        assert_eq!(rows[1].participant_id, "slow");
    }

    #[test]
    fn exact_ties_get_distinct_sequential_ranks() {
        let mut rows = vec![row("first", 2, 700), row("second", 2, 700)];
        rank_rows(&mut rows);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[1].rank, 2);
        // stable sort keeps incoming order
        assert_eq!(rows[0].participant_id, "first");
    }
}
