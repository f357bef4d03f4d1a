//! Fixed-formula auto-grading for text submissions.
//!
//! grade = clamp(round(base + content - penalty), 0, max) where base is half
//! of the marks, content is capped at 30% and the penalty depends on the
//! plagiarism bucket.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentStats {
    pub words: usize,
    pub sentences: usize,
    pub paragraphs: usize,
    pub has_introduction: bool,
    pub has_conclusion: bool,
}

/// Counts pieces the way a regex split would: separators are maximal runs,
/// so the piece count is one more than the number of runs.
pub fn content_stats(content: &str) -> ContentStats {
    let words = content.split_whitespace().count();

    let mut sentence_runs = 0usize;
    let mut in_terminator = false;
    for ch in content.chars() {
        let is_term = matches!(ch, '.' | '!' | '?');
        if is_term && !in_terminator {
            sentence_runs += 1;
        }
        in_terminator = is_term;
    }

    let mut paragraph_breaks = 0usize;
    let mut newlines_in_run = 0usize;
    for ch in content.chars().chain(std::iter::once('x')) {
        if ch.is_whitespace() {
            if ch == '\n' {
                newlines_in_run += 1;
            }
            continue;
        }
        if newlines_in_run >= 2 {
            paragraph_breaks += 1;
        }
        newlines_in_run = 0;
    }

    let lower = content.to_lowercase();
    ContentStats {
        words,
        sentences: sentence_runs + 1,
        paragraphs: paragraph_breaks + 1,
        has_introduction: lower.contains("introduction") || lower.contains("overview"),
        has_conclusion: lower.contains("conclusion") || lower.contains("summary"),
    }
}

pub fn content_score(content: &str, cap: f64) -> f64 {
    if content.is_empty() {
        return 0.0;
    }
    let s = content_stats(content);
    let mut score = 0.0;

    score += cap
        * if s.words >= 500 {
            0.4
        } else if s.words >= 300 {
            0.3
        } else if s.words >= 150 {
            0.2
        } else {
            0.1
        };

    score += cap
        * if s.paragraphs >= 3 && s.sentences >= 10 {
            0.3
        } else if s.paragraphs >= 2 && s.sentences >= 5 {
            0.2
        } else {
            0.1
        };

    if s.has_introduction && s.has_conclusion {
        score += cap * 0.3;
    } else if s.has_introduction || s.has_conclusion {
        score += cap * 0.15;
    }

    score.round()
}

fn format_score(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{p:.0}")
    } else {
        format!("{p}")
    }
}

/// Returns the penalty in marks and the note describing the bucket.
pub fn plagiarism_penalty(score: f64, max_marks: f64) -> (f64, String) {
    let shown = format_score(score);
    if score > 25.0 {
        (
            max_marks * 0.4,
            format!("High plagiarism detected ({shown}%) - Major penalty applied"),
        )
    } else if score > 15.0 {
        (
            max_marks * 0.2,
            format!("Moderate plagiarism detected ({shown}%) - Penalty applied"),
        )
    } else if score > 8.0 {
        (
            max_marks * 0.1,
            format!("Minor plagiarism detected ({shown}%) - Small penalty applied"),
        )
    } else {
        (0.0, format!("Good originality ({shown}% similarity)"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoGrade {
    pub grade: f64,
    pub notes: Vec<String>,
}

impl AutoGrade {
    pub fn feedback(&self) -> String {
        format!("Auto-graded: {}", self.notes.join(". "))
    }
}

pub fn auto_grade(content: &str, plagiarism_score: f64, max_marks: f64) -> AutoGrade {
    let mut notes = Vec::new();
    let base = max_marks * 0.5;
    let content_part = content_score(content, max_marks * 0.3);
    let (penalty, note) = plagiarism_penalty(plagiarism_score, max_marks);
    notes.push(note);

    let grade = (base + content_part - penalty).round().max(0.0).min(max_marks);

    notes.push(
        if grade >= max_marks * 0.9 {
            "Excellent work with high originality"
        } else if grade >= max_marks * 0.7 {
            "Good work with room for improvement"
        } else if grade >= max_marks * 0.5 {
            "Satisfactory work but needs significant improvement"
        } else {
            "Needs major revision and improvement"
        }
        .to_string(),
    );

    AutoGrade { grade, notes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn essay(words_per_paragraph: usize, paragraphs: usize, lead: &str, tail: &str) -> String {
        let body = (0..paragraphs)
            .map(|_| {
                let words = vec!["word"; words_per_paragraph].join(" ");
                format!("{words}. Second line here. Third one!")
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("{lead} {body} {tail}")
    }

    #[test]
    fn stats_count_runs_not_characters() {
        let s = content_stats("One... Two?! Three.\n\n\nFour\n \nFive");
        assert_eq!(s.words, 5);
        assert_eq!(s.sentences, 4);
        assert_eq!(s.paragraphs, 3);
        assert!(!s.has_introduction);
    }

    #[test]
    fn single_newline_is_not_a_paragraph_break() {
        assert_eq!(content_stats("a\nb\nc").paragraphs, 1);
    }

    #[test]
    fn empty_content_scores_zero() {
        assert_eq!(content_score("", 30.0), 0.0);
    }

    #[test]
    fn long_structured_essay_earns_full_content() {
        let text = essay(200, 3, "Introduction:", "In conclusion, done.");
        // 0.4 + 0.3 + 0.3 of the cap
        assert_eq!(content_score(&text, 30.0), 30.0);
    }

    #[test]
    fn short_answer_gets_floor_scores() {
        // 0.1 + 0.1 of 30 = 6
        assert_eq!(content_score("Just a line", 30.0), 6.0);
        // one keyword adds 0.15 of 30 = 4.5 -> 10.5 rounds to 11
        assert_eq!(content_score("Summary only", 30.0), 11.0);
    }

    #[test]
    fn penalty_buckets() {
        assert_eq!(plagiarism_penalty(30.0, 100.0).0, 40.0);
        assert_eq!(plagiarism_penalty(25.0, 100.0).0, 20.0);
        assert_eq!(plagiarism_penalty(15.0, 100.0).0, 10.0);
        assert_eq!(plagiarism_penalty(8.0, 100.0).0, 0.0);
        assert_eq!(
            plagiarism_penalty(12.5, 100.0).1,
            "Minor plagiarism detected (12.5%) - Small penalty applied"
        );
    }

    #[test]
    fn original_full_essay_is_excellent() {
        let text = essay(200, 3, "Overview.", "Summary.");
        let g = auto_grade(&text, 0.0, 100.0);
        assert_eq!(g.grade, 80.0);
        assert_eq!(g.notes[0], "Good originality (0% similarity)");
        assert_eq!(g.notes[1], "Good work with room for improvement");
    }

    #[test]
    fn heavy_plagiarism_drops_grade() {
        let g = auto_grade("tiny", 40.0, 10.0);
        // 5 + round(0.3 + 0.3) - 4 = 2
        assert_eq!(g.grade, 2.0);
        assert_eq!(g.notes[1], "Needs major revision and improvement");
        assert!(g.feedback().starts_with("Auto-graded: High plagiarism detected (40%)"));
    }

    #[test]
    fn grade_never_exceeds_max_or_goes_negative() {
        let text = essay(200, 3, "Introduction", "Conclusion");
        assert!(auto_grade(&text, 0.0, 1.0).grade <= 1.0);
        assert!(auto_grade("", 99.0, 1.0).grade >= 0.0);
    }
}
