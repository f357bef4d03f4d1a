use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use serde_json::json;

use super::notifications::notify;
use crate::grading;
use crate::identity::{normalize_department, normalize_year};
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, one_of, optional_bool, optional_f64, optional_i64,
    optional_str, optional_str_list, optional_text, parse_timestamp, require_row, required_f64,
    required_str, rfc3339, str_alias, timestamp_param, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const TYPES: &[&str] = &["file_upload", "text_based", "quiz", "coding"];
const STATUSES: &[&str] = &["draft", "published", "closed"];
const ASSIGNMENT_COLUMNS: &str = "id, title, description, faculty_id, department, year, class_id, assignment_type, allowed_file_types, word_limit, max_marks, start_date, due_date, visibility, allow_late_submission, allow_resubmission, enable_plagiarism_check, allow_group_submission, status, created_at";
const SUBMISSION_COLUMNS: &str = "sub.id, sub.assignment_id, sub.student_id, st.name, st.prn, sub.content, sub.attachment_url, sub.status, sub.submitted_at, sub.plagiarism_score, sub.grade, sub.feedback, sub.graded_at, sub.graded_by, a.title";

fn split_file_types(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn assignment_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "description": r.get::<_, String>(2)?,
        "facultyId": r.get::<_, String>(3)?,
        "department": r.get::<_, String>(4)?,
        "year": r.get::<_, String>(5)?,
        "classId": r.get::<_, Option<String>>(6)?,
        "assignmentType": r.get::<_, String>(7)?,
        "allowedFileTypes": split_file_types(r.get(8)?),
        "wordLimit": r.get::<_, Option<i64>>(9)?,
        "maxMarks": r.get::<_, f64>(10)?,
        "startDate": r.get::<_, Option<String>>(11)?,
        "dueDate": r.get::<_, String>(12)?,
        "visibility": r.get::<_, i64>(13)? != 0,
        "allowLateSubmission": r.get::<_, i64>(14)? != 0,
        "allowResubmission": r.get::<_, i64>(15)? != 0,
        "enablePlagiarismCheck": r.get::<_, i64>(16)? != 0,
        "allowGroupSubmission": r.get::<_, i64>(17)? != 0,
        "status": r.get::<_, String>(18)?,
        "createdAt": r.get::<_, String>(19)?,
    }))
}

fn submission_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "assignmentId": r.get::<_, String>(1)?,
        "studentId": r.get::<_, String>(2)?,
        "studentName": r.get::<_, Option<String>>(3)?,
        "studentPrn": r.get::<_, Option<String>>(4)?,
        "content": r.get::<_, Option<String>>(5)?,
        "attachmentUrl": r.get::<_, Option<String>>(6)?,
        "status": r.get::<_, String>(7)?,
        "submittedAt": r.get::<_, String>(8)?,
        "plagiarismScore": r.get::<_, Option<f64>>(9)?,
        "grade": r.get::<_, Option<f64>>(10)?,
        "feedback": r.get::<_, Option<String>>(11)?,
        "gradedAt": r.get::<_, Option<String>>(12)?,
        "gradedBy": r.get::<_, Option<String>>(13)?,
        "assignmentTitle": r.get::<_, Option<String>>(14)?,
    }))
}

/// `allowedFileTypes` (list) wins over `allowedFormats` (`{ext: bool}`).
fn allowed_file_types(params: &serde_json::Value) -> Result<Vec<String>, HandlerError> {
    if let Some(list) = optional_str_list(params, "allowedFileTypes")? {
        return Ok(list
            .into_iter()
            .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect());
    }
    match params.get("allowedFormats") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Object(map)) => {
            let mut types: Vec<String> = map
                .iter()
                .filter(|(_, v)| v.as_bool().unwrap_or(false))
                .map(|(k, _)| k.to_ascii_lowercase())
                .collect();
            types.sort();
            Ok(types)
        }
        Some(_) => Err(HandlerError::bad_params("allowedFormats must be an object")),
    }
}

fn assignments_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let title = required_str(params, "title")?;
    let description = optional_str(params, "description").unwrap_or_default();
    let faculty_id = required_str(params, "facultyId")?;
    let department = normalize_department(&required_str(params, "department")?);
    let year = normalize_year(&required_str(params, "year")?);
    let class_id = optional_str(params, "classId");
    let assignment_type = required_str(params, "assignmentType")?;
    one_of(&assignment_type, TYPES, "assignmentType")?;
    let max_marks = required_f64(params, "maxMarks")?;
    if max_marks <= 0.0 {
        return Err(HandlerError::bad_params("maxMarks must be greater than 0"));
    }
    let due_date = timestamp_param(params, "dueDate")?
        .ok_or_else(|| HandlerError::bad_params("missing dueDate"))?;
    let start_date = timestamp_param(params, "startDate")?;
    if start_date.is_some_and(|s| s > due_date) {
        return Err(HandlerError::bad_params("startDate must be before dueDate"));
    }
    let word_limit = optional_i64(params, "wordLimit")?;
    if word_limit.is_some_and(|w| w <= 0) {
        return Err(HandlerError::bad_params("wordLimit must be positive"));
    }
    let file_types = allowed_file_types(params)?;
    let visibility = optional_bool(params, "visibility")?.unwrap_or(true);
    let allow_late = optional_bool(params, "allowLateSubmission")?.unwrap_or(false);
    let allow_resubmission = optional_bool(params, "allowResubmission")?.unwrap_or(false);
    let plagiarism_check = match optional_bool(params, "enablePlagiarismCheck")? {
        Some(v) => v,
        None => optional_bool(params, "allowPlagiarism")?.unwrap_or(false),
    };
    let allow_group = optional_bool(params, "allowGroupSubmission")?.unwrap_or(false);
    let status = optional_str(params, "status").unwrap_or_else(|| "published".to_string());
    one_of(&status, STATUSES, "status")?;

    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    if let Some(c) = class_id.as_deref() {
        require_row(ctx.conn, "classes", c, "class")?;
    }

    let id = new_id();
    let due = rfc3339(due_date);
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO assignments(id, title, description, faculty_id, department, year, class_id, assignment_type, allowed_file_types, word_limit, max_marks, start_date, due_date, visibility, allow_late_submission, allow_resubmission, enable_plagiarism_check, allow_group_submission, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            title,
            description,
            faculty_id,
            department,
            year,
            class_id,
            assignment_type,
            (!file_types.is_empty()).then(|| file_types.join(",")),
            word_limit,
            max_marks,
            start_date.map(rfc3339),
            due,
            visibility as i64,
            allow_late as i64,
            allow_resubmission as i64,
            plagiarism_check as i64,
            allow_group as i64,
            status,
            now_rfc3339()
        ],
    )?;

    let mut notified = 0usize;
    if status == "published" && visibility {
        let recipients: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM students
                 WHERE department = ?1 AND year = ?2 AND (?3 IS NULL OR class_id = ?3)",
            )?;
            let ids = stmt
                .query_map((&department, &year, &class_id), |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let content = format!("New assignment: {title} (due {due})");
        for student_id in &recipients {
            notify(&tx, student_id, "general", &content, Some(&id))?;
        }
        notified = recipients.len();
    }
    tx.commit()?;

    tracing::info!(assignment_id = %id, notified, "assignment created");
    Ok(json!({ "assignmentId": id, "status": status, "studentsNotified": notified }))
}

fn assignments_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let assignments = if let Some(faculty_id) = optional_str(params, "facultyId") {
        let mut stmt = ctx.conn.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE faculty_id = ? ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map([&faculty_id], assignment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let department = optional_str(params, "department")
            .map(|d| normalize_department(&d))
            .ok_or_else(|| HandlerError::bad_params("facultyId or department and year required"))?;
        let year = optional_str(params, "year")
            .map(|y| normalize_year(&y))
            .ok_or_else(|| HandlerError::bad_params("facultyId or department and year required"))?;
        let mut stmt = ctx.conn.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS}
             FROM assignments
             WHERE department = ? AND year = ? AND status = 'published' AND visibility = 1
             ORDER BY due_date"
        ))?;
        let rows = stmt
            .query_map((&department, &year), assignment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    Ok(json!({ "assignments": assignments }))
}

fn assignments_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let assignment_id = required_str(params, "assignmentId")?;
    let mut assignment = ctx
        .conn
        .query_row(
            &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?"),
            [&assignment_id],
            assignment_from_row,
        )
        .optional()?
        .ok_or(HandlerError::NotFound("assignment"))?;
    let (total, graded, late): (i64, i64, i64) = ctx.conn.query_row(
        "SELECT
           COUNT(*),
           COALESCE(SUM(CASE WHEN grade IS NOT NULL THEN 1 ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN status = 'late' THEN 1 ELSE 0 END), 0)
         FROM assignment_submissions WHERE assignment_id = ?",
        [&assignment_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    assignment["submissionCount"] = json!(total);
    assignment["gradedCount"] = json!(graded);
    assignment["lateCount"] = json!(late);
    Ok(json!({ "assignment": assignment }))
}

fn assignments_close(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let assignment_id = required_str(params, "assignmentId")?;
    let changed = ctx.conn.execute(
        "UPDATE assignments SET status = 'closed', updated_at = ? WHERE id = ?",
        (now_rfc3339(), &assignment_id),
    )?;
    if changed == 0 {
        return Err(HandlerError::NotFound("assignment"));
    }
    Ok(json!({ "assignmentId": assignment_id, "status": "closed" }))
}

struct SubmissionRules {
    assignment_type: String,
    allowed_file_types: Vec<String>,
    word_limit: Option<i64>,
    start_date: Option<String>,
    due_date: String,
    allow_late: bool,
    allow_resubmission: bool,
    status: String,
}

fn file_extension(url: &str) -> Option<String> {
    let name = url.rsplit('/').next()?;
    let name = name.split(['?', '#']).next()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn submissions_submit(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let content = optional_text(params, "content");
    let attachment_url = str_alias(params, &["attachmentUrl", "fileUrl"]);
    let plagiarism_score = optional_f64(params, "plagiarismScore")?;
    if plagiarism_score.is_some_and(|p| !(0.0..=100.0).contains(&p)) {
        return Err(HandlerError::bad_params("plagiarismScore must be between 0 and 100"));
    }
    if content.is_none() && attachment_url.is_none() {
        return Err(HandlerError::bad_params("content or attachmentUrl is required"));
    }

    let rules = ctx
        .conn
        .query_row(
            "SELECT assignment_type, allowed_file_types, word_limit, start_date, due_date,
                    allow_late_submission, allow_resubmission, status
             FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| {
                Ok(SubmissionRules {
                    assignment_type: r.get(0)?,
                    allowed_file_types: split_file_types(r.get(1)?),
                    word_limit: r.get(2)?,
                    start_date: r.get(3)?,
                    due_date: r.get(4)?,
                    allow_late: r.get::<_, i64>(5)? != 0,
                    allow_resubmission: r.get::<_, i64>(6)? != 0,
                    status: r.get(7)?,
                })
            },
        )
        .optional()?
        .ok_or(HandlerError::NotFound("assignment"))?;
    require_row(ctx.conn, "students", &student_id, "student")?;

    match rules.status.as_str() {
        "published" => {}
        "closed" => return Err(HandlerError::conflict("assignment is closed")),
        _ => return Err(HandlerError::conflict("assignment is not open for submissions")),
    }
    let now = Utc::now();
    if rules
        .start_date
        .as_deref()
        .and_then(parse_timestamp)
        .is_some_and(|start| now < start)
    {
        return Err(HandlerError::conflict("assignment has not started yet"));
    }
    let is_late = parse_timestamp(&rules.due_date).is_some_and(|due| now > due);
    if is_late && !rules.allow_late {
        return Err(HandlerError::conflict(
            "the due date has passed and late submissions are not allowed",
        ));
    }
    if let (Some(limit), Some(text)) = (rules.word_limit, content.as_deref()) {
        let words = grading::content_stats(text).words as i64;
        if rules.assignment_type == "text_based" && words > limit {
            return Err(HandlerError::bad_params(format!(
                "submission has {words} words; the limit is {limit}"
            )));
        }
    }
    if let Some(url) = attachment_url.as_deref() {
        if !rules.allowed_file_types.is_empty() {
            let ext = file_extension(url).unwrap_or_default();
            if !rules.allowed_file_types.contains(&ext) {
                return Err(HandlerError::bad_params(format!(
                    "file type must be one of: {}",
                    rules.allowed_file_types.join(", ")
                )));
            }
        }
    }

    let status = if is_late { "late" } else { "submitted" };
    let existing: Option<String> = ctx
        .conn
        .query_row(
            "SELECT id FROM assignment_submissions WHERE assignment_id = ? AND student_id = ?",
            (&assignment_id, &student_id),
            |r| r.get(0),
        )
        .optional()?;
    let submitted_at = now_rfc3339();
    let (id, resubmitted) = match existing {
        Some(id) => {
            if !rules.allow_resubmission {
                return Err(HandlerError::conflict(
                    "already submitted and resubmission is not allowed",
                ));
            }
            ctx.conn.execute(
                "UPDATE assignment_submissions
                 SET content = ?, attachment_url = ?, status = ?, submitted_at = ?, plagiarism_score = ?,
                     grade = NULL, feedback = NULL, graded_at = NULL, graded_by = NULL, auto_grade = NULL
                 WHERE id = ?",
                rusqlite::params![content, attachment_url, status, submitted_at, plagiarism_score, id],
            )?;
            (id, true)
        }
        None => {
            let id = new_id();
            ctx.conn.execute(
                "INSERT INTO assignment_submissions(id, assignment_id, student_id, content, attachment_url, status, submitted_at, plagiarism_score)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    assignment_id,
                    student_id,
                    content,
                    attachment_url,
                    status,
                    submitted_at,
                    plagiarism_score
                ],
            )?;
            (id, false)
        }
    };
    Ok(json!({
        "submissionId": id,
        "status": status,
        "resubmitted": resubmitted,
        "submittedAt": submitted_at,
    }))
}

fn submissions_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let (filter, key) = if let Some(a) = optional_str(params, "assignmentId") {
        ("sub.assignment_id = ?", a)
    } else if let Some(s) = optional_str(params, "studentId") {
        ("sub.student_id = ?", s)
    } else {
        return Err(HandlerError::bad_params("assignmentId or studentId required"));
    };
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {SUBMISSION_COLUMNS}
         FROM assignment_submissions sub
         LEFT JOIN students st ON st.id = sub.student_id
         LEFT JOIN assignments a ON a.id = sub.assignment_id
         WHERE {filter}
         ORDER BY sub.submitted_at DESC"
    ))?;
    let submissions = stmt
        .query_map([&key], submission_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "submissions": submissions }))
}

fn submissions_grade(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let submission_id = required_str(params, "submissionId")?;
    let grade = required_f64(params, "grade")?;
    let feedback = optional_str(params, "feedback");
    let graded_by = required_str(params, "gradedBy")?;

    let row: Option<(String, String, f64, String)> = ctx
        .conn
        .query_row(
            "SELECT sub.student_id, sub.assignment_id, a.max_marks, a.title
             FROM assignment_submissions sub
             JOIN assignments a ON a.id = sub.assignment_id
             WHERE sub.id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((student_id, assignment_id, max_marks, title)) = row else {
        return Err(HandlerError::NotFound("submission"));
    };
    if !(0.0..=max_marks).contains(&grade) {
        return Err(HandlerError::bad_params(format!(
            "grade must be between 0 and {max_marks}"
        )));
    }

    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE assignment_submissions
         SET grade = ?, feedback = ?, graded_at = ?, graded_by = ?, status = 'graded'
         WHERE id = ?",
        (grade, &feedback, now_rfc3339(), &graded_by, &submission_id),
    )?;
    notify(
        &tx,
        &student_id,
        "feedback_available",
        &format!("Your submission for \"{title}\" was graded: {grade}/{max_marks}"),
        Some(&assignment_id),
    )?;
    tx.commit()?;
    Ok(json!({ "submissionId": submission_id, "grade": grade, "status": "graded" }))
}

fn assignments_auto_grade(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let assignment_id = required_str(params, "assignmentId")?;
    let stored_max: Option<f64> = ctx
        .conn
        .query_row(
            "SELECT max_marks FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(stored_max) = stored_max else {
        return Err(HandlerError::NotFound("assignment"));
    };
    let max_marks = optional_f64(params, "maxMarks")?.unwrap_or(stored_max);
    if max_marks <= 0.0 {
        return Err(HandlerError::bad_params("maxMarks must be greater than 0"));
    }

    let pending: Vec<(String, String, Option<String>, Option<f64>)> = {
        let mut stmt = ctx.conn.prepare(
            "SELECT id, student_id, content, plagiarism_score
             FROM assignment_submissions
             WHERE assignment_id = ? AND grade IS NULL
             ORDER BY submitted_at",
        )?;
        let rows = stmt
            .query_map([&assignment_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let tx = ctx.conn.unchecked_transaction()?;
    let now = now_rfc3339();
    let mut graded = Vec::with_capacity(pending.len());
    for (submission_id, student_id, content, plagiarism) in pending {
        let plagiarism = plagiarism.unwrap_or(0.0);
        let result = grading::auto_grade(content.as_deref().unwrap_or(""), plagiarism, max_marks);
        tx.execute(
            "UPDATE assignment_submissions
             SET grade = ?, auto_grade = ?, feedback = ?, graded_at = ?, graded_by = 'system', status = 'graded'
             WHERE id = ?",
            (result.grade, result.grade, result.feedback(), &now, &submission_id),
        )?;
        graded.push(json!({
            "submissionId": submission_id,
            "studentId": student_id,
            "grade": result.grade,
            "plagiarismScore": plagiarism,
            "notes": result.notes,
        }));
    }
    tx.commit()?;

    tracing::info!(assignment_id = %assignment_id, graded = graded.len(), "auto-grading finished");
    Ok(json!({ "gradedCount": graded.len(), "submissions": graded }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "assignments.create" => assignments_create,
        "assignments.list" => assignments_list,
        "assignments.get" => assignments_get,
        "assignments.close" => assignments_close,
        "assignments.autoGrade" => assignments_auto_grade,
        "submissions.submit" => submissions_submit,
        "submissions.list" => submissions_list,
        "submissions.grade" => submissions_grade,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_formats_keep_truthy_keys() {
        let params = json!({ "allowedFormats": { "PDF": true, "docx": false, "zip": true } });
        assert_eq!(allowed_file_types(&params).expect("formats"), vec!["pdf", "zip"]);

        let params = json!({ "allowedFileTypes": [".PDF", "txt"], "allowedFormats": { "zip": true } });
        assert_eq!(allowed_file_types(&params).expect("types"), vec!["pdf", "txt"]);
    }

    #[test]
    fn extension_ignores_query_strings() {
        assert_eq!(file_extension("storage/x/report.PDF?v=2").as_deref(), Some("pdf"));
        assert_eq!(file_extension("storage/x/README"), None);
    }
}
