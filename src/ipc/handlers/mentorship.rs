use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, one_of, optional_bool, optional_i64, optional_str,
    optional_str_list, require_row, required_str, required_timestamp, rfc3339, HandlerFn,
    HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const MEETING_TYPES: &[&str] = &["individual", "group"];
const HELP_STATUSES: &[&str] = &["pending", "in_progress", "resolved"];

fn student_ids(params: &serde_json::Value) -> Result<Vec<String>, HandlerError> {
    let mut ids = optional_str_list(params, "studentIds")?
        .ok_or_else(|| HandlerError::bad_params("missing studentIds"))?;
    ids.retain(|id| !id.is_empty());
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Err(HandlerError::bad_params("studentIds must not be empty"));
    }
    Ok(ids)
}

fn require_students(conn: &Connection, ids: &[String]) -> Result<(), HandlerError> {
    for id in ids {
        require_row(conn, "students", id, "student")?;
    }
    Ok(())
}

fn attendees(conn: &Connection, meeting_id: &str) -> Result<Vec<serde_json::Value>, HandlerError> {
    let mut stmt = conn.prepare(
        "SELECT a.student_id, s.name, a.attended, a.feedback
         FROM mentorship_meeting_attendees a
         LEFT JOIN students s ON s.id = a.student_id
         WHERE a.meeting_id = ?
         ORDER BY s.name, a.student_id",
    )?;
    let rows = stmt
        .query_map([meeting_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": r.get::<_, Option<String>>(1)?,
                "attended": r.get::<_, Option<i64>>(2)?.map(|a| a != 0),
                "feedback": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn assign(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let ids = student_ids(params)?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    require_students(ctx.conn, &ids)?;

    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    for student_id in &ids {
        tx.execute(
            "INSERT INTO mentorships(id, faculty_id, student_id, status, created_at)
             VALUES(?, ?, ?, 'active', ?)
             ON CONFLICT(faculty_id, student_id) DO UPDATE SET status = 'active'",
            (new_id(), &faculty_id, student_id, &now),
        )?;
    }
    tx.commit()?;
    tracing::info!(faculty_id = %faculty_id, count = ids.len(), "mentees assigned");
    Ok(json!({ "facultyId": faculty_id, "assigned": ids.len() }))
}

fn mentees(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    let mut stmt = ctx.conn.prepare(
        "SELECT s.id, s.name, s.email, s.department, s.year, m.created_at
         FROM mentorships m
         JOIN students s ON s.id = m.student_id
         WHERE m.faculty_id = ? AND m.status = 'active'
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([&faculty_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "department": r.get::<_, Option<String>>(3)?,
                "year": r.get::<_, Option<String>>(4)?,
                "since": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "mentees": rows }))
}

fn meetings_schedule(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let title = required_str(params, "title")?;
    let meeting_type = required_str(params, "meetingType")?;
    one_of(&meeting_type, MEETING_TYPES, "meetingType")?;
    let meeting_date = required_timestamp(params, "meetingDate")?;
    let duration = optional_i64(params, "durationMinutes")?
        .ok_or_else(|| HandlerError::bad_params("missing durationMinutes"))?;
    if duration <= 0 {
        return Err(HandlerError::bad_params("durationMinutes must be positive"));
    }
    let ids = student_ids(params)?;
    if meeting_type == "individual" && ids.len() > 1 {
        return Err(HandlerError::bad_params(
            "individual meetings take exactly one student",
        ));
    }
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    require_students(ctx.conn, &ids)?;

    let id = new_id();
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO mentorship_meetings(id, faculty_id, title, description, meeting_type, meeting_date,
                                         duration_minutes, location, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            faculty_id,
            title,
            optional_str(params, "description"),
            meeting_type,
            rfc3339(meeting_date),
            duration,
            optional_str(params, "location"),
            now_rfc3339()
        ],
    )?;
    for student_id in &ids {
        tx.execute(
            "INSERT INTO mentorship_meeting_attendees(id, meeting_id, student_id) VALUES(?, ?, ?)",
            (new_id(), &id, student_id),
        )?;
    }
    tx.commit()?;
    Ok(json!({ "meetingId": id, "attendees": ids.len() }))
}

fn meetings_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let when = optional_str(params, "when").unwrap_or_else(|| "upcoming".to_string());
    one_of(&when, &["upcoming", "past"], "when")?;
    let sql = if when == "upcoming" {
        "SELECT id, title, description, meeting_type, meeting_date, duration_minutes, location
         FROM mentorship_meetings WHERE faculty_id = ? AND meeting_date >= ?
         ORDER BY meeting_date ASC"
    } else {
        "SELECT id, title, description, meeting_type, meeting_date, duration_minutes, location
         FROM mentorship_meetings WHERE faculty_id = ? AND meeting_date < ?
         ORDER BY meeting_date DESC"
    };
    let mut stmt = ctx.conn.prepare(sql)?;
    let mut meetings = stmt
        .query_map((&faculty_id, now_rfc3339()), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "meetingType": r.get::<_, String>(3)?,
                "meetingDate": r.get::<_, String>(4)?,
                "durationMinutes": r.get::<_, i64>(5)?,
                "location": r.get::<_, Option<String>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for meeting in meetings.iter_mut() {
        let id = meeting["id"].as_str().unwrap_or_default().to_string();
        meeting["attendees"] = json!(attendees(ctx.conn, &id)?);
    }
    Ok(json!({ "meetings": meetings }))
}

fn meetings_update_attendance(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let meeting_id = required_str(params, "meetingId")?;
    let entries = params
        .get("attendees")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerError::bad_params("attendees must be an array"))?;
    require_row(ctx.conn, "mentorship_meetings", &meeting_id, "meeting")?;

    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    for entry in entries {
        let student_id = required_str(entry, "studentId")?;
        let attended = optional_bool(entry, "attended")?
            .ok_or_else(|| HandlerError::bad_params("missing attended"))?;
        let changed = tx.execute(
            "UPDATE mentorship_meeting_attendees
             SET attended = ?, feedback = COALESCE(?, feedback), updated_at = ?
             WHERE meeting_id = ? AND student_id = ?",
            rusqlite::params![
                attended,
                optional_str(entry, "feedback"),
                now,
                meeting_id,
                student_id
            ],
        )?;
        if changed == 0 {
            return Err(HandlerError::NotFound("meeting attendee"));
        }
    }
    tx.commit()?;
    Ok(json!({ "meetingId": meeting_id, "attendees": attendees(ctx.conn, &meeting_id)? }))
}

fn notes_add(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let student_id = required_str(params, "studentId")?;
    let note = required_str(params, "note")?;
    let confidential = optional_bool(params, "isConfidential")?.unwrap_or(true);
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    require_row(ctx.conn, "students", &student_id, "student")?;

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO mentorship_notes(id, faculty_id, student_id, note, is_confidential, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &faculty_id, &student_id, &note, confidential, now_rfc3339()),
    )?;
    Ok(json!({ "noteId": id }))
}

fn notes_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let student_id = optional_str(params, "studentId");
    let mut stmt = ctx.conn.prepare(
        "SELECT n.id, n.student_id, s.name, n.note, n.is_confidential, n.created_at
         FROM mentorship_notes n
         LEFT JOIN students s ON s.id = n.student_id
         WHERE n.faculty_id = ?1 AND (?2 IS NULL OR n.student_id = ?2)
         ORDER BY n.created_at DESC, n.rowid DESC",
    )?;
    let notes = stmt
        .query_map((&faculty_id, &student_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, Option<String>>(2)?,
                "note": r.get::<_, String>(3)?,
                "isConfidential": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "notes": notes }))
}

fn help_requests_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let faculty_id = required_str(params, "facultyId")?;
    let subject = required_str(params, "subject")?;
    let description = required_str(params, "description")?;
    require_row(ctx.conn, "students", &student_id, "student")?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;

    let id = new_id();
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO mentorship_help_requests(id, student_id, faculty_id, subject, description, status,
                                              created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 'pending', ?, ?)",
        (&id, &student_id, &faculty_id, &subject, &description, &now, &now),
    )?;
    Ok(json!({ "requestId": id, "status": "pending" }))
}

fn help_requests_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = optional_str(params, "facultyId");
    let student_id = optional_str(params, "studentId");
    if faculty_id.is_none() && student_id.is_none() {
        return Err(HandlerError::bad_params("facultyId or studentId is required"));
    }
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, HELP_STATUSES, "status")?;
    }
    let mut stmt = ctx.conn.prepare(
        "SELECT h.id, h.student_id, s.name, h.faculty_id, h.subject, h.description, h.status, h.created_at, h.updated_at
         FROM mentorship_help_requests h
         LEFT JOIN students s ON s.id = h.student_id
         WHERE (?1 IS NULL OR h.faculty_id = ?1)
           AND (?2 IS NULL OR h.student_id = ?2)
           AND (?3 IS NULL OR h.status = ?3)
         ORDER BY h.created_at DESC, h.rowid DESC",
    )?;
    let requests = stmt
        .query_map((&faculty_id, &student_id, &status), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, Option<String>>(2)?,
                "facultyId": r.get::<_, String>(3)?,
                "subject": r.get::<_, String>(4)?,
                "description": r.get::<_, String>(5)?,
                "status": r.get::<_, String>(6)?,
                "createdAt": r.get::<_, String>(7)?,
                "updatedAt": r.get::<_, String>(8)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "requests": requests }))
}

fn help_requests_update_status(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let request_id = required_str(params, "requestId")?;
    let status = required_str(params, "status")?;
    one_of(&status, HELP_STATUSES, "status")?;
    let changed = ctx.conn.execute(
        "UPDATE mentorship_help_requests SET status = ?, updated_at = ? WHERE id = ?",
        (&status, now_rfc3339(), &request_id),
    )?;
    if changed == 0 {
        return Err(HandlerError::NotFound("help request"));
    }
    Ok(json!({ "requestId": request_id, "status": status }))
}

fn statistics(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    let now = now_rfc3339();

    let total_mentees: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM mentorships WHERE faculty_id = ? AND status = 'active'",
        [&faculty_id],
        |r| r.get(0),
    )?;
    let total_meetings: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM mentorship_meetings WHERE faculty_id = ?",
        [&faculty_id],
        |r| r.get(0),
    )?;
    let (attended, missed): (i64, i64) = ctx.conn.query_row(
        "SELECT COALESCE(SUM(CASE WHEN a.attended = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN COALESCE(a.attended, 0) = 0 THEN 1 ELSE 0 END), 0)
         FROM mentorship_meeting_attendees a
         JOIN mentorship_meetings m ON m.id = a.meeting_id
         WHERE m.faculty_id = ? AND m.meeting_date < ?",
        (&faculty_id, &now),
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let next_meeting = ctx
        .conn
        .query_row(
            "SELECT id, title, meeting_date FROM mentorship_meetings
             WHERE faculty_id = ? AND meeting_date >= ?
             ORDER BY meeting_date ASC LIMIT 1",
            (&faculty_id, &now),
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "meetingDate": r.get::<_, String>(2)?,
                }))
            },
        )
        .optional()?;

    Ok(json!({
        "totalMentees": total_mentees,
        "totalMeetings": total_meetings,
        "attendedMeetings": attended,
        "missedMeetings": missed,
        "nextMeeting": next_meeting,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "mentorship.assign" => assign,
        "mentorship.mentees" => mentees,
        "mentorship.meetings.schedule" => meetings_schedule,
        "mentorship.meetings.list" => meetings_list,
        "mentorship.meetings.updateAttendance" => meetings_update_attendance,
        "mentorship.notes.add" => notes_add,
        "mentorship.notes.list" => notes_list,
        "mentorship.helpRequests.create" => help_requests_create,
        "mentorship.helpRequests.list" => help_requests_list,
        "mentorship.helpRequests.updateStatus" => help_requests_update_status,
        "mentorship.statistics" => statistics,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
