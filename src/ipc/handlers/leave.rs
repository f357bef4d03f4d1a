use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

use crate::identity::normalize_department;
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, epoch_millis, new_id, now_rfc3339, one_of, optional_bool, optional_str, public_ref,
    require_row, required_str, store_upload, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const LEAVE_TYPES: &[&str] = &["medical", "personal", "family", "academic", "other"];
const STATUSES: &[&str] = &["pending", "approved", "rejected", "cancelled"];
const COMMENTER_TYPES: &[&str] = &["student", "faculty", "admin"];
const LEAVE_COLUMNS: &str = "l.id, l.request_id, l.student_id, s.name, s.department, s.year, l.leave_type, l.start_date, l.end_date, l.reason, l.additional_info, l.status, l.faculty_id, l.created_at, l.updated_at";

fn leave_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "requestId": r.get::<_, String>(1)?,
        "studentId": r.get::<_, String>(2)?,
        "studentName": r.get::<_, Option<String>>(3)?,
        "department": r.get::<_, Option<String>>(4)?,
        "year": r.get::<_, Option<String>>(5)?,
        "leaveType": r.get::<_, String>(6)?,
        "startDate": r.get::<_, String>(7)?,
        "endDate": r.get::<_, String>(8)?,
        "reason": r.get::<_, String>(9)?,
        "additionalInfo": r.get::<_, Option<String>>(10)?,
        "status": r.get::<_, String>(11)?,
        "facultyId": r.get::<_, Option<String>>(12)?,
        "createdAt": r.get::<_, String>(13)?,
        "updatedAt": r.get::<_, String>(14)?,
    }))
}

fn parse_day(raw: &str, key: &str) -> Result<NaiveDate, HandlerError> {
    // Accept full timestamps too; only the calendar day matters.
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| HandlerError::bad_params(format!("{key} must be a YYYY-MM-DD date")))
}

fn date_param(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerError> {
    parse_day(&required_str(params, key)?, key)
}

fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerError> {
    optional_str(params, key)
        .map(|raw| parse_day(&raw, key).map(|d| d.to_string()))
        .transpose()
}

/// Adds `documentUrls` (upload order) to each request in place.
fn attach_documents(
    conn: &Connection,
    requests: &mut [serde_json::Value],
) -> Result<(), HandlerError> {
    let mut stmt = conn.prepare(
        "SELECT url FROM leave_documents WHERE request_id = ? ORDER BY uploaded_at, rowid",
    )?;
    for request in requests.iter_mut() {
        let id = request["id"].as_str().unwrap_or_default().to_string();
        let urls = stmt
            .query_map([&id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        request["documentUrls"] = json!(urls);
    }
    Ok(())
}

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let leave_type = required_str(params, "leaveType")?;
    one_of(&leave_type, LEAVE_TYPES, "leaveType")?;
    let start = date_param(params, "startDate")?;
    let end = date_param(params, "endDate")?;
    if end < start {
        return Err(HandlerError::bad_params("endDate must not be before startDate"));
    }
    let reason = required_str(params, "reason")?;
    let additional_info = optional_str(params, "additionalInfo");
    let faculty_id = optional_str(params, "facultyId");
    require_row(ctx.conn, "students", &student_id, "student")?;
    if let Some(f) = faculty_id.as_deref() {
        require_row(ctx.conn, "faculty", f, "faculty")?;
    }

    let id = new_id();
    let request_id = public_ref("LEAVE");
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO leave_requests(id, request_id, student_id, leave_type, start_date, end_date, reason, additional_info, status, faculty_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
        rusqlite::params![
            id,
            request_id,
            student_id,
            leave_type,
            start.to_string(),
            end.to_string(),
            reason,
            additional_info,
            faculty_id,
            now,
            now
        ],
    )?;
    Ok(json!({
        "id": id,
        "requestId": request_id,
        "status": "pending",
        "facultyId": faculty_id,
        "days": (end - start).num_days() + 1,
    }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = optional_str(params, "studentId");
    let faculty_id = optional_str(params, "facultyId");
    let department = optional_str(params, "department").map(|d| normalize_department(&d));
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, STATUSES, "status")?;
    }
    let leave_type = optional_str(params, "leaveType").map(|t| t.to_lowercase());
    if let Some(t) = leave_type.as_deref() {
        one_of(t, LEAVE_TYPES, "leaveType")?;
    }
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {LEAVE_COLUMNS}
         FROM leave_requests l
         LEFT JOIN students s ON s.id = l.student_id
         WHERE (?1 IS NULL OR l.student_id = ?1)
           AND (?2 IS NULL OR l.faculty_id = ?2)
           AND (?3 IS NULL OR s.department = ?3)
           AND (?4 IS NULL OR l.status = ?4)
           AND (?5 IS NULL OR l.leave_type = ?5)
           AND (?6 IS NULL OR l.start_date >= ?6)
           AND (?7 IS NULL OR l.end_date <= ?7)
         ORDER BY l.created_at DESC"
    ))?;
    let mut requests = stmt
        .query_map(
            rusqlite::params![student_id, faculty_id, department, status, leave_type, from, to],
            leave_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    attach_documents(ctx.conn, &mut requests)?;
    Ok(json!({ "requests": requests }))
}

fn documents_upload(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let request_id = required_str(params, "requestId")?;
    let file_name = required_str(params, "fileName")?;
    let data = required_str(params, "dataBase64")?;
    require_row(ctx.conn, "leave_requests", &request_id, "leave request")?;

    let key = format!("{request_id}/{}-{file_name}", epoch_millis());
    let stored = store_upload(ctx, "leave_requests", &key, &data)?;
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO leave_documents(id, request_id, file_name, url, uploaded_at)
         VALUES(?, ?, ?, ?, ?)",
        (new_id(), &request_id, &file_name, &stored.url, &now),
    )?;
    ctx.conn.execute(
        "UPDATE leave_requests SET updated_at = ? WHERE id = ?",
        (&now, &request_id),
    )?;
    Ok(json!({ "url": stored.url, "size": stored.size }))
}

/// Moves a pending request to `next`; anything else already left the queue.
fn transition(
    conn: &Connection,
    id: &str,
    next: &str,
    faculty_id: Option<&str>,
) -> Result<(), HandlerError> {
    let current: Option<String> = conn
        .query_row("SELECT status FROM leave_requests WHERE id = ?", [id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(current) = current else {
        return Err(HandlerError::NotFound("leave request"));
    };
    if current != "pending" {
        return Err(HandlerError::conflict(format!(
            "leave request is already {current}"
        )));
    }
    conn.execute(
        "UPDATE leave_requests
         SET status = ?, faculty_id = COALESCE(?, faculty_id), updated_at = ?
         WHERE id = ?",
        (next, faculty_id, now_rfc3339(), id),
    )?;
    Ok(())
}

fn approve(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    let faculty_id = required_str(params, "facultyId")?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    transition(ctx.conn, &id, "approved", Some(&faculty_id))?;
    Ok(json!({ "id": id, "status": "approved" }))
}

fn reject(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    let faculty_id = required_str(params, "facultyId")?;
    let reason = optional_str(params, "reason");
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;

    let tx = ctx.conn.unchecked_transaction()?;
    transition(&tx, &id, "rejected", Some(&faculty_id))?;
    if let Some(reason) = reason.as_deref() {
        tx.execute(
            "INSERT INTO leave_request_comments(id, request_id, user_id, user_type, comment, is_private, created_at)
             VALUES(?, ?, ?, 'faculty', ?, 0, ?)",
            (
                new_id(),
                &id,
                &faculty_id,
                format!("Rejection reason: {reason}"),
                now_rfc3339(),
            ),
        )?;
    }
    tx.commit()?;
    Ok(json!({ "id": id, "status": "rejected" }))
}

fn cancel(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    transition(ctx.conn, &id, "cancelled", None)?;
    Ok(json!({ "id": id, "status": "cancelled" }))
}

fn comments_add(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let request_id = required_str(params, "requestId")?;
    let user_id = required_str(params, "userId")?;
    let user_type = required_str(params, "userType")?;
    one_of(&user_type, COMMENTER_TYPES, "userType")?;
    let comment = required_str(params, "comment")?;
    let private = optional_bool(params, "isPrivate")?.unwrap_or(false);
    require_row(ctx.conn, "leave_requests", &request_id, "leave request")?;

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO leave_request_comments(id, request_id, user_id, user_type, comment, is_private, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, request_id, user_id, user_type, comment, private as i64, now_rfc3339()],
    )?;
    Ok(json!({ "commentId": id }))
}

fn comments_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let request_id = required_str(params, "requestId")?;
    let include_private = optional_bool(params, "includePrivate")?.unwrap_or(false);
    require_row(ctx.conn, "leave_requests", &request_id, "leave request")?;
    let mut stmt = ctx.conn.prepare(
        "SELECT id, user_id, user_type, comment, is_private, created_at
         FROM leave_request_comments
         WHERE request_id = ? AND (? = 1 OR is_private = 0)
         ORDER BY created_at, rowid",
    )?;
    let comments = stmt
        .query_map((&request_id, include_private as i64), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "userType": r.get::<_, String>(2)?,
                "comment": r.get::<_, String>(3)?,
                "isPrivate": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "comments": comments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "leave.create" => create,
        "leave.list" => list,
        "leave.approve" => approve,
        "leave.reject" => reject,
        "leave.cancel" => cancel,
        "leave.documents.upload" => documents_upload,
        "leave.comments.add" => comments_add,
        "leave.comments.list" => comments_list,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
