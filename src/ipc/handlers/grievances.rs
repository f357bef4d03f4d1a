use rusqlite::{OptionalExtension, Row};
use serde_json::json;

use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, one_of, optional_bool, optional_str, public_ref, require_row,
    required_str, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const STATUSES: &[&str] = &["pending", "in_review", "resolved", "rejected"];
const COMMENTER_TYPES: &[&str] = &["student", "faculty", "admin"];
const GRIEVANCE_COLUMNS: &str = "g.id, g.grievance_id, g.student_id, s.name, g.title, g.description, g.category, g.against, g.status, g.is_anonymous, g.assigned_to, g.created_at, g.updated_at, g.resolved_at";

/// Anonymous grievances only reveal the submitter when `reveal` is set
/// (the submitter's own listing).
fn grievance_from_row(r: &Row<'_>, reveal: bool) -> rusqlite::Result<serde_json::Value> {
    let anonymous = r.get::<_, i64>(9)? != 0;
    let hide = anonymous && !reveal;
    let student_id: String = r.get(2)?;
    let student_name: Option<String> = r.get(3)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "grievanceId": r.get::<_, String>(1)?,
        "studentId": (!hide).then_some(student_id),
        "studentName": if hide { None } else { student_name },
        "title": r.get::<_, String>(4)?,
        "description": r.get::<_, String>(5)?,
        "category": r.get::<_, String>(6)?,
        "against": r.get::<_, Option<String>>(7)?,
        "status": r.get::<_, String>(8)?,
        "isAnonymous": anonymous,
        "assignedTo": r.get::<_, Option<String>>(10)?,
        "createdAt": r.get::<_, String>(11)?,
        "updatedAt": r.get::<_, String>(12)?,
        "resolvedAt": r.get::<_, Option<String>>(13)?,
    }))
}

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let title = required_str(params, "title")?;
    let description = required_str(params, "description")?;
    let category = required_str(params, "category")?;
    let against = optional_str(params, "against");
    let anonymous = optional_bool(params, "isAnonymous")?.unwrap_or(false);
    require_row(ctx.conn, "students", &student_id, "student")?;

    let id = new_id();
    let grievance_id = public_ref("GRV");
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO grievances(id, grievance_id, student_id, title, description, category, against, status, is_anonymous, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
        rusqlite::params![
            id,
            grievance_id,
            student_id,
            title,
            description,
            category,
            against,
            anonymous as i64,
            now,
            now
        ],
    )?;
    Ok(json!({ "id": id, "grievanceId": grievance_id, "status": "pending" }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = optional_str(params, "studentId");
    let reveal = student_id.is_some();
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {GRIEVANCE_COLUMNS}
         FROM grievances g
         LEFT JOIN students s ON s.id = g.student_id
         WHERE ?1 IS NULL OR g.student_id = ?1
         ORDER BY g.created_at DESC"
    ))?;
    let grievances = stmt
        .query_map([&student_id], |r| grievance_from_row(r, reveal))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "grievances": grievances }))
}

/// Accepts either the row id or the public `GRV-` reference.
fn resolve_id(ctx: &Ctx<'_>, id: &str) -> Result<String, HandlerError> {
    ctx.conn
        .query_row(
            "SELECT id FROM grievances WHERE id = ?1 OR grievance_id = ?1",
            [id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(HandlerError::NotFound("grievance"))
}

fn load(ctx: &Ctx<'_>, id: &str) -> Result<serde_json::Value, HandlerError> {
    ctx.conn
        .query_row(
            &format!(
                "SELECT {GRIEVANCE_COLUMNS}
                 FROM grievances g
                 LEFT JOIN students s ON s.id = g.student_id
                 WHERE g.id = ?"
            ),
            [resolve_id(ctx, id)?],
            |r| grievance_from_row(r, false),
        )
        .optional()?
        .ok_or(HandlerError::NotFound("grievance"))
}

fn get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    Ok(json!({ "grievance": load(ctx, &id)? }))
}

fn update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, STATUSES, "status")?;
    }
    let assigned_to = optional_str(params, "assignedTo");
    if let Some(f) = assigned_to.as_deref() {
        require_row(ctx.conn, "faculty", f, "faculty")?;
    }
    let category = optional_str(params, "category");
    let row_id = resolve_id(ctx, &id)?;
    let current = load(ctx, &row_id)?;

    let now = now_rfc3339();
    let resolved_at = (status.as_deref() == Some("resolved") && current["status"] != "resolved")
        .then(|| now.clone());
    ctx.conn.execute(
        "UPDATE grievances
         SET status = COALESCE(?, status),
             assigned_to = COALESCE(?, assigned_to),
             category = COALESCE(?, category),
             resolved_at = COALESCE(?, resolved_at),
             updated_at = ?
         WHERE id = ?",
        rusqlite::params![status, assigned_to, category, resolved_at, now, row_id],
    )?;
    Ok(json!({ "grievance": load(ctx, &row_id)? }))
}

fn comments_add(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let grievance_id = resolve_id(ctx, &required_str(params, "grievanceId")?)?;
    let user_id = required_str(params, "userId")?;
    let user_type = required_str(params, "userType")?;
    one_of(&user_type, COMMENTER_TYPES, "userType")?;
    let comment = required_str(params, "comment")?;
    let internal = optional_bool(params, "isInternal")?.unwrap_or(false);

    let id = new_id();
    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO grievance_comments(id, grievance_id, user_id, user_type, comment, is_internal, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, grievance_id, user_id, user_type, comment, internal as i64, now],
    )?;
    tx.execute(
        "UPDATE grievances SET updated_at = ? WHERE id = ?",
        (&now, &grievance_id),
    )?;
    tx.commit()?;
    Ok(json!({ "commentId": id }))
}

fn comments_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let grievance_id = resolve_id(ctx, &required_str(params, "grievanceId")?)?;
    let include_internal = optional_bool(params, "includeInternal")?.unwrap_or(false);
    let mut stmt = ctx.conn.prepare(
        "SELECT id, user_id, user_type, comment, is_internal, created_at
         FROM grievance_comments
         WHERE grievance_id = ? AND (? = 1 OR is_internal = 0)
         ORDER BY created_at, rowid",
    )?;
    let comments = stmt
        .query_map((&grievance_id, include_internal as i64), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "userType": r.get::<_, String>(2)?,
                "comment": r.get::<_, String>(3)?,
                "isInternal": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "comments": comments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "grievances.create" => create,
        "grievances.list" => list,
        "grievances.get" => get,
        "grievances.update" => update,
        "grievances.comments.add" => comments_add,
        "grievances.comments.list" => comments_list,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
