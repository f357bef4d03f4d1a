use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, one_of, optional_bool, optional_str, required_str,
    HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const KINDS: &[&str] = &[
    "deadline_reminder",
    "missing_submission",
    "feedback_available",
    "resubmission_request",
    "general",
];
const OUTBOX_STATUSES: &[&str] = &["queued", "sent", "failed"];

pub(super) fn notify(
    conn: &Connection,
    recipient_id: &str,
    kind: &str,
    content: &str,
    assignment_id: Option<&str>,
) -> Result<String, HandlerError> {
    let id = new_id();
    conn.execute(
        "INSERT INTO notifications(id, recipient_id, kind, content, assignment_id, is_read, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (&id, recipient_id, kind, content, assignment_id, now_rfc3339()),
    )?;
    Ok(id)
}

/// Mail is never sent from here; the host drains `email_outbox`.
pub(super) fn queue_email(
    conn: &Connection,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<String, HandlerError> {
    let id = new_id();
    conn.execute(
        "INSERT INTO email_outbox(id, to_address, subject, body, status, created_at)
         VALUES(?, ?, ?, ?, 'queued', ?)",
        (&id, to, subject, body, now_rfc3339()),
    )?;
    tracing::debug!(subject, "email queued");
    Ok(id)
}

fn notifications_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let recipient_id = required_str(params, "recipientId")?;
    let kind = optional_str(params, "kind").unwrap_or_else(|| "general".to_string());
    one_of(&kind, KINDS, "kind")?;
    let content = required_str(params, "content")?;
    let assignment_id = optional_str(params, "assignmentId");

    let id = notify(
        ctx.conn,
        &recipient_id,
        &kind,
        &content,
        assignment_id.as_deref(),
    )?;
    Ok(json!({ "notificationId": id }))
}

fn notifications_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let recipient_id = required_str(params, "recipientId")?;
    let unread_only = optional_bool(params, "unreadOnly")?.unwrap_or(false);

    let mut stmt = ctx.conn.prepare(
        "SELECT id, kind, content, assignment_id, is_read, created_at
         FROM notifications
         WHERE recipient_id = ? AND (? = 0 OR is_read = 0)
         ORDER BY created_at DESC",
    )?;
    let notifications = stmt
        .query_map((&recipient_id, unread_only as i64), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "kind": r.get::<_, String>(1)?,
                "content": r.get::<_, String>(2)?,
                "assignmentId": r.get::<_, Option<String>>(3)?,
                "isRead": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let unread = notifications
        .iter()
        .filter(|n| n["isRead"] == json!(false))
        .count();
    Ok(json!({ "notifications": notifications, "unreadCount": unread }))
}

fn notifications_mark_read(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    let changed = ctx
        .conn
        .execute("UPDATE notifications SET is_read = 1 WHERE id = ?", [&id])?;
    if changed == 0 {
        return Err(HandlerError::NotFound("notification"));
    }
    Ok(json!({ "ok": true }))
}

fn outbox_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, OUTBOX_STATUSES, "status")?;
    }
    let mut stmt = ctx.conn.prepare(
        "SELECT id, to_address, subject, body, status, error, created_at, sent_at
         FROM email_outbox
         WHERE ? IS NULL OR status = ?
         ORDER BY created_at",
    )?;
    let emails = stmt
        .query_map((&status, &status), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "to": r.get::<_, String>(1)?,
                "subject": r.get::<_, String>(2)?,
                "body": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "error": r.get::<_, Option<String>>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "sentAt": r.get::<_, Option<String>>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "emails": emails }))
}

fn outbox_mark_sent(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    let error = optional_str(params, "error");

    let current: Option<String> = ctx
        .conn
        .query_row("SELECT status FROM email_outbox WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(current) = current else {
        return Err(HandlerError::NotFound("email"));
    };
    if current == "sent" {
        return Err(HandlerError::conflict("email already sent"));
    }

    let status = if error.is_some() { "failed" } else { "sent" };
    let sent_at = error.is_none().then(now_rfc3339);
    ctx.conn.execute(
        "UPDATE email_outbox SET status = ?, error = ?, sent_at = ? WHERE id = ?",
        (status, &error, &sent_at, &id),
    )?;
    if let Some(e) = error.as_deref() {
        tracing::warn!(email_id = %id, "email delivery failed: {e}");
    }
    Ok(json!({ "id": id, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "notifications.create" => notifications_create,
        "notifications.list" => notifications_list,
        "notifications.markRead" => notifications_mark_read,
        "email.outbox.list" => outbox_list,
        "email.outbox.markSent" => outbox_mark_sent,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
