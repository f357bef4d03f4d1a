use std::collections::HashMap;

use serde_json::json;

use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, one_of, optional_str, require_row, required_str, HandlerFn,
    HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const SERVICE_TYPES: &[&str] = &[
    "grievance",
    "maintenance",
    "lost_found",
    "document_request",
    "health",
    "counseling",
    "housing",
    "library",
    "leave",
    "certificate",
    "background_verification",
    "career",
    "event_desk",
    "suggestion",
    "recommendation",
];
const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];
const STATUSES: &[&str] = &["pending", "in_progress", "completed", "rejected"];
const RESPONDER_ROLES: &[&str] = &["university_admin", "faculty"];

fn submit(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let service_type = required_str(params, "serviceType")?;
    one_of(&service_type, SERVICE_TYPES, "serviceType")?;
    let subject = required_str(params, "subject")?;
    let description = required_str(params, "description")?;
    let priority = optional_str(params, "priority").unwrap_or_else(|| "medium".to_string());
    one_of(&priority, PRIORITIES, "priority")?;
    require_row(ctx.conn, "students", &student_id, "student")?;

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO service_requests(id, student_id, service_type, subject, description, status, priority, created_at)
         VALUES(?, ?, ?, ?, ?, 'pending', ?, ?)",
        rusqlite::params![id, student_id, service_type, subject, description, priority, now_rfc3339()],
    )?;
    tracing::info!(request_id = %id, service_type = %service_type, "service request submitted");
    Ok(json!({ "requestId": id, "status": "pending" }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = optional_str(params, "studentId");
    let service_type = optional_str(params, "serviceType");
    if let Some(t) = service_type.as_deref() {
        one_of(t, SERVICE_TYPES, "serviceType")?;
    }

    let mut responses: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    {
        let mut stmt = ctx.conn.prepare(
            "SELECT r.request_id, r.id, r.responder_id, r.responder_name, r.responder_role, r.message, r.created_at
             FROM service_responses r
             JOIN service_requests q ON q.id = r.request_id
             WHERE (?1 IS NULL OR q.student_id = ?1) AND (?2 IS NULL OR q.service_type = ?2)
             ORDER BY r.created_at, r.rowid",
        )?;
        let rows = stmt.query_map((&student_id, &service_type), |r| {
            Ok((
                r.get::<_, String>(0)?,
                json!({
                    "id": r.get::<_, String>(1)?,
                    "responderId": r.get::<_, String>(2)?,
                    "responderName": r.get::<_, String>(3)?,
                    "responderRole": r.get::<_, String>(4)?,
                    "message": r.get::<_, String>(5)?,
                    "createdAt": r.get::<_, String>(6)?,
                }),
            ))
        })?;
        for row in rows {
            let (request_id, response) = row?;
            responses.entry(request_id).or_default().push(response);
        }
    }

    let mut stmt = ctx.conn.prepare(
        "SELECT q.id, q.student_id, s.name, s.prn, q.service_type, q.subject, q.description,
                q.status, q.priority, q.created_at, q.updated_at
         FROM service_requests q
         LEFT JOIN students s ON s.id = q.student_id
         WHERE (?1 IS NULL OR q.student_id = ?1) AND (?2 IS NULL OR q.service_type = ?2)
         ORDER BY q.created_at DESC",
    )?;
    let requests = stmt
        .query_map((&student_id, &service_type), |r| {
            let id: String = r.get(0)?;
            let thread = responses.remove(&id).unwrap_or_default();
            Ok(json!({
                "id": id,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, Option<String>>(2)?,
                "studentPrn": r.get::<_, Option<String>>(3)?,
                "serviceType": r.get::<_, String>(4)?,
                "subject": r.get::<_, String>(5)?,
                "description": r.get::<_, String>(6)?,
                "status": r.get::<_, String>(7)?,
                "priority": r.get::<_, String>(8)?,
                "createdAt": r.get::<_, String>(9)?,
                "updatedAt": r.get::<_, Option<String>>(10)?,
                "responses": thread,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "requests": requests }))
}

fn respond(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let request_id = required_str(params, "requestId")?;
    let responder_id = required_str(params, "responderId")?;
    let responder_name = required_str(params, "responderName")?;
    let responder_role = required_str(params, "responderRole")?;
    one_of(&responder_role, RESPONDER_ROLES, "responderRole")?;
    let message = required_str(params, "message")?;
    require_row(ctx.conn, "service_requests", &request_id, "service request")?;

    let id = new_id();
    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO service_responses(id, request_id, responder_id, responder_name, responder_role, message, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, request_id, responder_id, responder_name, responder_role, message, now],
    )?;
    tx.execute(
        "UPDATE service_requests SET updated_at = ? WHERE id = ?",
        (&now, &request_id),
    )?;
    tx.commit()?;
    Ok(json!({ "responseId": id }))
}

fn update_status(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let request_id = required_str(params, "requestId")?;
    let status = required_str(params, "status")?;
    one_of(&status, STATUSES, "status")?;
    let changed = ctx.conn.execute(
        "UPDATE service_requests SET status = ?, updated_at = ? WHERE id = ?",
        (&status, now_rfc3339(), &request_id),
    )?;
    if changed == 0 {
        return Err(HandlerError::NotFound("service request"));
    }
    Ok(json!({ "requestId": request_id, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "serviceRequests.submit" => submit,
        "serviceRequests.list" => list,
        "serviceRequests.respond" => respond,
        "serviceRequests.updateStatus" => update_status,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
