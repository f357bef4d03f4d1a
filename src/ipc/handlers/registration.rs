use rusqlite::{OptionalExtension, Row};
use serde_json::json;

use super::directory::{
    checked_email, checked_password, email_in_use, employee_id_in_use, fallback_prn, hash,
    next_employee_id, prn_in_use,
};
use super::notifications::queue_email;
use crate::auth;
use crate::identity::{self, normalize_department, normalize_year};
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    current_year, dispatch, epoch_millis, new_id, now_rfc3339, one_of, optional_i64,
    optional_str, required_str, store_upload, str_alias, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const STATUSES: &[&str] = &["pending_approval", "approved", "rejected"];
const REGISTRATION_COLUMNS: &str = "id, email, name, user_type, field, course, department, year, phone, face_url, status, rejection_reason, submitted_at, reviewed_at, reviewed_by, approved_user_id";

fn registration_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "email": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "userType": r.get::<_, String>(3)?,
        "field": r.get::<_, String>(4)?,
        "course": r.get::<_, String>(5)?,
        "department": r.get::<_, String>(6)?,
        "year": r.get::<_, Option<String>>(7)?,
        "phone": r.get::<_, Option<String>>(8)?,
        "faceUrl": r.get::<_, Option<String>>(9)?,
        "status": r.get::<_, String>(10)?,
        "rejectionReason": r.get::<_, Option<String>>(11)?,
        "submittedAt": r.get::<_, String>(12)?,
        "reviewedAt": r.get::<_, Option<String>>(13)?,
        "reviewedBy": r.get::<_, Option<String>>(14)?,
        "approvedUserId": r.get::<_, Option<String>>(15)?,
    }))
}

fn face_key(email: &str) -> String {
    let local = email.split('@').next().unwrap_or("user");
    format!("registration_{local}_{}.jpg", epoch_millis())
}

fn inspect_email(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let email = required_str(params, "email")?;
    let domain = ctx.config.registration.email_domain();
    let kind = identity::email_kind(&email, domain);
    let student_info = match kind {
        identity::EmailKind::Student => identity::extract_student_info(&email, current_year()),
        _ => None,
    };
    Ok(json!({ "kind": kind, "studentInfo": student_info }))
}

fn submit(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let email = checked_email(ctx, &required_str(params, "email")?)?;
    let name = required_str(params, "name")?;
    let field = required_str(params, "field")?;
    let course = required_str(params, "course")?;
    let department = normalize_department(&required_str(params, "department")?);
    let user_type = str_alias(params, &["userType", "user_type"])
        .ok_or_else(|| HandlerError::bad_params("missing userType"))?
        .to_ascii_lowercase();
    one_of(&user_type, &["student", "faculty"], "userType")?;
    let year = optional_str(params, "year").map(|y| normalize_year(&y));
    if user_type == "student" && year.is_none() {
        return Err(HandlerError::bad_params("year is required for students"));
    }
    let phone = str_alias(params, &["mobile", "phone"]);
    let photo = optional_str(params, "photoBase64");

    if email_in_use(ctx.conn, &email)? {
        return Err(HandlerError::conflict(
            "An account with this email already exists",
        ));
    }

    let existing: Option<(String, String)> = ctx
        .conn
        .query_row(
            "SELECT id, status FROM pending_registrations WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match existing.as_ref().map(|(id, status)| (id.as_str(), status.as_str())) {
        Some((id, "pending_approval")) => {
            return Ok(json!({
                "alreadySubmitted": true,
                "requiresApproval": true,
                "pendingRegistrationId": id,
            }));
        }
        Some((id, "approved")) => {
            return Ok(json!({ "alreadyApproved": true, "pendingRegistrationId": id }));
        }
        _ => {}
    }

    let face_url = match photo {
        Some(data) => Some(store_upload(ctx, "faces", &face_key(&email), &data)?.url),
        None => None,
    };
    let now = now_rfc3339();

    let id = match existing {
        // Rejected before: the same row goes back into the queue.
        Some((id, _)) => {
            ctx.conn.execute(
                "UPDATE pending_registrations
                 SET name = ?, user_type = ?, field = ?, course = ?, department = ?, year = ?,
                     phone = ?, face_url = COALESCE(?, face_url), status = 'pending_approval',
                     rejection_reason = NULL, submitted_at = ?, reviewed_at = NULL, reviewed_by = NULL
                 WHERE id = ?",
                rusqlite::params![
                    name, user_type, field, course, department, year, phone, face_url, now, id
                ],
            )?;
            id
        }
        None => {
            let id = new_id();
            ctx.conn.execute(
                "INSERT INTO pending_registrations(id, email, name, user_type, field, course, department, year, phone, face_url, status, submitted_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending_approval', ?)",
                rusqlite::params![
                    id, email, name, user_type, field, course, department, year, phone, face_url,
                    now
                ],
            )?;
            id
        }
    };
    tracing::info!(registration_id = %id, user_type = %user_type, "registration submitted");
    Ok(json!({
        "pendingRegistrationId": id,
        "requiresApproval": true,
        "faceUrl": face_url,
    }))
}

fn update_face(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let email = required_str(params, "email")?.to_ascii_lowercase();
    let photo = required_str(params, "photoBase64")?;
    let id: Option<String> = ctx
        .conn
        .query_row(
            "SELECT id FROM pending_registrations WHERE email = ?",
            [&email],
            |r| r.get(0),
        )
        .optional()?;
    let Some(id) = id else {
        return Err(HandlerError::NotFound("registration"));
    };
    let stored = store_upload(ctx, "faces", &face_key(&email), &photo)?;
    ctx.conn.execute(
        "UPDATE pending_registrations SET face_url = ? WHERE id = ?",
        (&stored.url, &id),
    )?;
    Ok(json!({ "pendingRegistrationId": id, "faceUrl": stored.url }))
}

fn status(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let email = required_str(params, "email")?.to_ascii_lowercase();
    let registration = ctx
        .conn
        .query_row(
            &format!("SELECT {REGISTRATION_COLUMNS} FROM pending_registrations WHERE email = ?"),
            [&email],
            registration_from_row,
        )
        .optional()?;
    Ok(json!({ "registration": registration }))
}

fn admin_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, STATUSES, "status")?;
    }
    let limit = optional_i64(params, "limit")?.unwrap_or(100);
    if limit <= 0 {
        return Err(HandlerError::bad_params("limit must be positive"));
    }
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {REGISTRATION_COLUMNS}
         FROM pending_registrations
         WHERE ?1 IS NULL OR status = ?1
         ORDER BY submitted_at DESC
         LIMIT ?2"
    ))?;
    let registrations = stmt
        .query_map((&status, limit), registration_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "registrations": registrations }))
}

struct PendingRegistration {
    id: String,
    email: String,
    name: String,
    user_type: String,
    field: String,
    course: String,
    department: String,
    year: Option<String>,
    phone: Option<String>,
    face_url: Option<String>,
    status: String,
}

fn load_pending(ctx: &Ctx<'_>, id: &str) -> Result<PendingRegistration, HandlerError> {
    ctx.conn
        .query_row(
            "SELECT id, email, name, user_type, field, course, department, year, phone, face_url, status
             FROM pending_registrations WHERE id = ?",
            [id],
            |r| {
                Ok(PendingRegistration {
                    id: r.get(0)?,
                    email: r.get(1)?,
                    name: r.get(2)?,
                    user_type: r.get(3)?,
                    field: r.get(4)?,
                    course: r.get(5)?,
                    department: r.get(6)?,
                    year: r.get(7)?,
                    phone: r.get(8)?,
                    face_url: r.get(9)?,
                    status: r.get(10)?,
                })
            },
        )
        .optional()?
        .ok_or(HandlerError::NotFound("registration"))
}

fn review(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "id")?;
    let action = required_str(params, "action")?;
    one_of(&action, &["approve", "reject"], "action")?;
    let reviewed_by = optional_str(params, "reviewedBy")
        .unwrap_or_else(|| ctx.config.registration.reviewer_email.clone());

    let reg = load_pending(ctx, &id)?;
    if reg.status != "pending_approval" {
        return Err(HandlerError::conflict(format!(
            "registration is already {}",
            reg.status
        )));
    }

    if action == "reject" {
        reject(ctx, &reg, params, &reviewed_by)
    } else {
        approve(ctx, &reg, params, &reviewed_by)
    }
}

fn reject(
    ctx: &Ctx<'_>,
    reg: &PendingRegistration,
    params: &serde_json::Value,
    reviewed_by: &str,
) -> HandlerResult {
    let reason = optional_str(params, "rejectionReason");
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE pending_registrations
         SET status = 'rejected', rejection_reason = ?, reviewed_at = ?, reviewed_by = ?
         WHERE id = ?",
        (&reason, now_rfc3339(), reviewed_by, &reg.id),
    )?;
    let body = format!(
        "Dear {},\n\nYour EduVision registration was not approved.\nReason: {}\n\nYou may correct your details and register again.",
        reg.name,
        reason.as_deref().unwrap_or("not specified"),
    );
    queue_email(&tx, &reg.email, "EduVision registration update", &body)?;
    tx.commit()?;
    tracing::info!(registration_id = %reg.id, "registration rejected");
    Ok(json!({ "id": reg.id, "status": "rejected" }))
}

fn approve(
    ctx: &Ctx<'_>,
    reg: &PendingRegistration,
    params: &serde_json::Value,
    reviewed_by: &str,
) -> HandlerResult {
    if email_in_use(ctx.conn, &reg.email)? {
        return Err(HandlerError::conflict(
            "An account with this email already exists",
        ));
    }
    let (password, generated) = match params.get("password") {
        Some(v) if !v.is_null() => (checked_password(params, "password")?, false),
        _ => (
            auth::temporary_password(ctx.config.auth.temporary_password_len),
            true,
        ),
    };
    let password_hash = hash(&password)?;
    let user_id = new_id();
    let now = now_rfc3339();

    let tx = ctx.conn.unchecked_transaction()?;
    let (login_key, login_id) = if reg.user_type == "student" {
        let info = identity::extract_student_info(&reg.email, current_year());
        let prn = match optional_str(params, "prn") {
            Some(p) => p.to_ascii_uppercase(),
            None => match info.as_ref() {
                Some(i) => i.prn.clone(),
                None => fallback_prn(&tx)?,
            },
        };
        if prn_in_use(&tx, &prn)? {
            return Err(HandlerError::conflict(format!("PRN {prn} is already in use")));
        }
        let year = reg
            .year
            .clone()
            .or_else(|| info.map(|i| i.year))
            .unwrap_or_else(|| identity::year_label(1));
        tx.execute(
            "INSERT INTO students(id, prn, email, name, department, year, mobile, password_hash, face_url, face_registered, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                user_id,
                prn,
                reg.email,
                reg.name,
                reg.department,
                year,
                reg.phone,
                password_hash,
                reg.face_url,
                reg.face_url.is_some() as i64,
                now
            ],
        )?;
        ("prn", prn)
    } else {
        let employee_id = match optional_str(params, "employeeId") {
            Some(e) => {
                let e = e.to_ascii_uppercase();
                if employee_id_in_use(&tx, &e)? {
                    return Err(HandlerError::conflict(format!(
                        "employee id {e} is already in use"
                    )));
                }
                e
            }
            None => next_employee_id(&tx)?,
        };
        tx.execute(
            "INSERT INTO faculty(id, employee_id, email, name, department, field, course, mobile, password_hash, face_url, face_registered, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                user_id,
                employee_id,
                reg.email,
                reg.name,
                reg.department,
                reg.field,
                reg.course,
                reg.phone,
                password_hash,
                reg.face_url,
                reg.face_url.is_some() as i64,
                now
            ],
        )?;
        ("employeeId", employee_id)
    };

    tx.execute(
        "UPDATE pending_registrations
         SET status = 'approved', reviewed_at = ?, reviewed_by = ?, approved_user_id = ?
         WHERE id = ?",
        (&now, reviewed_by, &user_id, &reg.id),
    )?;
    let body = format!(
        "Dear {},\n\nYour EduVision registration has been approved.\n\nLogin ID: {}\nPassword: {}\n\nPlease change your password after your first login.",
        reg.name, login_id, password,
    );
    queue_email(&tx, &reg.email, "Welcome to EduVision", &body)?;
    tx.commit()?;
    tracing::info!(registration_id = %reg.id, user_id = %user_id, "registration approved");

    let mut result = json!({
        "userId": user_id,
        "role": reg.user_type,
    });
    result[login_key] = json!(login_id);
    if generated {
        result["temporaryPassword"] = json!(password);
    }
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "identity.inspectEmail" => inspect_email,
        "registration.submit" => submit,
        "registration.updateFace" => update_face,
        "registration.status" => status,
        "admin.registrations.list" => admin_list,
        "admin.registrations.review" => review,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
