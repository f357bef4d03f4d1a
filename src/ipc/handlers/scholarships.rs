use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, epoch_millis, new_id, now_rfc3339, one_of, optional_bool, optional_f64,
    optional_str, parse_timestamp, require_row, required_f64, required_str, required_timestamp,
    rfc3339, store_upload, timestamp_param, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::storage;

const CATEGORIES: &[&str] = &[
    "merit",
    "need-based",
    "research",
    "sports",
    "cultural",
    "international",
    "minority",
    "other",
];
const STATUSES: &[&str] = &[
    "draft",
    "submitted",
    "under_review",
    "approved",
    "rejected",
    "additional_info_required",
];
const REVIEW_STATUSES: &[&str] = &["approved", "rejected", "additional_info_required"];
const COMMENTER_TYPES: &[&str] = &["student", "faculty", "admin"];

const SCHOLARSHIP_COLUMNS: &str = "id, name, description, eligibility_criteria, amount, deadline, provider, provider_website, document_requirements, category, is_active, is_featured, created_at, updated_at";
const APPLICATION_COLUMNS: &str = "a.id, a.scholarship_id, a.student_id, a.status, a.application_data, a.feedback, a.submitted_at, a.reviewed_at, a.created_at, a.updated_at, sc.name, st.name";

fn scholarship_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "description": r.get::<_, String>(2)?,
        "eligibilityCriteria": r.get::<_, String>(3)?,
        "amount": r.get::<_, f64>(4)?,
        "deadline": r.get::<_, String>(5)?,
        "provider": r.get::<_, String>(6)?,
        "providerWebsite": r.get::<_, Option<String>>(7)?,
        "documentRequirements": r.get::<_, String>(8)?,
        "category": r.get::<_, String>(9)?,
        "isActive": r.get::<_, i64>(10)? != 0,
        "isFeatured": r.get::<_, i64>(11)? != 0,
        "createdAt": r.get::<_, String>(12)?,
        "updatedAt": r.get::<_, String>(13)?,
    }))
}

fn application_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let data: String = r.get(4)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "scholarshipId": r.get::<_, String>(1)?,
        "studentId": r.get::<_, String>(2)?,
        "status": r.get::<_, String>(3)?,
        "applicationData": serde_json::from_str::<serde_json::Value>(&data).unwrap_or_else(|_| json!({})),
        "feedback": r.get::<_, Option<String>>(5)?,
        "submittedAt": r.get::<_, Option<String>>(6)?,
        "reviewedAt": r.get::<_, Option<String>>(7)?,
        "createdAt": r.get::<_, String>(8)?,
        "updatedAt": r.get::<_, String>(9)?,
        "scholarshipName": r.get::<_, Option<String>>(10)?,
        "studentName": r.get::<_, Option<String>>(11)?,
    }))
}

fn application_data(params: &serde_json::Value) -> Result<Option<String>, HandlerError> {
    match params.get("applicationData") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v @ serde_json::Value::Object(_)) => Ok(Some(v.to_string())),
        Some(_) => Err(HandlerError::bad_params("applicationData must be an object")),
    }
}

fn attach_documents(
    conn: &Connection,
    applications: &mut [serde_json::Value],
) -> Result<(), HandlerError> {
    let mut stmt = conn.prepare(
        "SELECT file_name, url, uploaded_at FROM scholarship_documents
         WHERE application_id = ? ORDER BY uploaded_at, rowid",
    )?;
    for application in applications.iter_mut() {
        let id = application["id"].as_str().unwrap_or_default().to_string();
        let docs = stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "fileName": r.get::<_, String>(0)?,
                    "url": r.get::<_, String>(1)?,
                    "uploadedAt": r.get::<_, String>(2)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        application["documentUrls"] = json!(docs
            .iter()
            .filter_map(|d| d["url"].as_str())
            .collect::<Vec<_>>());
        application["documents"] = json!(docs);
    }
    Ok(())
}

fn load_application(conn: &Connection, id: &str) -> Result<serde_json::Value, HandlerError> {
    let mut application = conn
        .query_row(
            &format!(
                "SELECT {APPLICATION_COLUMNS}
                 FROM scholarship_applications a
                 LEFT JOIN scholarships sc ON sc.id = a.scholarship_id
                 LEFT JOIN students st ON st.id = a.student_id
                 WHERE a.id = ?"
            ),
            [id],
            application_from_row,
        )
        .optional()?
        .ok_or(HandlerError::NotFound("application"))?;
    attach_documents(conn, std::slice::from_mut(&mut application))?;
    Ok(application)
}

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let description = required_str(params, "description")?;
    let eligibility = required_str(params, "eligibilityCriteria")?;
    let amount = required_f64(params, "amount")?;
    if amount < 0.0 {
        return Err(HandlerError::bad_params("amount must not be negative"));
    }
    let deadline = required_timestamp(params, "deadline")?;
    let provider = required_str(params, "provider")?;
    let category = required_str(params, "category")?.to_lowercase();
    one_of(&category, CATEGORIES, "category")?;
    let is_active = optional_bool(params, "isActive")?.unwrap_or(true);
    let is_featured = optional_bool(params, "isFeatured")?.unwrap_or(false);

    let id = new_id();
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO scholarships(id, name, description, eligibility_criteria, amount, deadline, provider,
                                  provider_website, document_requirements, category, is_active, is_featured,
                                  created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            name,
            description,
            eligibility,
            amount,
            rfc3339(deadline),
            provider,
            optional_str(params, "providerWebsite"),
            optional_str(params, "documentRequirements").unwrap_or_default(),
            category,
            is_active,
            is_featured,
            now,
            now
        ],
    )?;
    tracing::info!(scholarship_id = %id, category = %category, "scholarship created");
    Ok(json!({ "scholarshipId": id }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let active_only = optional_bool(params, "activeOnly")?.unwrap_or(false);
    let featured_only = optional_bool(params, "featuredOnly")?.unwrap_or(false);
    let category = optional_str(params, "category").map(|c| c.to_lowercase());
    if let Some(c) = category.as_deref() {
        one_of(c, CATEGORIES, "category")?;
    }
    let search = optional_str(params, "search").map(|s| format!("%{}%", s.to_lowercase()));
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {SCHOLARSHIP_COLUMNS}
         FROM scholarships
         WHERE (?1 = 0 OR is_active = 1)
           AND (?2 = 0 OR is_featured = 1)
           AND (?3 IS NULL OR category = ?3)
           AND (?4 IS NULL OR lower(name) LIKE ?4 OR lower(description) LIKE ?4 OR lower(provider) LIKE ?4)
         ORDER BY deadline ASC"
    ))?;
    let scholarships = stmt
        .query_map(
            (active_only, featured_only, &category, &search),
            scholarship_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "scholarships": scholarships }))
}

fn get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let scholarship_id = required_str(params, "scholarshipId")?;
    let scholarship = ctx
        .conn
        .query_row(
            &format!("SELECT {SCHOLARSHIP_COLUMNS} FROM scholarships WHERE id = ?"),
            [&scholarship_id],
            scholarship_from_row,
        )
        .optional()?
        .ok_or(HandlerError::NotFound("scholarship"))?;
    Ok(json!({ "scholarship": scholarship }))
}

fn update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let scholarship_id = required_str(params, "scholarshipId")?;
    require_row(ctx.conn, "scholarships", &scholarship_id, "scholarship")?;
    let amount = optional_f64(params, "amount")?;
    if amount.is_some_and(|a| a < 0.0) {
        return Err(HandlerError::bad_params("amount must not be negative"));
    }
    let deadline = timestamp_param(params, "deadline")?.map(rfc3339);
    ctx.conn.execute(
        "UPDATE scholarships
         SET is_active = COALESCE(?, is_active),
             is_featured = COALESCE(?, is_featured),
             deadline = COALESCE(?, deadline),
             amount = COALESCE(?, amount),
             updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            optional_bool(params, "isActive")?,
            optional_bool(params, "isFeatured")?,
            deadline,
            amount,
            now_rfc3339(),
            scholarship_id
        ],
    )?;
    get(ctx, params)
}

fn applications_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let scholarship_id = required_str(params, "scholarshipId")?;
    let student_id = required_str(params, "studentId")?;
    let status = optional_str(params, "status").unwrap_or_else(|| "draft".to_string());
    one_of(&status, &["draft", "submitted"], "status")?;
    let data = application_data(params)?.unwrap_or_else(|| "{}".to_string());
    require_row(ctx.conn, "students", &student_id, "student")?;

    let (active, deadline): (bool, String) = ctx
        .conn
        .query_row(
            "SELECT is_active, deadline FROM scholarships WHERE id = ?",
            [&scholarship_id],
            |r| Ok((r.get::<_, i64>(0)? != 0, r.get(1)?)),
        )
        .optional()?
        .ok_or(HandlerError::NotFound("scholarship"))?;
    if !active {
        return Err(HandlerError::conflict("scholarship is not accepting applications"));
    }
    if parse_timestamp(&deadline).is_some_and(|d| Utc::now() > d) {
        return Err(HandlerError::conflict("scholarship deadline has passed"));
    }
    let existing: Option<String> = ctx
        .conn
        .query_row(
            "SELECT id FROM scholarship_applications WHERE scholarship_id = ? AND student_id = ?",
            (&scholarship_id, &student_id),
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(HandlerError::conflict(
            "student has already applied for this scholarship",
        ));
    }

    let id = new_id();
    let now = now_rfc3339();
    let submitted_at = (status == "submitted").then(|| now.clone());
    ctx.conn.execute(
        "INSERT INTO scholarship_applications(id, scholarship_id, student_id, status, application_data,
                                              submitted_at, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, scholarship_id, student_id, status, data, submitted_at, now, now],
    )?;
    tracing::info!(application_id = %id, status = %status, "scholarship application created");
    Ok(json!({ "applicationId": id, "status": status }))
}

fn applications_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = optional_str(params, "studentId");
    let scholarship_id = optional_str(params, "scholarshipId");
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, STATUSES, "status")?;
    }
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {APPLICATION_COLUMNS}
         FROM scholarship_applications a
         LEFT JOIN scholarships sc ON sc.id = a.scholarship_id
         LEFT JOIN students st ON st.id = a.student_id
         WHERE (?1 IS NULL OR a.student_id = ?1)
           AND (?2 IS NULL OR a.scholarship_id = ?2)
           AND (?3 IS NULL OR a.status = ?3)
         ORDER BY a.created_at DESC, a.rowid DESC"
    ))?;
    let mut applications = stmt
        .query_map((&student_id, &scholarship_id, &status), application_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    attach_documents(ctx.conn, &mut applications)?;
    Ok(json!({ "applications": applications }))
}

fn applications_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let application_id = required_str(params, "applicationId")?;
    Ok(json!({ "application": load_application(ctx.conn, &application_id)? }))
}

fn applications_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let application_id = required_str(params, "applicationId")?;
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, STATUSES, "status")?;
    }
    let data = application_data(params)?;
    let feedback = optional_str(params, "feedback");
    require_row(
        ctx.conn,
        "scholarship_applications",
        &application_id,
        "application",
    )?;

    let now = now_rfc3339();
    let submitted_at = (status.as_deref() == Some("submitted")).then(|| now.clone());
    let reviewed_at = status
        .as_deref()
        .filter(|s| REVIEW_STATUSES.contains(s))
        .map(|_| now.clone());
    ctx.conn.execute(
        "UPDATE scholarship_applications
         SET status = COALESCE(?, status),
             application_data = COALESCE(?, application_data),
             feedback = COALESCE(?, feedback),
             submitted_at = COALESCE(?, submitted_at),
             reviewed_at = COALESCE(?, reviewed_at),
             updated_at = ?
         WHERE id = ?",
        rusqlite::params![status, data, feedback, submitted_at, reviewed_at, now, application_id],
    )?;
    Ok(json!({ "application": load_application(ctx.conn, &application_id)? }))
}

fn applications_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let application_id = required_str(params, "applicationId")?;
    require_row(
        ctx.conn,
        "scholarship_applications",
        &application_id,
        "application",
    )?;
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM scholarship_documents WHERE application_id = ?",
        [&application_id],
    )?;
    tx.execute(
        "DELETE FROM scholarship_comments WHERE application_id = ?",
        [&application_id],
    )?;
    tx.execute(
        "DELETE FROM scholarship_applications WHERE id = ?",
        [&application_id],
    )?;
    tx.commit()?;
    Ok(json!({ "applicationId": application_id, "deleted": true }))
}

fn documents_upload(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let application_id = required_str(params, "applicationId")?;
    let file_name = required_str(params, "fileName")?;
    let data = required_str(params, "dataBase64")?;
    require_row(
        ctx.conn,
        "scholarship_applications",
        &application_id,
        "application",
    )?;

    let key = format!("{application_id}/{}-{file_name}", epoch_millis());
    let stored = store_upload(ctx, "scholarship_documents", &key, &data)?;
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO scholarship_documents(id, application_id, file_name, url, uploaded_at)
         VALUES(?, ?, ?, ?, ?)",
        (new_id(), &application_id, &file_name, &stored.url, &now),
    )?;
    ctx.conn.execute(
        "UPDATE scholarship_applications SET updated_at = ? WHERE id = ?",
        (&now, &application_id),
    )?;
    Ok(json!({ "url": stored.url, "size": stored.size }))
}

fn documents_remove(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let application_id = required_str(params, "applicationId")?;
    let url = required_str(params, "url")?;
    let removed = ctx.conn.execute(
        "DELETE FROM scholarship_documents WHERE application_id = ? AND url = ?",
        (&application_id, &url),
    )?;
    if removed == 0 {
        return Err(HandlerError::NotFound("document"));
    }
    if let Err(e) = storage::remove_object(ctx.workspace, &url) {
        tracing::warn!(url = %url, "failed to remove scholarship document: {e:#}");
    }
    ctx.conn.execute(
        "UPDATE scholarship_applications SET updated_at = ? WHERE id = ?",
        (now_rfc3339(), &application_id),
    )?;
    Ok(json!({ "applicationId": application_id, "removed": true }))
}

fn comments_add(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let application_id = required_str(params, "applicationId")?;
    let user_id = required_str(params, "userId")?;
    let user_type = required_str(params, "userType")?;
    one_of(&user_type, COMMENTER_TYPES, "userType")?;
    let comment = required_str(params, "comment")?;
    require_row(
        ctx.conn,
        "scholarship_applications",
        &application_id,
        "application",
    )?;

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO scholarship_comments(id, application_id, user_id, user_type, comment, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &application_id, &user_id, &user_type, &comment, now_rfc3339()),
    )?;
    Ok(json!({ "commentId": id }))
}

fn comments_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let application_id = required_str(params, "applicationId")?;
    require_row(
        ctx.conn,
        "scholarship_applications",
        &application_id,
        "application",
    )?;
    let mut stmt = ctx.conn.prepare(
        "SELECT id, user_id, user_type, comment, created_at
         FROM scholarship_comments
         WHERE application_id = ?
         ORDER BY created_at, rowid",
    )?;
    let comments = stmt
        .query_map([&application_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "userType": r.get::<_, String>(2)?,
                "comment": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "comments": comments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "scholarships.create" => create,
        "scholarships.list" => list,
        "scholarships.get" => get,
        "scholarships.update" => update,
        "scholarships.applications.create" => applications_create,
        "scholarships.applications.list" => applications_list,
        "scholarships.applications.get" => applications_get,
        "scholarships.applications.update" => applications_update,
        "scholarships.applications.delete" => applications_delete,
        "scholarships.documents.upload" => documents_upload,
        "scholarships.documents.remove" => documents_remove,
        "scholarships.comments.add" => comments_add,
        "scholarships.comments.list" => comments_list,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
