use rusqlite::{OptionalExtension, Row};
use serde_json::json;

use crate::identity::{normalize_department, normalize_year};
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, optional_bool, optional_str, require_row, required_str,
    HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

fn announcement_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "authorId": r.get::<_, String>(1)?,
        "authorName": r.get::<_, Option<String>>(2)?,
        "title": r.get::<_, String>(3)?,
        "content": r.get::<_, String>(4)?,
        "department": r.get::<_, Option<String>>(5)?,
        "year": r.get::<_, Option<String>>(6)?,
        "isUniversityWide": r.get::<_, i64>(7)? != 0,
        "createdAt": r.get::<_, String>(8)?,
    }))
}

const SELECT_ANNOUNCEMENTS: &str = "SELECT a.id, a.author_id, f.name, a.title, a.content, a.department, a.year, a.is_university_wide, a.created_at
     FROM announcements a
     LEFT JOIN faculty f ON f.id = a.author_id";

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let author_id = required_str(params, "authorId")?;
    let title = required_str(params, "title")?;
    let content = required_str(params, "content")?;
    let university_wide = optional_bool(params, "isUniversityWide")?.unwrap_or(false);
    let department = optional_str(params, "department").map(|d| normalize_department(&d));
    let year = optional_str(params, "year").map(|y| normalize_year(&y));
    if !university_wide && department.is_none() {
        return Err(HandlerError::bad_params(
            "department is required unless the announcement is university-wide",
        ));
    }
    require_row(ctx.conn, "faculty", &author_id, "faculty")?;

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO announcements(id, author_id, title, content, department, year, is_university_wide, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            author_id,
            title,
            content,
            department,
            year,
            university_wide as i64,
            now_rfc3339()
        ],
    )?;
    Ok(json!({ "announcementId": id }))
}

fn list_for_student(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let audience: Option<(String, String)> = ctx
        .conn
        .query_row(
            "SELECT department, year FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((department, year)) = audience else {
        return Err(HandlerError::NotFound("student"));
    };

    let mut stmt = ctx.conn.prepare(&format!(
        "{SELECT_ANNOUNCEMENTS}
         WHERE a.is_university_wide = 1
            OR (a.department = ?1 AND a.year IS NULL)
            OR (a.department = ?1 AND a.year = ?2)
         ORDER BY a.created_at DESC"
    ))?;
    let announcements = stmt
        .query_map((&department, &year), announcement_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "announcements": announcements }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let author_id = optional_str(params, "authorId");
    let mut stmt = ctx.conn.prepare(&format!(
        "{SELECT_ANNOUNCEMENTS}
         WHERE ?1 IS NULL OR a.author_id = ?1
         ORDER BY a.created_at DESC"
    ))?;
    let announcements = stmt
        .query_map([&author_id], announcement_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "announcements": announcements }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "announcements.create" => create,
        "announcements.listForStudent" => list_for_student,
        "announcements.list" => list,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
