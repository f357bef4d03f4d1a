use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::identity::{normalize_department, normalize_year};
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, optional_i64, optional_str, parse_timestamp, require_row,
    required_str, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const GROUP_SELECT: &str = "SELECT g.id, g.name, g.description, g.department, g.year, g.class_id, g.faculty_id, g.created_by, g.max_members, g.created_at,
            (SELECT COUNT(*) FROM study_group_members m WHERE m.group_id = g.id) AS member_count
     FROM study_groups g";

fn list_groups<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<serde_json::Value>, HandlerError> {
    let mut stmt = conn.prepare(&format!(
        "{GROUP_SELECT} WHERE {filter} ORDER BY g.created_at, g.name"
    ))?;
    let groups = stmt
        .query_map(params, |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "department": r.get::<_, Option<String>>(3)?,
                "year": r.get::<_, Option<String>>(4)?,
                "classId": r.get::<_, Option<String>>(5)?,
                "facultyId": r.get::<_, Option<String>>(6)?,
                "createdBy": r.get::<_, String>(7)?,
                "maxMembers": r.get::<_, Option<i64>>(8)?,
                "createdAt": r.get::<_, String>(9)?,
                "memberCount": r.get::<_, i64>(10)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(groups)
}

/// Attaches `members` (id, name, prn) to each group in place.
fn attach_members(conn: &Connection, groups: &mut [serde_json::Value]) -> Result<(), HandlerError> {
    let mut stmt = conn.prepare(
        "SELECT m.student_id, s.name, s.prn, m.joined_at
         FROM study_group_members m
         LEFT JOIN students s ON s.id = m.student_id
         WHERE m.group_id = ?
         ORDER BY s.name",
    )?;
    for group in groups.iter_mut() {
        let group_id = group["id"].as_str().unwrap_or_default().to_string();
        let members = stmt
            .query_map([&group_id], |r| {
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "name": r.get::<_, Option<String>>(1)?,
                    "prn": r.get::<_, Option<String>>(2)?,
                    "joinedAt": r.get::<_, String>(3)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        group["members"] = json!(members);
    }
    Ok(())
}

fn max_members_param(params: &serde_json::Value) -> Result<Option<i64>, HandlerError> {
    let max = optional_i64(params, "maxMembers")?;
    if max.is_some_and(|m| m <= 0) {
        return Err(HandlerError::bad_params("maxMembers must be positive"));
    }
    Ok(max)
}

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let description = optional_str(params, "description").unwrap_or_default();
    let department = normalize_department(&required_str(params, "department")?);
    let year = normalize_year(&required_str(params, "year")?);
    let faculty_id = required_str(params, "facultyId")?;
    let class_id = optional_str(params, "classId");
    let max_members = max_members_param(params)?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    if let Some(c) = class_id.as_deref() {
        require_row(ctx.conn, "classes", c, "class")?;
    }

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO study_groups(id, name, description, department, year, class_id, faculty_id, created_by, max_members, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            name,
            description,
            department,
            year,
            class_id,
            faculty_id,
            faculty_id,
            max_members,
            now_rfc3339()
        ],
    )?;
    Ok(json!({ "groupId": id }))
}

fn create_for_class(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class_id = required_str(params, "classId")?;
    let created_by = required_str(params, "createdBy")?;
    let group_size = optional_i64(params, "groupSize")?
        .ok_or_else(|| HandlerError::bad_params("missing groupSize"))?;
    if group_size <= 0 {
        return Err(HandlerError::bad_params("groupSize must be positive"));
    }

    let class: Option<(Option<String>, Option<String>, Option<String>)> = ctx
        .conn
        .query_row(
            "SELECT department, year, faculty_id FROM classes WHERE id = ?",
            [&class_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((department, year, faculty_id)) = class else {
        return Err(HandlerError::NotFound("class"));
    };

    let roster: Vec<String> = {
        let mut stmt = ctx
            .conn
            .prepare("SELECT id FROM students WHERE class_id = ? ORDER BY name, prn")?;
        let ids = stmt
            .query_map([&class_id], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    if roster.is_empty() {
        return Err(HandlerError::conflict("class has no students"));
    }

    let tx = ctx.conn.unchecked_transaction()?;
    let now = now_rfc3339();
    let mut groups = Vec::new();
    for (idx, chunk) in roster.chunks(group_size as usize).enumerate() {
        let group_id = new_id();
        let name = format!("Group {}", idx + 1);
        tx.execute(
            "INSERT INTO study_groups(id, name, description, department, year, class_id, faculty_id, created_by, max_members, created_at)
             VALUES(?, ?, '', ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                group_id,
                name,
                department,
                year,
                class_id,
                faculty_id,
                created_by,
                group_size,
                now
            ],
        )?;
        for student_id in chunk {
            tx.execute(
                "INSERT INTO study_group_members(id, group_id, student_id, joined_at) VALUES(?, ?, ?, ?)",
                (new_id(), &group_id, student_id, &now),
            )?;
        }
        groups.push(json!({ "groupId": group_id, "name": name, "memberIds": chunk }));
    }
    tx.commit()?;
    tracing::info!(class_id = %class_id, groups = groups.len(), "class split into study groups");
    Ok(json!({ "groups": groups }))
}

fn list_for_faculty(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let groups = list_groups(ctx.conn, "g.faculty_id = ?1", [&faculty_id])?;
    Ok(json!({ "groups": groups }))
}

fn list_for_student(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let department = normalize_department(&required_str(params, "department")?);
    let year = normalize_year(&required_str(params, "year")?);
    let mut groups = list_groups(
        ctx.conn,
        "g.department = ?1 AND g.year = ?2",
        (&department, &year),
    )?;
    attach_members(ctx.conn, &mut groups)?;
    Ok(json!({ "groups": groups }))
}

fn list_for_class(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class_id = required_str(params, "classId")?;
    require_row(ctx.conn, "classes", &class_id, "class")?;
    let mut groups = list_groups(ctx.conn, "g.class_id = ?1", [&class_id])?;
    attach_members(ctx.conn, &mut groups)?;
    Ok(json!({ "groups": groups }))
}

fn join(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let group_id = required_str(params, "groupId")?;
    let student_id = required_str(params, "studentId")?;
    let max_members: Option<Option<i64>> = ctx
        .conn
        .query_row(
            "SELECT max_members FROM study_groups WHERE id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(max_members) = max_members else {
        return Err(HandlerError::NotFound("study group"));
    };
    require_row(ctx.conn, "students", &student_id, "student")?;

    let already: Option<i64> = ctx
        .conn
        .query_row(
            "SELECT 1 FROM study_group_members WHERE group_id = ? AND student_id = ?",
            (&group_id, &student_id),
            |r| r.get(0),
        )
        .optional()?;
    if already.is_some() {
        return Err(HandlerError::conflict("already a member of this group"));
    }
    let count: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM study_group_members WHERE group_id = ?",
        [&group_id],
        |r| r.get(0),
    )?;
    if max_members.is_some_and(|m| count >= m) {
        return Err(HandlerError::conflict("study group is full"));
    }

    ctx.conn.execute(
        "INSERT INTO study_group_members(id, group_id, student_id, joined_at) VALUES(?, ?, ?, ?)",
        (new_id(), &group_id, &student_id, now_rfc3339()),
    )?;
    Ok(json!({ "groupId": group_id, "memberCount": count + 1 }))
}

fn leave(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let group_id = required_str(params, "groupId")?;
    let student_id = required_str(params, "studentId")?;
    let removed = ctx.conn.execute(
        "DELETE FROM study_group_members WHERE group_id = ? AND student_id = ?",
        (&group_id, &student_id),
    )?;
    if removed == 0 {
        return Err(HandlerError::NotFound("group membership"));
    }
    Ok(json!({ "groupId": group_id, "left": true }))
}

fn tasks_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let group_id = required_str(params, "groupId")?;
    let title = required_str(params, "title")?;
    let description = optional_str(params, "description").unwrap_or_default();
    let due_raw = required_str(params, "dueDate")?;
    if parse_timestamp(&due_raw).is_none() {
        return Err(HandlerError::bad_params("dueDate is not a valid date"));
    }
    let assigned_by = required_str(params, "assignedBy")?;
    require_row(ctx.conn, "study_groups", &group_id, "study group")?;

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO study_group_tasks(id, group_id, title, description, due_date, assigned_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, group_id, title, description, due_raw, assigned_by, now_rfc3339()],
    )?;
    Ok(json!({ "taskId": id }))
}

fn tasks_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let group_id = required_str(params, "groupId")?;
    require_row(ctx.conn, "study_groups", &group_id, "study group")?;
    let mut stmt = ctx.conn.prepare(
        "SELECT id, title, description, due_date, assigned_by, created_at
         FROM study_group_tasks
         WHERE group_id = ?
         ORDER BY due_date, created_at",
    )?;
    let tasks = stmt
        .query_map([&group_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "dueDate": r.get::<_, String>(3)?,
                "assignedBy": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "tasks": tasks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "studyGroups.create" => create,
        "studyGroups.createForClass" => create_for_class,
        "studyGroups.listForFaculty" => list_for_faculty,
        "studyGroups.listForStudent" => list_for_student,
        "studyGroups.listForClass" => list_for_class,
        "studyGroups.join" => join,
        "studyGroups.leave" => leave,
        "studyGroups.tasks.create" => tasks_create,
        "studyGroups.tasks.list" => tasks_list,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
