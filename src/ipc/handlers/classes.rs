use serde_json::json;

use crate::identity::{normalize_department, normalize_year};
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, optional_str, optional_str_list, require_row, required_str,
    HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

fn classes_list(ctx: &Ctx<'_>, _params: &serde_json::Value) -> HandlerResult {
    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = ctx.conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.department,
           c.year,
           c.faculty_id,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM attendance_sessions a WHERE a.class_id = c.id) AS session_count
         FROM classes c
         ORDER BY c.name",
    )?;
    let classes = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "department": row.get::<_, Option<String>>(2)?,
                "year": row.get::<_, Option<String>>(3)?,
                "facultyId": row.get::<_, Option<String>>(4)?,
                "studentCount": row.get::<_, i64>(5)?,
                "sessionCount": row.get::<_, i64>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let department = optional_str(params, "department").map(|d| normalize_department(&d));
    let year = optional_str(params, "year").map(|y| normalize_year(&y));
    let faculty_id = optional_str(params, "facultyId");
    if let Some(f) = faculty_id.as_deref() {
        require_row(ctx.conn, "faculty", f, "faculty")?;
    }

    let class_id = new_id();
    ctx.conn.execute(
        "INSERT INTO classes(id, name, department, year, faculty_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&class_id, &name, &department, &year, &faculty_id, now_rfc3339()),
    )?;
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_assign_students(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class_id = required_str(params, "classId")?;
    let student_ids = optional_str_list(params, "studentIds")?
        .ok_or_else(|| HandlerError::bad_params("missing studentIds"))?;
    require_row(ctx.conn, "classes", &class_id, "class")?;

    let tx = ctx.conn.unchecked_transaction()?;
    let now = now_rfc3339();
    for student_id in &student_ids {
        let changed = tx.execute(
            "UPDATE students SET class_id = ?, updated_at = ? WHERE id = ?",
            (&class_id, &now, student_id),
        )?;
        if changed == 0 {
            // Dropping the transaction rolls back earlier rows.
            return Err(HandlerError::NotFound("student"));
        }
    }
    tx.commit()?;
    Ok(json!({ "classId": class_id, "updated": student_ids.len() }))
}

fn classes_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class_id = required_str(params, "classId")?;
    require_row(ctx.conn, "classes", &class_id, "class")?;

    let tx = ctx.conn.unchecked_transaction()?;

    // Explicit dependency order (no ON DELETE CASCADE).
    // NOTE: keep this list in step with tables that reference classes.
    tx.execute(
        "DELETE FROM student_attendance
         WHERE session_id IN (SELECT id FROM attendance_sessions WHERE class_id = ?)",
        [&class_id],
    )?;
    tx.execute(
        "DELETE FROM faculty_attendance
         WHERE session_id IN (SELECT id FROM attendance_sessions WHERE class_id = ?)",
        [&class_id],
    )?;
    let sessions = tx.execute(
        "DELETE FROM attendance_sessions WHERE class_id = ?",
        [&class_id],
    )?;
    tx.execute(
        "DELETE FROM study_group_tasks
         WHERE group_id IN (SELECT id FROM study_groups WHERE class_id = ?)",
        [&class_id],
    )?;
    tx.execute(
        "DELETE FROM study_group_members
         WHERE group_id IN (SELECT id FROM study_groups WHERE class_id = ?)",
        [&class_id],
    )?;
    let groups = tx.execute("DELETE FROM study_groups WHERE class_id = ?", [&class_id])?;
    let detached = tx.execute(
        "UPDATE students SET class_id = NULL WHERE class_id = ?",
        [&class_id],
    )?;
    tx.execute(
        "UPDATE assignments SET class_id = NULL WHERE class_id = ?",
        [&class_id],
    )?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])?;
    tx.commit()?;

    tracing::info!(class_id = %class_id, sessions, groups, detached, "class deleted");
    Ok(json!({
        "ok": true,
        "sessionsDeleted": sessions,
        "studyGroupsDeleted": groups,
        "studentsDetached": detached,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "classes.list" => classes_list,
        "classes.create" => classes_create,
        "classes.assignStudents" => classes_assign_students,
        "classes.delete" => classes_delete,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
