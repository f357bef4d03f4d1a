use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

use crate::auth;
use crate::identity::{self, normalize_department, normalize_year};
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    current_year, dispatch, epoch_millis, new_id, now_rfc3339, one_of, optional_str, require_row,
    required_secret, required_str, store_upload, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

pub(super) const STUDENT_COLUMNS: &str =
    "id, name, email, department, year, prn, mobile, class_id, face_url, face_registered, created_at";
pub(super) const FACULTY_COLUMNS: &str =
    "id, name, email, department, employee_id, designation, mobile, face_url, face_registered, created_at";

/// Maps a row selected with `STUDENT_COLUMNS`.
pub(super) fn student_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "role": "student",
        "department": r.get::<_, String>(3)?,
        "year": r.get::<_, String>(4)?,
        "prn": r.get::<_, String>(5)?,
        "employeeId": null,
        "mobile": r.get::<_, Option<String>>(6)?,
        "classId": r.get::<_, Option<String>>(7)?,
        "faceUrl": r.get::<_, Option<String>>(8)?,
        "faceRegistered": r.get::<_, i64>(9)? != 0,
        "createdAt": r.get::<_, String>(10)?,
    }))
}

/// Maps a row selected with `FACULTY_COLUMNS`.
pub(super) fn faculty_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "role": "faculty",
        "department": r.get::<_, String>(3)?,
        "year": null,
        "prn": null,
        "employeeId": r.get::<_, String>(4)?,
        "designation": r.get::<_, Option<String>>(5)?,
        "mobile": r.get::<_, Option<String>>(6)?,
        "faceUrl": r.get::<_, Option<String>>(7)?,
        "faceRegistered": r.get::<_, i64>(8)? != 0,
        "createdAt": r.get::<_, String>(9)?,
    }))
}

pub(super) fn load_user(
    conn: &Connection,
    role: &str,
    id: &str,
) -> Result<Option<serde_json::Value>, HandlerError> {
    let user = match role {
        "student" => conn
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"),
                [id],
                student_from_row,
            )
            .optional()?,
        "faculty" => conn
            .query_row(
                &format!("SELECT {FACULTY_COLUMNS} FROM faculty WHERE id = ?"),
                [id],
                faculty_from_row,
            )
            .optional()?,
        _ => None,
    };
    Ok(user)
}

/// Account tables for a role; anything else is a bad parameter.
pub(super) fn account_table(role: &str) -> Result<&'static str, HandlerError> {
    match role {
        "student" => Ok("students"),
        "faculty" => Ok("faculty"),
        _ => Err(HandlerError::bad_params(
            "role must be one of: student, faculty",
        )),
    }
}

/// True when any active account (student or faculty) uses `email`.
pub(super) fn email_in_use(conn: &Connection, email: &str) -> Result<bool, HandlerError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE email = ?1
             UNION ALL
             SELECT 1 FROM faculty WHERE email = ?1
             LIMIT 1",
            [email],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

pub(super) fn prn_in_use(conn: &Connection, prn: &str) -> Result<bool, HandlerError> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE prn = ?", [prn], |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}

pub(super) fn employee_id_in_use(conn: &Connection, employee_id: &str) -> Result<bool, HandlerError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM faculty WHERE employee_id = ?",
            [employee_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Next free `EMP0001`-style id.
pub(super) fn next_employee_id(conn: &Connection) -> Result<String, HandlerError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM faculty", [], |r| r.get(0))?;
    let mut n = count + 1;
    loop {
        let candidate = format!("EMP{n:04}");
        if !employee_id_in_use(conn, &candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// `PRN` followed by six digits seeded from the clock; only used when the
/// email does not encode a PRN.
pub(super) fn fallback_prn(conn: &Connection) -> Result<String, HandlerError> {
    let mut n = epoch_millis().rem_euclid(1_000_000);
    loop {
        let candidate = format!("PRN{n:06}");
        if !prn_in_use(conn, &candidate)? {
            return Ok(candidate);
        }
        n = (n + 1) % 1_000_000;
    }
}

pub(super) fn checked_email(ctx: &Ctx<'_>, raw: &str) -> Result<String, HandlerError> {
    let email = raw.trim().to_ascii_lowercase();
    let domain = ctx.config.registration.email_domain();
    if identity::validate_email(&email, domain) {
        return Ok(email);
    }
    Err(match domain {
        Some(d) => HandlerError::bad_params(format!("email must be a @{d} address")),
        None => HandlerError::bad_params("invalid email address"),
    })
}

pub(super) fn checked_password(params: &serde_json::Value, key: &str) -> Result<String, HandlerError> {
    let password = required_secret(params, key)?;
    if password.chars().count() < auth::MIN_PASSWORD_LEN {
        return Err(HandlerError::bad_params(format!(
            "{key} must be at least {} characters",
            auth::MIN_PASSWORD_LEN
        )));
    }
    Ok(password)
}

pub(super) fn hash(password: &str) -> Result<String, HandlerError> {
    auth::hash_password(password).map_err(|e| HandlerError::Internal(format!("{e:#}")))
}

fn students_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let email = checked_email(ctx, &required_str(params, "email")?)?;
    let name = required_str(params, "name")?;
    let department = normalize_department(&required_str(params, "department")?);
    let year = normalize_year(&required_str(params, "year")?);
    let password = checked_password(params, "password")?;
    let mobile = optional_str(params, "mobile");
    let class_id = optional_str(params, "classId");
    if let Some(c) = class_id.as_deref() {
        require_row(ctx.conn, "classes", c, "class")?;
    }

    if email_in_use(ctx.conn, &email)? {
        return Err(HandlerError::conflict("An account with this email already exists"));
    }
    let prn = match optional_str(params, "prn") {
        Some(p) => p.to_ascii_uppercase(),
        None => match identity::extract_student_info(&email, current_year()) {
            Some(info) => info.prn,
            None => fallback_prn(ctx.conn)?,
        },
    };
    if prn_in_use(ctx.conn, &prn)? {
        return Err(HandlerError::conflict(format!("PRN {prn} is already in use")));
    }

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO students(id, prn, email, name, department, year, mobile, class_id, password_hash, face_registered, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        rusqlite::params![
            id,
            prn,
            email,
            name,
            department,
            year,
            mobile,
            class_id,
            hash(&password)?,
            now_rfc3339()
        ],
    )?;
    tracing::info!(student_id = %id, "student account created");
    Ok(json!({ "studentId": id, "prn": prn }))
}

fn faculty_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let email = checked_email(ctx, &required_str(params, "email")?)?;
    let name = required_str(params, "name")?;
    let department = normalize_department(&required_str(params, "department")?);
    let password = checked_password(params, "password")?;

    if email_in_use(ctx.conn, &email)? {
        return Err(HandlerError::conflict("An account with this email already exists"));
    }
    let employee_id = match optional_str(params, "employeeId") {
        Some(e) => {
            let e = e.to_ascii_uppercase();
            if employee_id_in_use(ctx.conn, &e)? {
                return Err(HandlerError::conflict(format!(
                    "employee id {e} is already in use"
                )));
            }
            e
        }
        None => next_employee_id(ctx.conn)?,
    };

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO faculty(id, employee_id, email, name, department, designation, field, course, mobile, password_hash, face_registered, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        rusqlite::params![
            id,
            employee_id,
            email,
            name,
            department,
            optional_str(params, "designation"),
            optional_str(params, "field"),
            optional_str(params, "course"),
            optional_str(params, "mobile"),
            hash(&password)?,
            now_rfc3339()
        ],
    )?;
    tracing::info!(faculty_id = %id, "faculty account created");
    Ok(json!({ "facultyId": id, "employeeId": employee_id }))
}

fn students_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let department = optional_str(params, "department").map(|d| normalize_department(&d));
    let year = optional_str(params, "year").map(|y| normalize_year(&y));
    let class_id = optional_str(params, "classId");

    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students
         WHERE (?1 IS NULL OR department = ?1)
           AND (?2 IS NULL OR year = ?2)
           AND (?3 IS NULL OR class_id = ?3)
         ORDER BY name, prn"
    ))?;
    let students = stmt
        .query_map((&department, &year, &class_id), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let student = load_user(ctx.conn, "student", &student_id)?
        .ok_or(HandlerError::NotFound("student"))?;
    Ok(json!({ "student": student }))
}

fn students_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    require_row(ctx.conn, "students", &student_id, "student")?;

    let tx = ctx.conn.unchecked_transaction()?;
    if let Some(name) = optional_str(params, "name") {
        tx.execute(
            "UPDATE students SET name = ? WHERE id = ?",
            (&name, &student_id),
        )?;
    }
    if let Some(mobile) = optional_str(params, "mobile") {
        tx.execute(
            "UPDATE students SET mobile = ? WHERE id = ?",
            (&mobile, &student_id),
        )?;
    }
    // An explicit null detaches the student from its class.
    match params.get("classId") {
        Some(serde_json::Value::Null) => {
            tx.execute(
                "UPDATE students SET class_id = NULL WHERE id = ?",
                [&student_id],
            )?;
        }
        Some(_) => {
            let class_id = required_str(params, "classId")?;
            require_row(&tx, "classes", &class_id, "class")?;
            tx.execute(
                "UPDATE students SET class_id = ? WHERE id = ?",
                (&class_id, &student_id),
            )?;
        }
        None => {}
    }
    tx.execute(
        "UPDATE students SET updated_at = ? WHERE id = ?",
        (now_rfc3339(), &student_id),
    )?;
    tx.commit()?;

    let student = load_user(ctx.conn, "student", &student_id)?
        .ok_or(HandlerError::NotFound("student"))?;
    Ok(json!({ "student": student }))
}

fn faculty_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let department = optional_str(params, "department").map(|d| normalize_department(&d));
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {FACULTY_COLUMNS}
         FROM faculty
         WHERE ?1 IS NULL OR department = ?1
         ORDER BY name"
    ))?;
    let faculty = stmt
        .query_map([&department], faculty_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "faculty": faculty }))
}

fn faculty_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let faculty = load_user(ctx.conn, "faculty", &faculty_id)?
        .ok_or(HandlerError::NotFound("faculty"))?;
    Ok(json!({ "faculty": faculty }))
}

fn faces_save(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let user_id = required_str(params, "userId")?;
    let user_type = required_str(params, "userType")?;
    one_of(&user_type, &["student", "faculty"], "userType")?;
    let table = account_table(&user_type)?;
    let photo = required_str(params, "photoBase64")?;
    require_row(ctx.conn, table, &user_id, "user")?;

    let key = format!("{user_type}_{user_id}_{}.jpg", epoch_millis());
    let stored = store_upload(ctx, "faces", &key, &photo)?;
    ctx.conn.execute(
        &format!("UPDATE {table} SET face_url = ?, face_registered = 1, updated_at = ? WHERE id = ?"),
        (&stored.url, now_rfc3339(), &user_id),
    )?;
    Ok(json!({ "faceUrl": stored.url, "size": stored.size }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "students.create" => students_create,
        "students.list" => students_list,
        "students.get" => students_get,
        "students.update" => students_update,
        "faculty.create" => faculty_create,
        "faculty.list" => faculty_list,
        "faculty.get" => faculty_get,
        "faces.save" => faces_save,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
