use rusqlite::{OptionalExtension, Row};
use serde_json::json;

use crate::geo::{self, Point};
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, one_of, optional_bool, optional_f64, require_row,
    required_str, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const STUDENT_STATUSES: &[&str] = &["present", "absent", "late", "excused"];
const FACULTY_STATUSES: &[&str] = &["present", "absent", "late"];
const SESSION_COLUMNS: &str = "s.id, s.class_id, c.name, s.faculty_id, s.session_name, s.session_date, s.start_time, s.end_time, s.location_latitude, s.location_longitude, s.geo_fence_radius, s.require_face_recognition, s.require_geo_fencing, s.require_liveness_detection, s.status, s.created_at";

fn session_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "classId": r.get::<_, String>(1)?,
        "className": r.get::<_, Option<String>>(2)?,
        "facultyId": r.get::<_, String>(3)?,
        "sessionName": r.get::<_, String>(4)?,
        "sessionDate": r.get::<_, String>(5)?,
        "startTime": r.get::<_, String>(6)?,
        "endTime": r.get::<_, String>(7)?,
        "locationLatitude": r.get::<_, Option<f64>>(8)?,
        "locationLongitude": r.get::<_, Option<f64>>(9)?,
        "geoFenceRadius": r.get::<_, f64>(10)?,
        "requireFaceRecognition": r.get::<_, i64>(11)? != 0,
        "requireGeoFencing": r.get::<_, i64>(12)? != 0,
        "requireLivenessDetection": r.get::<_, i64>(13)? != 0,
        "status": r.get::<_, String>(14)?,
        "createdAt": r.get::<_, String>(15)?,
    }))
}

struct SessionRules {
    center: Option<Point>,
    radius: f64,
    require_face: bool,
    require_geo: bool,
    status: String,
}

fn load_rules(ctx: &Ctx<'_>, session_id: &str) -> Result<SessionRules, HandlerError> {
    ctx.conn
        .query_row(
            "SELECT location_latitude, location_longitude, geo_fence_radius,
                    require_face_recognition, require_geo_fencing, status
             FROM attendance_sessions WHERE id = ?",
            [session_id],
            |r| {
                let lat: Option<f64> = r.get(0)?;
                let lng: Option<f64> = r.get(1)?;
                Ok(SessionRules {
                    center: lat.zip(lng).map(|(lat, lng)| Point::new(lat, lng)),
                    radius: r.get(2)?,
                    require_face: r.get::<_, i64>(3)? != 0,
                    require_geo: r.get::<_, i64>(4)? != 0,
                    status: r.get(5)?,
                })
            },
        )
        .optional()?
        .ok_or(HandlerError::NotFound("attendance session"))
}

/// Latitude/longitude supplied together, in range, or not at all.
fn point_param(
    params: &serde_json::Value,
    lat_key: &str,
    lng_key: &str,
) -> Result<Option<Point>, HandlerError> {
    match (optional_f64(params, lat_key)?, optional_f64(params, lng_key)?) {
        (None, None) => Ok(None),
        (Some(lat), Some(lng)) => {
            let p = Point::new(lat, lng);
            if !p.is_valid() {
                return Err(HandlerError::bad_params("coordinates are out of range"));
            }
            Ok(Some(p))
        }
        _ => Err(HandlerError::bad_params(format!(
            "{lat_key} and {lng_key} must be given together"
        ))),
    }
}

struct GeoOutcome {
    verified: bool,
    distance: Option<f64>,
}

/// Enforces the fence for attendees who claim to be in the room.
fn enforce_fence(
    rules: &SessionRules,
    status: &str,
    at: Option<Point>,
) -> Result<GeoOutcome, HandlerError> {
    let attending = matches!(status, "present" | "late");
    let check = match (rules.center, at) {
        (Some(center), Some(at)) => Some(geo::check_fence(center, rules.radius, at)),
        _ => None,
    };
    if rules.require_geo && attending {
        let Some(check) = check else {
            return Err(HandlerError::bad_params(
                "latitude and longitude are required for this session",
            ));
        };
        if !check.verified {
            return Err(HandlerError::GeofenceFailed {
                distance: check.distance.round() as i64,
                radius: rules.radius,
            });
        }
    }
    Ok(GeoOutcome {
        verified: check.is_some_and(|c| c.verified),
        distance: check.map(|c| c.distance.round()),
    })
}

fn sessions_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class_id = required_str(params, "classId")?;
    let faculty_id = required_str(params, "facultyId")?;
    let session_name = required_str(params, "sessionName")?;
    let session_date = required_str(params, "sessionDate")?;
    let start_time = required_str(params, "startTime")?;
    let end_time = required_str(params, "endTime")?;
    let location = point_param(params, "locationLatitude", "locationLongitude")?;
    let radius = optional_f64(params, "geoFenceRadius")?
        .unwrap_or(ctx.config.attendance.default_geo_fence_radius_m);
    if radius <= 0.0 {
        return Err(HandlerError::bad_params("geoFenceRadius must be positive"));
    }
    let require_face = optional_bool(params, "requireFaceRecognition")?.unwrap_or(true);
    let require_geo = optional_bool(params, "requireGeoFencing")?.unwrap_or(true);
    let require_liveness = optional_bool(params, "requireLivenessDetection")?.unwrap_or(true);
    if require_geo && location.is_none() {
        return Err(HandlerError::bad_params(
            "geo-fencing requires locationLatitude and locationLongitude",
        ));
    }
    require_row(ctx.conn, "classes", &class_id, "class")?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;

    let id = new_id();
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO attendance_sessions(id, class_id, faculty_id, session_name, session_date, start_time, end_time, location_latitude, location_longitude, geo_fence_radius, require_face_recognition, require_geo_fencing, require_liveness_detection, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        rusqlite::params![
            id,
            class_id,
            faculty_id,
            session_name,
            session_date,
            start_time,
            end_time,
            location.map(|p| p.latitude),
            location.map(|p| p.longitude),
            radius,
            require_face as i64,
            require_geo as i64,
            require_liveness as i64,
            now,
            now
        ],
    )?;
    tracing::info!(session_id = %id, class_id = %class_id, "attendance session opened");
    Ok(json!({ "sessionId": id, "status": "active", "geoFenceRadius": radius }))
}

fn sessions_list_for_faculty(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let faculty_id = required_str(params, "facultyId")?;
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS}
         FROM attendance_sessions s
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE s.faculty_id = ?
         ORDER BY s.created_at DESC"
    ))?;
    let sessions = stmt
        .query_map([&faculty_id], session_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sessions": sessions }))
}

fn sessions_list_for_student(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let class_id: Option<Option<String>> = ctx
        .conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(class_id) = class_id else {
        return Err(HandlerError::NotFound("student"));
    };
    let Some(class_id) = class_id else {
        return Err(HandlerError::NotFound("student class"));
    };

    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS}, r.attendance_status
         FROM attendance_sessions s
         LEFT JOIN classes c ON c.id = s.class_id
         LEFT JOIN student_attendance r ON r.session_id = s.id AND r.student_id = ?1
         WHERE s.class_id = ?2 AND s.status = 'active'
         ORDER BY s.created_at DESC"
    ))?;
    let sessions = stmt
        .query_map((&student_id, &class_id), |r| {
            let mut s = session_from_row(r)?;
            s["myStatus"] = json!(r.get::<_, Option<String>>(16)?);
            Ok(s)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classId": class_id, "sessions": sessions }))
}

fn geofence_verify(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let session_id = required_str(params, "sessionId")?;
    let at = point_param(params, "latitude", "longitude")?
        .ok_or_else(|| HandlerError::bad_params("missing latitude and longitude"))?;
    let rules = load_rules(ctx, &session_id)?;
    let Some(center) = rules.center else {
        return Ok(json!({ "verified": false, "distance": 0 }));
    };
    let check = geo::check_fence(center, rules.radius, at);
    Ok(json!({
        "verified": check.verified,
        "distance": check.distance.round() as i64,
        "radius": rules.radius,
    }))
}

fn mark_student(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let session_id = required_str(params, "sessionId")?;
    let student_id = required_str(params, "studentId")?;
    let status = required_str(params, "attendanceStatus")?;
    one_of(&status, STUDENT_STATUSES, "attendanceStatus")?;
    let at = point_param(params, "latitude", "longitude")?;
    let face_verified = optional_bool(params, "faceVerified")?.unwrap_or(false);
    let face_confidence = optional_f64(params, "faceConfidenceScore")?;
    let liveness_verified = optional_bool(params, "livenessVerified")?.unwrap_or(false);
    let liveness_score = optional_f64(params, "livenessScore")?;

    let rules = load_rules(ctx, &session_id)?;
    if rules.status != "active" {
        return Err(HandlerError::conflict("attendance session is not active"));
    }
    require_row(ctx.conn, "students", &student_id, "student")?;

    let geo = enforce_fence(&rules, &status, at)?;
    if rules.require_face && matches!(status.as_str(), "present" | "late") && !face_verified {
        return Err(HandlerError::FaceUnverified);
    }

    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO student_attendance(id, session_id, student_id, attendance_status, marked_at, face_verified, geo_location_verified, liveness_verified, latitude, longitude, distance_from_center, face_confidence_score, liveness_score)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           attendance_status = excluded.attendance_status,
           face_verified = excluded.face_verified,
           geo_location_verified = excluded.geo_location_verified,
           liveness_verified = excluded.liveness_verified,
           latitude = excluded.latitude,
           longitude = excluded.longitude,
           distance_from_center = excluded.distance_from_center,
           face_confidence_score = excluded.face_confidence_score,
           liveness_score = excluded.liveness_score,
           updated_at = excluded.marked_at",
        rusqlite::params![
            new_id(),
            session_id,
            student_id,
            status,
            now,
            face_verified as i64,
            geo.verified as i64,
            liveness_verified as i64,
            at.map(|p| p.latitude),
            at.map(|p| p.longitude),
            geo.distance,
            face_confidence,
            liveness_score
        ],
    )?;
    let record_id: String = ctx.conn.query_row(
        "SELECT id FROM student_attendance WHERE session_id = ? AND student_id = ?",
        (&session_id, &student_id),
        |r| r.get(0),
    )?;
    Ok(json!({
        "recordId": record_id,
        "attendanceStatus": status,
        "geoLocationVerified": geo.verified,
        "distance": geo.distance,
        "faceVerified": face_verified,
    }))
}

fn mark_faculty(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let session_id = required_str(params, "sessionId")?;
    let faculty_id = required_str(params, "facultyId")?;
    let status = required_str(params, "attendanceStatus")?;
    one_of(&status, FACULTY_STATUSES, "attendanceStatus")?;
    let at = point_param(params, "latitude", "longitude")?;
    let face_verified = optional_bool(params, "faceVerified")?.unwrap_or(false);

    let rules = load_rules(ctx, &session_id)?;
    if rules.status != "active" {
        return Err(HandlerError::conflict("attendance session is not active"));
    }
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;
    let geo = enforce_fence(&rules, &status, at)?;

    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO faculty_attendance(id, session_id, faculty_id, attendance_status, marked_at, face_verified, geo_location_verified, latitude, longitude, distance_from_center)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(session_id, faculty_id) DO UPDATE SET
           attendance_status = excluded.attendance_status,
           face_verified = excluded.face_verified,
           geo_location_verified = excluded.geo_location_verified,
           latitude = excluded.latitude,
           longitude = excluded.longitude,
           distance_from_center = excluded.distance_from_center,
           updated_at = excluded.marked_at",
        rusqlite::params![
            new_id(),
            session_id,
            faculty_id,
            status,
            now,
            face_verified as i64,
            geo.verified as i64,
            at.map(|p| p.latitude),
            at.map(|p| p.longitude),
            geo.distance
        ],
    )?;
    Ok(json!({
        "attendanceStatus": status,
        "geoLocationVerified": geo.verified,
        "distance": geo.distance,
    }))
}

fn session_records(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let session_id = required_str(params, "sessionId")?;
    require_row(ctx.conn, "attendance_sessions", &session_id, "attendance session")?;

    let mut stmt = ctx.conn.prepare(
        "SELECT r.id, r.student_id, s.name, s.prn, r.attendance_status, r.marked_at,
                r.face_verified, r.geo_location_verified, r.liveness_verified,
                r.distance_from_center, r.face_confidence_score, r.liveness_score
         FROM student_attendance r
         LEFT JOIN students s ON s.id = r.student_id
         WHERE r.session_id = ?
         ORDER BY s.name",
    )?;
    let students = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, Option<String>>(2)?,
                "prn": r.get::<_, Option<String>>(3)?,
                "attendanceStatus": r.get::<_, String>(4)?,
                "markedAt": r.get::<_, String>(5)?,
                "faceVerified": r.get::<_, i64>(6)? != 0,
                "geoLocationVerified": r.get::<_, i64>(7)? != 0,
                "livenessVerified": r.get::<_, i64>(8)? != 0,
                "distanceFromCenter": r.get::<_, Option<f64>>(9)?,
                "faceConfidenceScore": r.get::<_, Option<f64>>(10)?,
                "livenessScore": r.get::<_, Option<f64>>(11)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = ctx.conn.prepare(
        "SELECT r.id, r.faculty_id, f.name, r.attendance_status, r.marked_at,
                r.face_verified, r.geo_location_verified, r.distance_from_center
         FROM faculty_attendance r
         LEFT JOIN faculty f ON f.id = r.faculty_id
         WHERE r.session_id = ?
         ORDER BY f.name",
    )?;
    let faculty = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "facultyId": r.get::<_, String>(1)?,
                "facultyName": r.get::<_, Option<String>>(2)?,
                "attendanceStatus": r.get::<_, String>(3)?,
                "markedAt": r.get::<_, String>(4)?,
                "faceVerified": r.get::<_, i64>(5)? != 0,
                "geoLocationVerified": r.get::<_, i64>(6)? != 0,
                "distanceFromCenter": r.get::<_, Option<f64>>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students, "faculty": faculty }))
}

fn analytics(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let session_id = required_str(params, "sessionId")?;
    require_row(ctx.conn, "attendance_sessions", &session_id, "attendance session")?;
    let counts: [i64; 8] = ctx.conn.query_row(
        "SELECT
           COUNT(*),
           COALESCE(SUM(attendance_status = 'present'), 0),
           COALESCE(SUM(attendance_status = 'absent'), 0),
           COALESCE(SUM(attendance_status = 'late'), 0),
           COALESCE(SUM(attendance_status = 'excused'), 0),
           COALESCE(SUM(face_verified), 0),
           COALESCE(SUM(geo_location_verified), 0),
           COALESCE(SUM(liveness_verified), 0)
         FROM student_attendance WHERE session_id = ?",
        [&session_id],
        |r| {
            Ok([
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
            ])
        },
    )?;
    let [total, present, absent, late, excused, face, geo, liveness] = counts;
    let rate = if total > 0 {
        present as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    Ok(json!({
        "sessionId": session_id,
        "totalStudents": total,
        "presentStudents": present,
        "absentStudents": absent,
        "lateStudents": late,
        "excusedStudents": excused,
        "attendanceRate": rate,
        "faceVerified": face,
        "geoVerified": geo,
        "livenessVerified": liveness,
    }))
}

fn sessions_end(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let session_id = required_str(params, "sessionId")?;
    let changed = ctx.conn.execute(
        "UPDATE attendance_sessions SET status = 'ended', updated_at = ? WHERE id = ?",
        (now_rfc3339(), &session_id),
    )?;
    if changed == 0 {
        return Err(HandlerError::NotFound("attendance session"));
    }
    tracing::info!(session_id = %session_id, "attendance session ended");
    Ok(json!({ "sessionId": session_id, "status": "ended" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "attendance.sessions.create" => sessions_create,
        "attendance.sessions.listForFaculty" => sessions_list_for_faculty,
        "attendance.sessions.listForStudent" => sessions_list_for_student,
        "attendance.sessions.end" => sessions_end,
        "attendance.geofence.verify" => geofence_verify,
        "attendance.mark" => mark_student,
        "attendance.markFaculty" => mark_faculty,
        "attendance.session.records" => session_records,
        "attendance.analytics" => analytics,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(require_geo: bool) -> SessionRules {
        SessionRules {
            center: Some(Point::new(19.8762, 74.4810)),
            radius: 100.0,
            require_face: true,
            require_geo,
            status: "active".to_string(),
        }
    }

    #[test]
    fn absent_students_skip_the_fence() {
        let outcome = enforce_fence(&rules(true), "absent", None).expect("absent");
        assert!(!outcome.verified);
        assert_eq!(outcome.distance, None);
    }

    #[test]
    fn present_outside_fence_is_rejected_with_distance() {
        let far = Some(Point::new(19.8862, 74.4810));
        match enforce_fence(&rules(true), "present", far) {
            Err(HandlerError::GeofenceFailed { distance, radius }) => {
                assert!(distance > 1000);
                assert_eq!(radius, 100.0);
            }
            other => panic!("expected geofence failure, got {:?}", other.map(|o| o.verified)),
        }
    }

    #[test]
    fn optional_fence_still_records_distance() {
        let near = Some(Point::new(19.8767, 74.4810));
        let outcome = enforce_fence(&rules(false), "present", near).expect("near");
        assert!(outcome.verified);
        assert!(outcome.distance.is_some_and(|d| d > 0.0 && d < 100.0));
        assert!(enforce_fence(&rules(false), "present", None).is_ok());
    }
}
