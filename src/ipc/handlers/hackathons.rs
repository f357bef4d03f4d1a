use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

use super::directory::account_table;
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, epoch_millis, new_id, now_rfc3339, one_of, optional_i64,
    optional_str, optional_str_list, parse_timestamp, require_row, required_f64, required_str,
    required_timestamp, rfc3339, store_upload, timestamp_param, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const STATUSES: &[&str] = &["upcoming", "ongoing", "completed"];
const ORGANIZER_TYPES: &[&str] = &["faculty", "student", "university"];
const MEMBER_TYPES: &[&str] = &["student", "faculty"];
const LEADER_ROLE: &str = "Team Leader";

const HACKATHON_COLUMNS: &str = "h.id, h.name, h.description, h.rules, h.start_date, h.end_date, h.registration_deadline, h.location, h.organizer_id, h.organizer_type, h.max_team_size, h.min_team_size, h.prizes, h.technologies, h.status, h.website_url, h.created_at, h.updated_at,
     (SELECT COUNT(*) FROM hackathon_teams t WHERE t.hackathon_id = h.id) AS team_count";
const TEAM_COLUMNS: &str = "t.id, t.hackathon_id, t.team_name, t.project_name, t.project_description, t.technologies_used, t.github_url, t.demo_url, t.presentation_url, t.leader_id, t.leader_type, t.is_submitted, t.submission_time, t.rank, t.score, t.feedback, t.created_at, t.updated_at,
     (SELECT COUNT(*) FROM hackathon_team_members m WHERE m.team_id = t.id) AS member_count";

fn string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn hackathon_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "description": r.get::<_, String>(2)?,
        "rules": r.get::<_, Option<String>>(3)?,
        "startDate": r.get::<_, String>(4)?,
        "endDate": r.get::<_, String>(5)?,
        "registrationDeadline": r.get::<_, String>(6)?,
        "location": r.get::<_, String>(7)?,
        "organizerId": r.get::<_, Option<String>>(8)?,
        "organizerType": r.get::<_, String>(9)?,
        "maxTeamSize": r.get::<_, i64>(10)?,
        "minTeamSize": r.get::<_, i64>(11)?,
        "prizes": r.get::<_, Option<String>>(12)?,
        "technologies": string_list(r.get(13)?),
        "status": r.get::<_, String>(14)?,
        "websiteUrl": r.get::<_, Option<String>>(15)?,
        "createdAt": r.get::<_, String>(16)?,
        "updatedAt": r.get::<_, String>(17)?,
        "teamCount": r.get::<_, i64>(18)?,
    }))
}

fn team_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "hackathonId": r.get::<_, String>(1)?,
        "teamName": r.get::<_, String>(2)?,
        "projectName": r.get::<_, String>(3)?,
        "projectDescription": r.get::<_, Option<String>>(4)?,
        "technologiesUsed": string_list(r.get(5)?),
        "githubUrl": r.get::<_, Option<String>>(6)?,
        "demoUrl": r.get::<_, Option<String>>(7)?,
        "presentationUrl": r.get::<_, Option<String>>(8)?,
        "leaderId": r.get::<_, String>(9)?,
        "leaderType": r.get::<_, String>(10)?,
        "isSubmitted": r.get::<_, i64>(11)? != 0,
        "submissionTime": r.get::<_, Option<String>>(12)?,
        "rank": r.get::<_, Option<i64>>(13)?,
        "score": r.get::<_, Option<f64>>(14)?,
        "feedback": r.get::<_, Option<String>>(15)?,
        "createdAt": r.get::<_, String>(16)?,
        "updatedAt": r.get::<_, String>(17)?,
        "memberCount": r.get::<_, i64>(18)?,
    }))
}

/// The parts of a hackathon that gate registration and submission.
struct Window {
    registration_deadline: String,
    end_date: String,
    status: String,
    max_team_size: i64,
}

impl Window {
    fn registration_open(&self) -> bool {
        self.status != "completed"
            && parse_timestamp(&self.registration_deadline).is_some_and(|d| Utc::now() <= d)
    }

    fn submission_open(&self) -> bool {
        self.status != "completed" && parse_timestamp(&self.end_date).is_some_and(|d| Utc::now() <= d)
    }
}

fn load_window(conn: &Connection, hackathon_id: &str) -> Result<Window, HandlerError> {
    conn.query_row(
        "SELECT registration_deadline, end_date, status, max_team_size FROM hackathons WHERE id = ?",
        [hackathon_id],
        |r| {
            Ok(Window {
                registration_deadline: r.get(0)?,
                end_date: r.get(1)?,
                status: r.get(2)?,
                max_team_size: r.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or(HandlerError::NotFound("hackathon"))
}

/// `(hackathon_id, leader_id, is_submitted)` for a team.
fn load_team_head(conn: &Connection, team_id: &str) -> Result<(String, String, bool), HandlerError> {
    conn.query_row(
        "SELECT hackathon_id, leader_id, is_submitted FROM hackathon_teams WHERE id = ?",
        [team_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get::<_, i64>(2)? != 0)),
    )
    .optional()?
    .ok_or(HandlerError::NotFound("team"))
}

fn require_member_account(
    conn: &Connection,
    user_type: &str,
    user_id: &str,
) -> Result<(), HandlerError> {
    one_of(user_type, MEMBER_TYPES, "userType")?;
    require_row(conn, account_table(user_type)?, user_id, "user")
}

fn list_json(params: &serde_json::Value, key: &str) -> Result<String, HandlerError> {
    let list = optional_str_list(params, key)?.unwrap_or_default();
    Ok(serde_json::to_string(&list).unwrap_or_else(|_| "[]".to_string()))
}

fn members(conn: &Connection, team_id: &str) -> Result<Vec<serde_json::Value>, HandlerError> {
    let mut stmt = conn.prepare(
        "SELECT m.user_id, m.user_type, m.role, m.joined_at, COALESCE(s.name, f.name)
         FROM hackathon_team_members m
         LEFT JOIN students s ON m.user_type = 'student' AND s.id = m.user_id
         LEFT JOIN faculty f ON m.user_type = 'faculty' AND f.id = m.user_id
         WHERE m.team_id = ?
         ORDER BY m.joined_at, m.rowid",
    )?;
    let rows = stmt
        .query_map([team_id], |r| {
            Ok(json!({
                "userId": r.get::<_, String>(0)?,
                "userType": r.get::<_, String>(1)?,
                "role": r.get::<_, Option<String>>(2)?,
                "joinedAt": r.get::<_, String>(3)?,
                "name": r.get::<_, Option<String>>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let description = required_str(params, "description")?;
    let location = required_str(params, "location")?;
    let start = required_timestamp(params, "startDate")?;
    let end = required_timestamp(params, "endDate")?;
    let deadline = required_timestamp(params, "registrationDeadline")?;
    if end < start {
        return Err(HandlerError::bad_params("endDate must not be before startDate"));
    }
    if deadline > end {
        return Err(HandlerError::bad_params(
            "registrationDeadline must not be after endDate",
        ));
    }
    let max_team_size = optional_i64(params, "maxTeamSize")?
        .ok_or_else(|| HandlerError::bad_params("missing maxTeamSize"))?;
    let min_team_size = optional_i64(params, "minTeamSize")?.unwrap_or(1);
    if min_team_size < 1 || max_team_size < min_team_size {
        return Err(HandlerError::bad_params(
            "team sizes must satisfy 1 <= minTeamSize <= maxTeamSize",
        ));
    }
    let organizer_type = required_str(params, "organizerType")?;
    one_of(&organizer_type, ORGANIZER_TYPES, "organizerType")?;
    let organizer_id = optional_str(params, "organizerId");
    match (organizer_type.as_str(), organizer_id.as_deref()) {
        ("university", _) => {}
        (kind, Some(id)) => require_row(ctx.conn, account_table(kind)?, id, "organizer")?,
        (_, None) => return Err(HandlerError::bad_params("missing organizerId")),
    }
    let status = optional_str(params, "status").unwrap_or_else(|| "upcoming".to_string());
    one_of(&status, STATUSES, "status")?;

    let id = new_id();
    let now = now_rfc3339();
    ctx.conn.execute(
        "INSERT INTO hackathons(id, name, description, rules, start_date, end_date, registration_deadline, location,
                                organizer_id, organizer_type, max_team_size, min_team_size, prizes, technologies,
                                status, website_url, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            name,
            description,
            optional_str(params, "rules"),
            rfc3339(start),
            rfc3339(end),
            rfc3339(deadline),
            location,
            organizer_id,
            organizer_type,
            max_team_size,
            min_team_size,
            optional_str(params, "prizes"),
            list_json(params, "technologies")?,
            status,
            optional_str(params, "websiteUrl"),
            now,
            now
        ],
    )?;
    tracing::info!(hackathon_id = %id, max_team_size, "hackathon created");
    Ok(json!({ "hackathonId": id }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let status = optional_str(params, "status").map(|s| s.to_lowercase());
    if let Some(s) = status.as_deref() {
        one_of(s, STATUSES, "status")?;
    }
    let organizer_type = optional_str(params, "organizerType").map(|s| s.to_lowercase());
    let search = optional_str(params, "search").map(|s| format!("%{}%", s.to_lowercase()));
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {HACKATHON_COLUMNS}
         FROM hackathons h
         WHERE (?1 IS NULL OR h.status = ?1)
           AND (?2 IS NULL OR h.organizer_type = ?2)
           AND (?3 IS NULL OR lower(h.name) LIKE ?3 OR lower(h.description) LIKE ?3 OR lower(h.location) LIKE ?3)
         ORDER BY h.start_date DESC"
    ))?;
    let hackathons = stmt
        .query_map((&status, &organizer_type, &search), hackathon_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "hackathons": hackathons }))
}

fn get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let hackathon_id = required_str(params, "hackathonId")?;
    let hackathon = ctx
        .conn
        .query_row(
            &format!("SELECT {HACKATHON_COLUMNS} FROM hackathons h WHERE h.id = ?"),
            [&hackathon_id],
            hackathon_from_row,
        )
        .optional()?
        .ok_or(HandlerError::NotFound("hackathon"))?;
    Ok(json!({ "hackathon": hackathon }))
}

fn update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let hackathon_id = required_str(params, "hackathonId")?;
    let window = load_window(ctx.conn, &hackathon_id)?;
    let status = optional_str(params, "status");
    if let Some(s) = status.as_deref() {
        one_of(s, STATUSES, "status")?;
    }
    let deadline = timestamp_param(params, "registrationDeadline")?.map(rfc3339);
    let max_team_size = optional_i64(params, "maxTeamSize")?;
    if max_team_size.is_some_and(|m| m < 1) {
        return Err(HandlerError::bad_params("maxTeamSize must be positive"));
    }
    if let Some(max) = max_team_size {
        let largest: i64 = ctx.conn.query_row(
            "SELECT COALESCE(MAX(n), 0) FROM (
                 SELECT COUNT(*) AS n FROM hackathon_team_members m
                 JOIN hackathon_teams t ON t.id = m.team_id
                 WHERE t.hackathon_id = ? GROUP BY m.team_id)",
            [&hackathon_id],
            |r| r.get(0),
        )?;
        if largest > max {
            return Err(HandlerError::conflict(format!(
                "a team already has {largest} members"
            )));
        }
    }
    ctx.conn.execute(
        "UPDATE hackathons
         SET status = COALESCE(?, status),
             registration_deadline = COALESCE(?, registration_deadline),
             max_team_size = COALESCE(?, max_team_size),
             updated_at = ?
         WHERE id = ?",
        rusqlite::params![status, deadline, max_team_size, now_rfc3339(), hackathon_id],
    )?;
    Ok(json!({
        "hackathonId": hackathon_id,
        "status": status.unwrap_or(window.status),
    }))
}

fn delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let hackathon_id = required_str(params, "hackathonId")?;
    require_row(ctx.conn, "hackathons", &hackathon_id, "hackathon")?;

    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM hackathon_team_members
         WHERE team_id IN (SELECT id FROM hackathon_teams WHERE hackathon_id = ?)",
        [&hackathon_id],
    )?;
    let teams = tx.execute(
        "DELETE FROM hackathon_teams WHERE hackathon_id = ?",
        [&hackathon_id],
    )?;
    tx.execute("DELETE FROM hackathons WHERE id = ?", [&hackathon_id])?;
    tx.commit()?;
    Ok(json!({ "hackathonId": hackathon_id, "teamsDeleted": teams }))
}

fn teams_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let hackathon_id = required_str(params, "hackathonId")?;
    let team_name = required_str(params, "teamName")?;
    let project_name = required_str(params, "projectName")?;
    let leader_id = required_str(params, "leaderId")?;
    let leader_type = required_str(params, "leaderType")?;
    require_member_account(ctx.conn, &leader_type, &leader_id)?;

    let window = load_window(ctx.conn, &hackathon_id)?;
    if !window.registration_open() {
        return Err(HandlerError::conflict(
            "Registration for this hackathon has closed",
        ));
    }
    let taken: Option<i64> = ctx
        .conn
        .query_row(
            "SELECT 1 FROM hackathon_teams WHERE hackathon_id = ? AND team_name = ?",
            (&hackathon_id, &team_name),
            |r| r.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(HandlerError::conflict("team name is already taken"));
    }

    let id = new_id();
    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO hackathon_teams(id, hackathon_id, team_name, project_name, project_description, technologies_used,
                                     leader_id, leader_type, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            hackathon_id,
            team_name,
            project_name,
            optional_str(params, "projectDescription"),
            list_json(params, "technologiesUsed")?,
            leader_id,
            leader_type,
            now,
            now
        ],
    )?;
    tx.execute(
        "INSERT INTO hackathon_team_members(id, team_id, user_id, user_type, role, joined_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (new_id(), &id, &leader_id, &leader_type, LEADER_ROLE, &now),
    )?;
    tx.commit()?;
    Ok(json!({ "teamId": id, "memberCount": 1 }))
}

fn teams_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let hackathon_id = required_str(params, "hackathonId")?;
    require_row(ctx.conn, "hackathons", &hackathon_id, "hackathon")?;
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {TEAM_COLUMNS}
         FROM hackathon_teams t
         WHERE t.hackathon_id = ?
         ORDER BY t.created_at, t.rowid"
    ))?;
    let teams = stmt
        .query_map([&hackathon_id], team_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teams": teams }))
}

fn teams_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let team_id = required_str(params, "teamId")?;
    let mut team = ctx
        .conn
        .query_row(
            &format!("SELECT {TEAM_COLUMNS} FROM hackathon_teams t WHERE t.id = ?"),
            [&team_id],
            team_from_row,
        )
        .optional()?
        .ok_or(HandlerError::NotFound("team"))?;
    team["members"] = json!(members(ctx.conn, &team_id)?);
    Ok(json!({ "team": team }))
}

fn teams_list_for_user(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let user_id = required_str(params, "userId")?;
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {TEAM_COLUMNS}
         FROM hackathon_teams t
         WHERE t.id IN (SELECT team_id FROM hackathon_team_members WHERE user_id = ?)
         ORDER BY t.created_at DESC"
    ))?;
    let teams = stmt
        .query_map([&user_id], team_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teams": teams }))
}

fn teams_add_member(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let team_id = required_str(params, "teamId")?;
    let user_id = required_str(params, "userId")?;
    let user_type = required_str(params, "userType")?;
    let role = optional_str(params, "role");
    require_member_account(ctx.conn, &user_type, &user_id)?;
    let (hackathon_id, _, _) = load_team_head(ctx.conn, &team_id)?;
    let window = load_window(ctx.conn, &hackathon_id)?;
    if !window.registration_open() {
        return Err(HandlerError::conflict(
            "Registration for this hackathon has closed",
        ));
    }

    let count: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM hackathon_team_members WHERE team_id = ?",
        [&team_id],
        |r| r.get(0),
    )?;
    if count >= window.max_team_size {
        return Err(HandlerError::conflict("Team is already at maximum capacity"));
    }
    let already: Option<i64> = ctx
        .conn
        .query_row(
            "SELECT 1 FROM hackathon_team_members WHERE team_id = ? AND user_id = ?",
            (&team_id, &user_id),
            |r| r.get(0),
        )
        .optional()?;
    if already.is_some() {
        return Err(HandlerError::conflict("User is already a member of this team"));
    }

    ctx.conn.execute(
        "INSERT INTO hackathon_team_members(id, team_id, user_id, user_type, role, joined_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (new_id(), &team_id, &user_id, &user_type, &role, now_rfc3339()),
    )?;
    Ok(json!({ "teamId": team_id, "memberCount": count + 1 }))
}

fn teams_remove_member(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let team_id = required_str(params, "teamId")?;
    let user_id = required_str(params, "userId")?;
    let (_, leader_id, _) = load_team_head(ctx.conn, &team_id)?;
    if leader_id == user_id {
        return Err(HandlerError::conflict(
            "Cannot remove the team leader. Transfer leadership first or delete the team.",
        ));
    }
    let removed = ctx.conn.execute(
        "DELETE FROM hackathon_team_members WHERE team_id = ? AND user_id = ?",
        (&team_id, &user_id),
    )?;
    if removed == 0 {
        return Err(HandlerError::NotFound("team member"));
    }
    Ok(json!({ "teamId": team_id, "removed": true }))
}

fn teams_submit(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let team_id = required_str(params, "teamId")?;
    let project_name = required_str(params, "projectName")?;
    let project_description = required_str(params, "projectDescription")?;
    let (hackathon_id, _, submitted) = load_team_head(ctx.conn, &team_id)?;
    if submitted {
        return Err(HandlerError::conflict(
            "Team has already submitted their project",
        ));
    }
    if !load_window(ctx.conn, &hackathon_id)?.submission_open() {
        return Err(HandlerError::conflict(
            "Submission deadline for this hackathon has passed",
        ));
    }

    let now = now_rfc3339();
    let technologies = optional_str_list(params, "technologiesUsed")?
        .map(|list| serde_json::to_string(&list).unwrap_or_else(|_| "[]".to_string()));
    ctx.conn.execute(
        "UPDATE hackathon_teams
         SET project_name = ?, project_description = ?,
             technologies_used = COALESCE(?, technologies_used),
             github_url = COALESCE(?, github_url), demo_url = COALESCE(?, demo_url),
             is_submitted = 1, submission_time = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            project_name,
            project_description,
            technologies,
            optional_str(params, "githubUrl"),
            optional_str(params, "demoUrl"),
            now,
            now,
            team_id
        ],
    )?;
    tracing::info!(team_id = %team_id, "hackathon project submitted");
    Ok(json!({ "teamId": team_id, "isSubmitted": true, "submissionTime": now }))
}

fn teams_upload_presentation(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let team_id = required_str(params, "teamId")?;
    let file_name = required_str(params, "fileName")?;
    let data = required_str(params, "dataBase64")?;
    let (hackathon_id, _, _) = load_team_head(ctx.conn, &team_id)?;

    let key = format!(
        "{hackathon_id}/teams/{team_id}/presentation/{}-{file_name}",
        epoch_millis()
    );
    let stored = store_upload(ctx, "hackathons", &key, &data)?;
    ctx.conn.execute(
        "UPDATE hackathon_teams SET presentation_url = ?, updated_at = ? WHERE id = ?",
        (&stored.url, now_rfc3339(), &team_id),
    )?;
    Ok(json!({ "presentationUrl": stored.url, "size": stored.size }))
}

fn teams_judge(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let team_id = required_str(params, "teamId")?;
    let score = required_f64(params, "score")?;
    if score < 0.0 {
        return Err(HandlerError::bad_params("score must not be negative"));
    }
    let feedback = optional_str(params, "feedback");
    let rank = optional_i64(params, "rank")?;
    if rank.is_some_and(|r| r < 1) {
        return Err(HandlerError::bad_params("rank must be 1 or more"));
    }
    load_team_head(ctx.conn, &team_id)?;
    ctx.conn.execute(
        "UPDATE hackathon_teams SET score = ?, feedback = ?, rank = ?, updated_at = ? WHERE id = ?",
        rusqlite::params![score, feedback, rank, now_rfc3339(), team_id],
    )?;
    Ok(json!({ "teamId": team_id, "score": score, "rank": rank }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "hackathons.create" => create,
        "hackathons.list" => list,
        "hackathons.get" => get,
        "hackathons.update" => update,
        "hackathons.delete" => delete,
        "hackathons.teams.create" => teams_create,
        "hackathons.teams.list" => teams_list,
        "hackathons.teams.get" => teams_get,
        "hackathons.teams.listForUser" => teams_list_for_user,
        "hackathons.teams.addMember" => teams_add_member,
        "hackathons.teams.removeMember" => teams_remove_member,
        "hackathons.teams.submit" => teams_submit,
        "hackathons.teams.uploadPresentation" => teams_upload_presentation,
        "hackathons.teams.judge" => teams_judge,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(deadline: &str, end: &str, status: &str) -> Window {
        Window {
            registration_deadline: deadline.to_string(),
            end_date: end.to_string(),
            status: status.to_string(),
            max_team_size: 4,
        }
    }

    #[test]
    fn completed_hackathons_take_no_registrations_or_submissions() {
        let open = window("2999-01-01T00:00:00Z", "2999-02-01T00:00:00Z", "upcoming");
        assert!(open.registration_open());
        assert!(open.submission_open());

        let done = window("2999-01-01T00:00:00Z", "2999-02-01T00:00:00Z", "completed");
        assert!(!done.registration_open());
        assert!(!done.submission_open());

        let late = window("2000-01-01T00:00:00Z", "2999-02-01T00:00:00Z", "ongoing");
        assert!(!late.registration_open());
        assert!(late.submission_open());
    }

    #[test]
    fn stored_lists_tolerate_bad_json() {
        assert_eq!(string_list(Some(r#"["rust","sqlite"]"#.to_string())), vec!["rust", "sqlite"]);
        assert!(string_list(Some("rust, sqlite".to_string())).is_empty());
        assert!(string_list(None).is_empty());
    }
}
