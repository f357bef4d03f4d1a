use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::directory::{account_table, checked_password, hash, load_user};
use crate::auth;
use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, now_rfc3339, parse_timestamp, required_secret, required_str, str_alias,
    HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

fn role_param(params: &serde_json::Value) -> Result<String, HandlerError> {
    let role = str_alias(params, &["role", "userType"])
        .ok_or_else(|| HandlerError::bad_params("missing role"))?;
    account_table(&role)?;
    Ok(role)
}

/// Emails are matched case-insensitively; anything else is a PRN or an
/// employee id depending on the role.
fn find_account(
    conn: &Connection,
    role: &str,
    identifier: &str,
) -> Result<Option<(String, Option<String>)>, HandlerError> {
    let sql = match (role, identifier.contains('@')) {
        ("student", true) | ("faculty", true) => {
            format!("SELECT id, password_hash FROM {} WHERE email = ?", account_table(role)?)
        }
        ("student", false) => "SELECT id, password_hash FROM students WHERE prn = ?".to_string(),
        _ => "SELECT id, password_hash FROM faculty WHERE employee_id = ?".to_string(),
    };
    let key = if identifier.contains('@') {
        identifier.to_ascii_lowercase()
    } else {
        identifier.to_ascii_uppercase()
    };
    Ok(conn
        .query_row(&sql, [&key], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?)
}

fn login(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let identifier = str_alias(params, &["identifier", "email"])
        .ok_or_else(|| HandlerError::bad_params("missing identifier"))?;
    let password = required_secret(params, "password")?;
    let role = role_param(params)?;

    let account = find_account(ctx.conn, &role, &identifier)?;
    let stored = account.as_ref().and_then(|(_, hash)| hash.as_deref());
    let verified = auth::verify_login(&password, stored);
    let user_id = match account {
        Some((id, Some(_))) if verified => id,
        _ => {
            tracing::info!(role = %role, "login rejected");
            return Err(HandlerError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }
    };

    let now = Utc::now();
    ctx.conn
        .execute("DELETE FROM sessions WHERE expires_at <= ?", [now_rfc3339()])?;

    let token = auth::new_session_token();
    let expires_at = (now + Duration::hours(ctx.config.auth.session_ttl_hours))
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    ctx.conn.execute(
        "INSERT INTO sessions(token_hash, user_id, role, created_at, expires_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            auth::token_digest(&token),
            &user_id,
            &role,
            now_rfc3339(),
            &expires_at,
        ),
    )?;
    let user = load_user(ctx.conn, &role, &user_id)?.ok_or(HandlerError::NotFound("user"))?;
    tracing::info!(user_id = %user_id, role = %role, "login succeeded");
    Ok(json!({ "token": token, "expiresAt": expires_at, "user": user }))
}

fn session(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let token = required_str(params, "token")?;
    let digest = auth::token_digest(&token);
    let row: Option<(String, String, String)> = ctx
        .conn
        .query_row(
            "SELECT user_id, role, expires_at FROM sessions WHERE token_hash = ?",
            [&digest],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((user_id, role, expires_at)) = row else {
        return Err(HandlerError::Unauthorized("session not found".to_string()));
    };
    let expired = parse_timestamp(&expires_at).map_or(true, |t| t <= Utc::now());
    if expired {
        ctx.conn
            .execute("DELETE FROM sessions WHERE token_hash = ?", [&digest])?;
        return Err(HandlerError::Unauthorized("session expired".to_string()));
    }
    let user = load_user(ctx.conn, &role, &user_id)?
        .ok_or_else(|| HandlerError::Unauthorized("account no longer exists".to_string()))?;
    Ok(json!({ "user": user, "expiresAt": expires_at }))
}

fn logout(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let token = required_str(params, "token")?;
    let revoked = ctx.conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?",
        [auth::token_digest(&token)],
    )?;
    Ok(json!({ "revoked": revoked > 0 }))
}

fn change_password(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let role = role_param(params)?;
    let table = account_table(&role)?;
    let user_id = required_str(params, "userId")?;
    let current = required_secret(params, "currentPassword")?;
    let new_password = checked_password(params, "newPassword")?;

    let stored: Option<Option<String>> = ctx
        .conn
        .query_row(
            &format!("SELECT password_hash FROM {table} WHERE id = ?"),
            [&user_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(stored) = stored else {
        return Err(HandlerError::NotFound("user"));
    };
    if !stored.is_some_and(|h| auth::verify_password(&current, &h)) {
        return Err(HandlerError::Unauthorized(
            "current password is incorrect".to_string(),
        ));
    }

    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        &format!("UPDATE {table} SET password_hash = ?, updated_at = ? WHERE id = ?"),
        (hash(&new_password)?, now_rfc3339(), &user_id),
    )?;
    let revoked = tx.execute(
        "DELETE FROM sessions WHERE user_id = ? AND role = ?",
        (&user_id, &role),
    )?;
    tx.commit()?;
    tracing::info!(user_id = %user_id, revoked, "password changed");
    Ok(json!({ "ok": true, "sessionsRevoked": revoked }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "auth.login" => login,
        "auth.session" => session,
        "auth.logout" => logout,
        "auth.changePassword" => change_password,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
