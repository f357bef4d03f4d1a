use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::ipc::error::{ok, HandlerError};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::storage::{self, StoredObject};

pub type HandlerResult = Result<serde_json::Value, HandlerError>;
pub type HandlerFn = fn(&Ctx<'_>, &serde_json::Value) -> HandlerResult;

/// Runs a handler body against the open workspace and shapes the reply.
pub fn dispatch(state: &mut AppState, req: &Request, f: HandlerFn) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_deref()) else {
        return HandlerError::NoWorkspace.response(&req.id);
    };
    let ctx = Ctx {
        conn,
        workspace,
        config: &state.config,
    };
    match f(&ctx, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::warn!(method = %req.method, code = error.code(), "{error}");
            error.response(&req.id)
        }
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` (UTC) or a bare date, which
/// means the end of that day.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerError> {
    match params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => Err(HandlerError::bad_params(format!("{key} must not be empty"))),
        None => Err(HandlerError::bad_params(format!("missing {key}"))),
    }
}

/// Like `required_str` but keeps surrounding whitespace (passwords).
pub fn required_secret(params: &serde_json::Value, key: &str) -> Result<String, HandlerError> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => Err(HandlerError::bad_params(format!("{key} must not be empty"))),
        None => Err(HandlerError::bad_params(format!("missing {key}"))),
    }
}

/// Free text kept exactly as sent; whitespace-only counts as absent.
pub fn optional_text(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// First non-empty string among several accepted aliases.
pub fn str_alias(params: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| optional_str(params, k))
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerError> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerError::bad_params(format!("{key} must be a boolean"))),
    }
}

pub fn optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerError> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| HandlerError::bad_params(format!("{key} must be a number"))),
    }
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerError> {
    optional_f64(params, key)?.ok_or_else(|| HandlerError::bad_params(format!("missing {key}")))
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerError> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerError::bad_params(format!("{key} must be an integer"))),
    }
}

pub fn optional_str_list(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Vec<String>>, HandlerError> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerError::bad_params(format!("{key} must contain strings")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(HandlerError::bad_params(format!("{key} must be an array"))),
    }
}

/// Validates an enum-like string field against its allowed values.
pub fn one_of(value: &str, allowed: &[&str], key: &str) -> Result<(), HandlerError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(HandlerError::bad_params(format!(
            "{key} must be one of: {}",
            allowed.join(", ")
        )))
    }
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerError> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn require_row(
    conn: &Connection,
    table: &str,
    id: &str,
    entity: &'static str,
) -> Result<(), HandlerError> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerError::NotFound(entity))
    }
}

/// Decodes a base64 upload and stores it in `bucket`. Bad payloads and size
/// violations are the caller's fault; write failures are not.
pub fn store_upload(
    ctx: &Ctx<'_>,
    bucket: &str,
    key: &str,
    data: &str,
) -> Result<StoredObject, HandlerError> {
    let bytes = storage::decode_upload(data).map_err(|e| HandlerError::bad_params(format!("{e:#}")))?;
    let limit = ctx.config.storage.max_upload_bytes;
    if bytes.is_empty() {
        return Err(HandlerError::bad_params("upload is empty"));
    }
    if bytes.len() > limit {
        return Err(HandlerError::bad_params(format!(
            "upload of {} bytes exceeds limit of {limit}",
            bytes.len()
        )));
    }
    storage::put_object(ctx.workspace, bucket, key, &bytes, limit).map_err(HandlerError::Io)
}

pub fn timestamp_param(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<DateTime<Utc>>, HandlerError> {
    match optional_str(params, key) {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| HandlerError::bad_params(format!("{key} is not a valid date"))),
    }
}

pub fn required_timestamp(
    params: &serde_json::Value,
    key: &str,
) -> Result<DateTime<Utc>, HandlerError> {
    timestamp_param(params, key)?.ok_or_else(|| HandlerError::bad_params(format!("missing {key}")))
}

pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn current_year() -> i32 {
    Utc::now().year()
}

pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Public reference like `GRV-123456`: the last six digits of the epoch millis.
pub fn public_ref(prefix: &str) -> String {
    let millis = epoch_millis().rem_euclid(1_000_000);
    format!("{prefix}-{millis:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_date_means_end_of_day() {
        let ts = parse_timestamp("2025-03-01").expect("date");
        assert_eq!(ts.to_rfc3339(), "2025-03-01T23:59:59+00:00");
        assert!(parse_timestamp("2025-03-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2025-03-01T10:00").is_some());
        assert!(parse_timestamp("next tuesday").is_none());
    }

    #[test]
    fn required_str_rejects_blank() {
        let params = json!({ "name": "  ", "title": " Lab 1 " });
        assert!(required_str(&params, "name").is_err());
        assert!(required_str(&params, "missing").is_err());
        assert_eq!(required_str(&params, "title").expect("title"), "Lab 1");
    }

    #[test]
    fn typed_optionals_reject_wrong_shapes() {
        let params = json!({ "flag": "yes", "n": 3, "list": ["a", " b "] });
        assert!(optional_bool(&params, "flag").is_err());
        assert_eq!(optional_i64(&params, "n").expect("n"), Some(3));
        assert_eq!(optional_f64(&params, "absent").expect("absent"), None);
        assert_eq!(
            optional_str_list(&params, "list").expect("list"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn optional_text_keeps_whitespace() {
        let params = json!({ "body": "\n  two words \n", "blank": " \n " });
        assert_eq!(optional_text(&params, "body").as_deref(), Some("\n  two words \n"));
        assert_eq!(optional_text(&params, "blank"), None);
    }

    #[test]
    fn public_ref_has_six_digits() {
        let r = public_ref("GRV");
        assert!(r.starts_with("GRV-"));
        assert_eq!(r.len(), 10);
        assert!(r[4..].chars().all(|c| c.is_ascii_digit()));
    }
}
