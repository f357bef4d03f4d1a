use serde_json::json;
use thiserror::Error;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
        "status": status_for_code(code),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Reply for a line that is not a request; there is no id to echo.
pub fn bad_json(message: &str) -> serde_json::Value {
    json!({
        "ok": false,
        "error": {
            "code": "bad_json",
            "message": message,
            "status": status_for_code("bad_json"),
        }
    })
}

/// HTTP-style status carried next to every wire error code.
pub fn status_for_code(code: &str) -> u16 {
    match code {
        "bad_params" | "bad_json" => 400,
        "unauthorized" => 401,
        "forbidden" | "geofence_failed" | "face_unverified" => 403,
        "not_found" => 404,
        "conflict" => 409,
        "no_workspace" => 412,
        "not_implemented" => 501,
        _ => 500,
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    BadParams(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("outside geo-fence: {distance}m from session location (radius {radius}m)")]
    GeofenceFailed { distance: i64, radius: f64 },

    #[error("face verification is required for this session")]
    FaceUnverified,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error("{0:#}")]
    Io(anyhow::Error),

    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParams(_) => "bad_params",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::GeofenceFailed { .. } => "geofence_failed",
            Self::FaceUnverified => "face_unverified",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::NoWorkspace => "no_workspace",
            Self::Db(_) => "db_query_failed",
            Self::Io(_) => "io_failed",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> u16 {
        status_for_code(self.code())
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::GeofenceFailed { distance, radius } => {
                Some(json!({ "distance": distance, "radius": radius }))
            }
            _ => None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        let details = self.details();
        err(id, self.code(), self.to_string(), details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_carries_http_status() {
        let body = HandlerError::conflict("email already registered").response("7");
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["error"]["code"], json!("conflict"));
        assert_eq!(body["error"]["status"], json!(409));
        assert_eq!(body["error"]["message"], json!("email already registered"));
    }

    #[test]
    fn geofence_failure_exposes_distance() {
        let e = HandlerError::GeofenceFailed {
            distance: 250,
            radius: 100.0,
        };
        assert_eq!(e.status(), 403);
        let body = e.response("1");
        assert_eq!(body["error"]["details"]["distance"], json!(250));
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(HandlerError::NotFound("assignment").to_string(), "assignment not found");
        assert_eq!(status_for_code("not_found"), 404);
        assert_eq!(status_for_code("db_open_failed"), 500);
    }
}
