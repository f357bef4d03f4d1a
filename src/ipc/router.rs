use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

/// Tried in order; the first handler that owns the method answers.
const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::sessions::try_handle,
    handlers::registration::try_handle,
    handlers::directory::try_handle,
    handlers::classes::try_handle,
    handlers::assignments::try_handle,
    handlers::attendance::try_handle,
    handlers::messaging::try_handle,
    handlers::announcements::try_handle,
    handlers::grievances::try_handle,
    handlers::service_requests::try_handle,
    handlers::leave::try_handle,
    handlers::study_groups::try_handle,
    handlers::hackathons::try_handle,
    handlers::scholarships::try_handle,
    handlers::mentorship::try_handle,
    handlers::notifications::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
