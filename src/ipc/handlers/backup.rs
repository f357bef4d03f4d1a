use std::path::PathBuf;

use serde_json::json;

use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok, HandlerError};
use crate::ipc::helpers::optional_str;
use crate::ipc::types::{AppState, Request};

/// `workspacePath` param, else the selected workspace.
fn target_workspace(state: &AppState, req: &Request) -> Option<PathBuf> {
    optional_str(&req.params, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
}

fn handle_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(out_path) = optional_str(&req.params, "outPath") else {
        return HandlerError::bad_params("missing outPath").response(&req.id);
    };
    let Some(workspace_path) = target_workspace(state, req) else {
        return HandlerError::NoWorkspace.response(&req.id);
    };

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!("wal checkpoint before export failed: {e}");
        }
    }

    let export = match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %out_path, "workspace export failed: {e:#}");
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": out_path })),
            );
        }
    };
    tracing::info!(
        path = %out_path,
        entries = export.entry_count,
        "workspace bundle exported"
    );

    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

fn handle_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(in_path) = optional_str(&req.params, "inPath") else {
        return HandlerError::bad_params("missing inPath").response(&req.id);
    };
    let Some(workspace_path) = target_workspace(state, req) else {
        return HandlerError::NoWorkspace.response(&req.id);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // The database file is about to be replaced underneath the connection.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %in_path, "workspace import failed: {e:#}");
            // A failed import never swaps the database, so the old one reopens.
            if let Some(previous) = state.workspace.as_deref() {
                state.db = db::open_db(previous).ok();
            }
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": in_path })),
            );
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            tracing::info!(
                workspace = %workspace_path.display(),
                format = %import.bundle_format_detected,
                files = import.files_restored,
                "workspace bundle imported"
            );
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected,
                    "filesRestored": import.files_restored,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_workspace_bundle(state, req)),
        _ => None,
    }
}
