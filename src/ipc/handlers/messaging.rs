use rusqlite::OptionalExtension;
use serde_json::json;

use crate::ipc::error::HandlerError;
use crate::ipc::helpers::{
    dispatch, epoch_millis, new_id, now_rfc3339, one_of, optional_str, require_row, required_str,
    store_upload, str_alias, HandlerFn, HandlerResult,
};
use crate::ipc::types::{AppState, Ctx, Request};

const MESSAGE_TYPES: &[&str] = &["text", "image", "file"];

fn participants(ctx: &Ctx<'_>, conversation_id: &str) -> Result<(String, String), HandlerError> {
    ctx.conn
        .query_row(
            "SELECT student_id, faculty_id FROM conversations WHERE id = ?",
            [conversation_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or(HandlerError::NotFound("conversation"))
}

fn conversations_open(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let faculty_id = required_str(params, "facultyId")?;
    require_row(ctx.conn, "students", &student_id, "student")?;
    require_row(ctx.conn, "faculty", &faculty_id, "faculty")?;

    let existing: Option<String> = ctx
        .conn
        .query_row(
            "SELECT id FROM conversations WHERE student_id = ? AND faculty_id = ?",
            (&student_id, &faculty_id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(json!({ "conversationId": id, "created": false }));
    }

    let id = new_id();
    ctx.conn.execute(
        "INSERT INTO conversations(id, student_id, faculty_id, created_at) VALUES(?, ?, ?, ?)",
        (&id, &student_id, &faculty_id, now_rfc3339()),
    )?;
    Ok(json!({ "conversationId": id, "created": true }))
}

fn conversations_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let user_id = required_str(params, "userId")?;
    let mut stmt = ctx.conn.prepare(
        "SELECT c.id, c.student_id, s.name, c.faculty_id, f.name, c.created_at, c.last_message_at,
                (SELECT m.content FROM messages m
                 WHERE m.conversation_id = c.id
                 ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1) AS last_message
         FROM conversations c
         LEFT JOIN students s ON s.id = c.student_id
         LEFT JOIN faculty f ON f.id = c.faculty_id
         WHERE c.student_id = ?1 OR c.faculty_id = ?1
         ORDER BY COALESCE(c.last_message_at, c.created_at) DESC",
    )?;
    let conversations = stmt
        .query_map([&user_id], |r| {
            let student_id: String = r.get(1)?;
            let student_name: Option<String> = r.get(2)?;
            let faculty_id: String = r.get(3)?;
            let faculty_name: Option<String> = r.get(4)?;
            let (counterpart_id, counterpart_name) = if student_id == user_id {
                (faculty_id.clone(), faculty_name.clone())
            } else {
                (student_id.clone(), student_name.clone())
            };
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": student_id,
                "studentName": student_name,
                "facultyId": faculty_id,
                "facultyName": faculty_name,
                "counterpartId": counterpart_id,
                "counterpartName": counterpart_name,
                "createdAt": r.get::<_, String>(5)?,
                "lastMessageAt": r.get::<_, Option<String>>(6)?,
                "lastMessage": r.get::<_, Option<String>>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "conversations": conversations }))
}

fn messages_send(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let conversation_id = required_str(params, "conversationId")?;
    let sender_id = required_str(params, "senderId")?;
    let content = optional_str(params, "content");
    let attachment_url = str_alias(params, &["attachmentUrl", "fileUrl"]);
    let message_type = optional_str(params, "messageType").unwrap_or_else(|| "text".to_string());
    one_of(&message_type, MESSAGE_TYPES, "messageType")?;
    if content.is_none() && attachment_url.is_none() {
        return Err(HandlerError::bad_params("content or attachmentUrl is required"));
    }

    let (student_id, faculty_id) = participants(ctx, &conversation_id)?;
    let receiver_id = if sender_id == student_id {
        faculty_id
    } else if sender_id == faculty_id {
        student_id
    } else {
        return Err(HandlerError::Forbidden(
            "sender is not part of this conversation".to_string(),
        ));
    };

    let id = new_id();
    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO messages(id, conversation_id, sender_id, receiver_id, content, message_type, attachment_url, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            conversation_id,
            sender_id,
            receiver_id,
            content,
            message_type,
            attachment_url,
            now
        ],
    )?;
    tx.execute(
        "UPDATE conversations SET last_message_at = ? WHERE id = ?",
        (&now, &conversation_id),
    )?;
    tx.commit()?;
    Ok(json!({
        "messageId": id,
        "receiverId": receiver_id,
        "createdAt": now,
    }))
}

fn messages_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let conversation_id = required_str(params, "conversationId")?;
    participants(ctx, &conversation_id)?;
    let mut stmt = ctx.conn.prepare(
        "SELECT id, sender_id, receiver_id, content, message_type, attachment_url, created_at
         FROM messages
         WHERE conversation_id = ?
         ORDER BY created_at, rowid",
    )?;
    let messages = stmt
        .query_map([&conversation_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "senderId": r.get::<_, String>(1)?,
                "receiverId": r.get::<_, String>(2)?,
                "content": r.get::<_, Option<String>>(3)?,
                "messageType": r.get::<_, String>(4)?,
                "attachmentUrl": r.get::<_, Option<String>>(5)?,
                "createdAt": r.get::<_, String>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "messages": messages }))
}

fn upload_attachment(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let conversation_id = required_str(params, "conversationId")?;
    let file_name = required_str(params, "fileName")?;
    let data = required_str(params, "dataBase64")?;
    participants(ctx, &conversation_id)?;

    let key = format!("{conversation_id}/{}-{file_name}", epoch_millis());
    let stored = store_upload(ctx, "chat_attachments", &key, &data)?;
    Ok(json!({
        "url": stored.url,
        "path": stored.path.to_string_lossy(),
        "size": stored.size,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: HandlerFn = match req.method.as_str() {
        "conversations.open" => conversations_open,
        "conversations.list" => conversations_list,
        "messages.send" => messages_send,
        "messages.list" => messages_list,
        "messages.uploadAttachment" => upload_attachment,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
