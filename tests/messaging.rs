mod common;

use base64::Engine as _;
use common::Sidecar;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn conversation_between_student_and_faculty() {
    let mut s = Sidecar::start();
    let faculty = s.create_faculty("Dr. Shah", "shah@college.edu", "AIML");
    let student = s.create_student("Neha", "neha@college.edu", "AIML", "3");
    let outsider = s.create_student("Omar", "omar@college.edu", "AIML", "3");

    let opened = s.ok(
        "conversations.open",
        json!({ "studentId": student, "facultyId": faculty }),
    );
    assert_eq!(opened["created"], json!(true));
    let conv = opened["conversationId"].as_str().expect("id").to_string();

    let reopened = s.ok(
        "conversations.open",
        json!({ "studentId": student, "facultyId": faculty }),
    );
    assert_eq!(reopened["created"], json!(false));
    assert_eq!(reopened["conversationId"], json!(conv));

    let sent = s.ok(
        "messages.send",
        json!({ "conversationId": conv, "senderId": student, "content": "Is the lab on Friday?" }),
    );
    assert_eq!(sent["receiverId"], json!(faculty));
    s.ok(
        "messages.send",
        json!({ "conversationId": conv, "senderId": faculty, "content": "Yes, 10am." }),
    );

    let (code, status) = s.fail(
        "messages.send",
        json!({ "conversationId": conv, "senderId": outsider, "content": "hi" }),
    );
    assert_eq!((code.as_str(), status), ("forbidden", 403));
    let (code, _) = s.fail(
        "messages.send",
        json!({ "conversationId": conv, "senderId": student }),
    );
    assert_eq!(code, "bad_params");

    let thread = s.ok("messages.list", json!({ "conversationId": conv }));
    let messages = thread["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["senderId"], json!(student));
    assert_eq!(messages[1]["content"], json!("Yes, 10am."));

    let listed = s.ok("conversations.list", json!({ "userId": student }));
    assert_eq!(listed["conversations"][0]["counterpartName"], json!("Dr. Shah"));
    assert_eq!(listed["conversations"][0]["lastMessage"], json!("Yes, 10am."));
}

#[test]
fn attachments_are_stored_under_the_conversation() {
    let mut s = Sidecar::start();
    let faculty = s.create_faculty("Dr. Shah", "shah@college.edu", "AIML");
    let student = s.create_student("Neha", "neha@college.edu", "AIML", "3");
    let conv = s.ok(
        "conversations.open",
        json!({ "studentId": student, "facultyId": faculty }),
    )["conversationId"]
        .as_str()
        .expect("id")
        .to_string();

    let data = base64::engine::general_purpose::STANDARD.encode(b"lab notes");
    let uploaded = s.ok(
        "messages.uploadAttachment",
        json!({ "conversationId": conv, "fileName": "notes.txt", "dataBase64": data }),
    );
    let url = uploaded["url"].as_str().expect("url").to_string();
    assert!(url.starts_with(&format!("storage/chat_attachments/{conv}/")));
    assert!(url.ends_with("-notes.txt"));
    let on_disk = std::fs::read(s.workspace.path().join(&url)).expect("stored file");
    assert_eq!(on_disk, b"lab notes");

    s.ok(
        "messages.send",
        json!({ "conversationId": conv, "senderId": student, "attachmentUrl": url, "messageType": "file" }),
    );

    let (code, _) = s.fail(
        "messages.uploadAttachment",
        json!({ "conversationId": conv, "fileName": "x.bin", "dataBase64": "***" }),
    );
    assert_eq!(code, "bad_params");
}
