mod common;

use common::Sidecar;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

#[test]
fn requests_before_workspace_select_are_rejected() {
    let exe = env!("CARGO_BIN_EXE_eduvisiond");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn eduvisiond");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let mut roundtrip = |line: &str| -> serde_json::Value {
        writeln!(stdin, "{line}").expect("write");
        stdin.flush().expect("flush");
        let mut out = String::new();
        reader.read_line(&mut out).expect("read");
        serde_json::from_str(out.trim()).expect("json")
    };

    let health = roundtrip(r#"{"id":"1","method":"health","params":{}}"#);
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["workspacePath"].is_null());

    let blocked = roundtrip(r#"{"id":"2","method":"students.list","params":{}}"#);
    assert_eq!(blocked["error"]["code"], json!("no_workspace"));
    assert_eq!(blocked["error"]["status"], json!(412));

    let garbage = roundtrip("{not json");
    assert_eq!(garbage["ok"], json!(false));
    assert_eq!(garbage["error"]["code"], json!("bad_json"));
    assert_eq!(garbage["error"]["status"], json!(400));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let mut s = Sidecar::start();

    let health = s.ok("health", json!({}));
    assert!(health["workspacePath"].is_string());

    let unknown = s.request("grades.magic", json!({}));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));
    assert_eq!(unknown["error"]["status"], json!(501));

    let missing = s.request("students.get", json!({}));
    assert_eq!(missing["error"]["code"], json!("bad_params"));

    for method in [
        "students.list",
        "faculty.list",
        "classes.list",
        "admin.registrations.list",
        "announcements.list",
        "grievances.list",
        "serviceRequests.list",
        "leave.list",
        "email.outbox.list",
    ] {
        let _ = s.ok(method, json!({}));
    }

    let faculty_id = s.create_faculty("Dr. Mehta", "mehta@college.edu", "Computer Engineering");
    let _ = s.ok("assignments.list", json!({ "facultyId": faculty_id }));
    let _ = s.ok("attendance.sessions.listForFaculty", json!({ "facultyId": faculty_id }));
    let _ = s.ok("studyGroups.listForFaculty", json!({ "facultyId": faculty_id }));
    let _ = s.ok("conversations.list", json!({ "userId": faculty_id }));
    let _ = s.ok("notifications.list", json!({ "recipientId": faculty_id }));

    let inspect = s.ok("identity.inspectEmail", json!({ "email": "2023cse042@college.edu" }));
    assert_eq!(inspect["kind"], json!("student"));
    assert_eq!(inspect["studentInfo"]["prn"], json!("2023CSE042"));
    assert_eq!(inspect["studentInfo"]["department"], json!("CSE"));
}
