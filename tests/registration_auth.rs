mod common;

use common::Sidecar;
use pretty_assertions::assert_eq;
use serde_json::json;

fn submit_student(s: &mut Sidecar, email: &str) -> serde_json::Value {
    s.ok(
        "registration.submit",
        json!({
            "email": email,
            "name": "Riya Patil",
            "field": "Engineering",
            "course": "B.Tech",
            "department": "Computer Science",
            "userType": "student",
            "year": "2",
            "mobile": "9800000000",
        }),
    )
}

#[test]
fn student_registration_is_approved_and_can_log_in() {
    let mut s = Sidecar::start();

    let submitted = submit_student(&mut s, "2024cse017@college.edu");
    let reg_id = submitted["pendingRegistrationId"].as_str().expect("id").to_string();
    assert_eq!(submitted["requiresApproval"], json!(true));

    let again = submit_student(&mut s, "2024CSE017@college.edu");
    assert_eq!(again["alreadySubmitted"], json!(true));
    assert_eq!(again["pendingRegistrationId"], json!(reg_id));

    let pending = s.ok("admin.registrations.list", json!({ "status": "pending_approval" }));
    assert_eq!(pending["registrations"].as_array().map(Vec::len), Some(1));
    assert_eq!(pending["registrations"][0]["department"], json!("CSE"));
    assert_eq!(pending["registrations"][0]["year"], json!("2nd Year"));

    let approved = s.ok(
        "admin.registrations.review",
        json!({ "id": reg_id, "action": "approve" }),
    );
    assert_eq!(approved["role"], json!("student"));
    assert_eq!(approved["prn"], json!("2024CSE017"));
    let password = approved["temporaryPassword"]
        .as_str()
        .expect("generated password")
        .to_string();

    let (code, status) = s.fail(
        "admin.registrations.review",
        json!({ "id": reg_id, "action": "reject" }),
    );
    assert_eq!((code.as_str(), status), ("conflict", 409));

    let outbox = s.ok("email.outbox.list", json!({ "status": "queued" }));
    let emails = outbox["emails"].as_array().expect("emails");
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0]["to"], json!("2024cse017@college.edu"));
    assert!(emails[0]["body"].as_str().unwrap_or_default().contains(&password));

    let email_id = emails[0]["id"].as_str().expect("email id").to_string();
    let sent = s.ok("email.outbox.markSent", json!({ "id": email_id }));
    assert_eq!(sent["status"], json!("sent"));
    let (code, _) = s.fail("email.outbox.markSent", json!({ "id": email_id }));
    assert_eq!(code, "conflict");

    let login = s.ok(
        "auth.login",
        json!({ "identifier": "2024cse017", "password": password, "role": "student" }),
    );
    let token = login["token"].as_str().expect("token").to_string();
    assert_eq!(token.len(), 64);
    assert_eq!(login["user"]["prn"], json!("2024CSE017"));
    assert_eq!(login["user"]["role"], json!("student"));

    let session = s.ok("auth.session", json!({ "token": token }));
    assert_eq!(session["user"]["email"], json!("2024cse017@college.edu"));

    let user_id = approved["userId"].as_str().expect("user id").to_string();
    let changed = s.ok(
        "auth.changePassword",
        json!({
            "role": "student",
            "userId": user_id,
            "currentPassword": password,
            "newPassword": "a-better-secret",
        }),
    );
    assert_eq!(changed["sessionsRevoked"], json!(1));
    let (code, status) = s.fail("auth.session", json!({ "token": token }));
    assert_eq!((code.as_str(), status), ("unauthorized", 401));

    let (code, _) = s.fail(
        "registration.submit",
        json!({
            "email": "2024cse017@college.edu",
            "name": "Riya Patil",
            "field": "Engineering",
            "course": "B.Tech",
            "department": "CSE",
            "userType": "student",
            "year": "2",
        }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn rejected_registration_can_be_resubmitted() {
    let mut s = Sidecar::start();

    let submitted = s.ok(
        "registration.submit",
        json!({
            "email": "a.kulkarni@college.edu",
            "name": "Anil Kulkarni",
            "field": "Engineering",
            "course": "Networks",
            "department": "Cyber Security",
            "userType": "faculty",
        }),
    );
    let reg_id = submitted["pendingRegistrationId"].as_str().expect("id").to_string();

    let rejected = s.ok(
        "admin.registrations.review",
        json!({ "id": reg_id, "action": "reject", "rejectionReason": "Missing documents" }),
    );
    assert_eq!(rejected["status"], json!("rejected"));

    let status = s.ok("registration.status", json!({ "email": "a.kulkarni@college.edu" }));
    assert_eq!(status["registration"]["status"], json!("rejected"));
    assert_eq!(status["registration"]["rejectionReason"], json!("Missing documents"));

    let resubmitted = s.ok(
        "registration.submit",
        json!({
            "email": "a.kulkarni@college.edu",
            "name": "Anil Kulkarni",
            "field": "Engineering",
            "course": "Networks",
            "department": "Cyber Security",
            "userType": "faculty",
        }),
    );
    assert_eq!(resubmitted["pendingRegistrationId"], json!(reg_id));

    let approved = s.ok(
        "admin.registrations.review",
        json!({ "id": reg_id, "action": "approve", "password": "chosen-by-admin" }),
    );
    assert_eq!(approved["employeeId"], json!("EMP0001"));
    assert!(approved.get("temporaryPassword").is_none());

    let login = s.ok(
        "auth.login",
        json!({ "identifier": "emp0001", "password": "chosen-by-admin", "role": "faculty" }),
    );
    assert_eq!(login["user"]["department"], json!("CYBER"));

    let outbox = s.ok("email.outbox.list", json!({}));
    assert_eq!(outbox["emails"].as_array().map(Vec::len), Some(2));
}

#[test]
fn bad_credentials_are_indistinguishable() {
    let mut s = Sidecar::start();
    s.create_student("Om Joshi", "om@college.edu", "CSE", "1");

    let wrong_password = s.request(
        "auth.login",
        json!({ "identifier": "om@college.edu", "password": "nope-nope", "role": "student" }),
    );
    let unknown_user = s.request(
        "auth.login",
        json!({ "identifier": "ghost@college.edu", "password": "nope-nope", "role": "student" }),
    );
    assert_eq!(wrong_password["error"], unknown_user["error"]);
    assert_eq!(wrong_password["error"]["status"], json!(401));
    assert_eq!(wrong_password["error"]["message"], json!("Invalid credentials"));

    let ok = s.ok(
        "auth.login",
        json!({ "email": "OM@college.edu", "password": "student-pass-1", "role": "student" }),
    );
    let token = ok["token"].as_str().expect("token").to_string();
    let out = s.ok("auth.logout", json!({ "token": token }));
    assert_eq!(out["revoked"], json!(true));
    let (code, _) = s.fail("auth.session", json!({ "token": token }));
    assert_eq!(code, "unauthorized");
}

const JPEG_B64: &str = "/9j/4AAQSkZJRg==";

#[test]
fn face_photos_are_stored_for_registrations_and_accounts() {
    let mut s = Sidecar::start();

    let (code, status) = s.fail(
        "registration.submit",
        json!({
            "email": "2024cse021@college.edu",
            "name": "Neha Rao",
            "field": "Engineering",
            "course": "B.Tech",
            "department": "CSE",
            "userType": "student",
            "year": "2",
            "photoBase64": "not base64 at all!",
        }),
    );
    assert_eq!((code.as_str(), status), ("bad_params", 400));
    let nothing = s.ok("registration.status", json!({ "email": "2024cse021@college.edu" }));
    assert!(nothing["registration"].is_null());

    let submitted = s.ok(
        "registration.submit",
        json!({
            "email": "2024cse021@college.edu",
            "name": "Neha Rao",
            "field": "Engineering",
            "course": "B.Tech",
            "department": "CSE",
            "userType": "student",
            "year": "2",
            "photoBase64": format!("data:image/jpeg;base64,{JPEG_B64}"),
        }),
    );
    let first_url = submitted["faceUrl"].as_str().expect("faceUrl").to_string();
    assert!(first_url.starts_with("storage/faces/registration_2024cse021_"));
    assert!(s.workspace.path().join(&first_url).is_file());

    let updated = s.ok(
        "registration.updateFace",
        json!({ "email": "2024CSE021@college.edu", "photoBase64": JPEG_B64 }),
    );
    let second_url = updated["faceUrl"].as_str().expect("faceUrl").to_string();
    let status = s.ok("registration.status", json!({ "email": "2024cse021@college.edu" }));
    assert_eq!(status["registration"]["faceUrl"], json!(second_url));
    let (code, _) = s.fail(
        "registration.updateFace",
        json!({ "email": "2024cse021@college.edu", "photoBase64": "@@@" }),
    );
    assert_eq!(code, "bad_params");
    let (code, _) = s.fail(
        "registration.updateFace",
        json!({ "email": "nobody@college.edu", "photoBase64": JPEG_B64 }),
    );
    assert_eq!(code, "not_found");

    let student = s.create_student("Om Joshi", "om@college.edu", "CSE", "1");
    let saved = s.ok(
        "faces.save",
        json!({ "userId": student, "userType": "student", "photoBase64": JPEG_B64 }),
    );
    let face_url = saved["faceUrl"].as_str().expect("faceUrl").to_string();
    assert!(face_url.starts_with(&format!("storage/faces/student_{student}_")));
    let on_disk = std::fs::read(s.workspace.path().join(&face_url)).expect("face on disk");
    assert_eq!(&on_disk[..3], &[0xFF, 0xD8, 0xFF]);
    let fetched = s.ok("students.get", json!({ "studentId": student }));
    assert_eq!(fetched["student"]["faceRegistered"], json!(true));
    assert_eq!(fetched["student"]["faceUrl"], json!(face_url));

    let (code, _) = s.fail(
        "faces.save",
        json!({ "userId": student, "userType": "student", "photoBase64": "%%%" }),
    );
    assert_eq!(code, "bad_params");
    let (code, _) = s.fail(
        "faces.save",
        json!({ "userId": student, "userType": "admin", "photoBase64": JPEG_B64 }),
    );
    assert_eq!(code, "bad_params");
    let (code, _) = s.fail(
        "faces.save",
        json!({ "userId": "ghost", "userType": "faculty", "photoBase64": JPEG_B64 }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn expired_session_is_rejected_and_purged() {
    let mut s = Sidecar::start();
    s.create_student("Om Joshi", "om@college.edu", "CSE", "1");
    let login = s.ok(
        "auth.login",
        json!({ "identifier": "om@college.edu", "password": "student-pass-1", "role": "student" }),
    );
    let token = login["token"].as_str().expect("token").to_string();
    s.ok("auth.session", json!({ "token": token }));

    let db = rusqlite::Connection::open(s.workspace.path().join("eduvision.sqlite3")).expect("open db");
    db.execute(
        "UPDATE sessions SET expires_at = '2000-01-01T00:00:00.000Z'",
        [],
    )
    .expect("expire sessions");
    drop(db);

    let expired = s.request("auth.session", json!({ "token": token }));
    assert_eq!(expired["error"]["code"], json!("unauthorized"));
    assert_eq!(expired["error"]["status"], json!(401));
    assert_eq!(expired["error"]["message"], json!("session expired"));
    let gone = s.request("auth.session", json!({ "token": token }));
    assert_eq!(gone["error"]["message"], json!("session not found"));
}

#[test]
fn student_profile_updates() {
    let mut s = Sidecar::start();
    let faculty = s.create_faculty("Dr. Iyer", "iyer@college.edu", "CSE");
    let student = s.create_student("Om Joshi", "om@college.edu", "CSE", "1");
    let class = s.ok(
        "classes.create",
        json!({ "name": "FE-A", "department": "CSE", "year": "1", "facultyId": faculty }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let updated = s.ok(
        "students.update",
        json!({ "studentId": student, "name": "Om S. Joshi", "mobile": "9811111111", "classId": class_id }),
    );
    assert_eq!(updated["student"]["name"], json!("Om S. Joshi"));
    assert_eq!(updated["student"]["mobile"], json!("9811111111"));
    assert_eq!(updated["student"]["classId"], json!(class_id));
    assert_eq!(updated["student"]["email"], json!("om@college.edu"));

    let detached = s.ok("students.update", json!({ "studentId": student, "classId": null }));
    assert!(detached["student"]["classId"].is_null());
    assert_eq!(detached["student"]["name"], json!("Om S. Joshi"));

    let (code, _) = s.fail(
        "students.update",
        json!({ "studentId": student, "classId": "no-such-class" }),
    );
    assert_eq!(code, "not_found");
    let (code, status) = s.fail("students.update", json!({ "studentId": "ghost", "name": "X" }));
    assert_eq!((code.as_str(), status), ("not_found", 404));
}
