mod common;

use common::Sidecar;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn mentor_tracks_meetings_and_attendance() {
    let mut s = Sidecar::start();
    let mentor = s.create_faculty("Dr. Kulkarni", "kulkarni@college.edu", "CSE");
    let a = s.create_student("Pooja", "pooja@college.edu", "CSE", "2");
    let b = s.create_student("Rohan", "rohan@college.edu", "CSE", "2");

    let assigned = s.ok(
        "mentorship.assign",
        json!({ "facultyId": mentor, "studentIds": [a, b, a] }),
    );
    assert_eq!(assigned["assigned"], json!(2));
    s.ok("mentorship.assign", json!({ "facultyId": mentor, "studentIds": [a] }));
    let mentees = s.ok("mentorship.mentees", json!({ "facultyId": mentor }));
    let names: Vec<&str> = mentees["mentees"]
        .as_array()
        .expect("mentees")
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Pooja", "Rohan"]);

    let past = s.ok(
        "mentorship.meetings.schedule",
        json!({
            "facultyId": mentor,
            "title": "Semester check-in",
            "meetingType": "group",
            "meetingDate": "2020-02-01T10:00:00Z",
            "durationMinutes": 30,
            "studentIds": [a, b],
        }),
    );
    let past_id = past["meetingId"].as_str().expect("meetingId").to_string();
    s.ok(
        "mentorship.meetings.schedule",
        json!({
            "facultyId": mentor,
            "title": "Internship plans",
            "meetingType": "individual",
            "meetingDate": "2999-02-01T10:00:00Z",
            "durationMinutes": 20,
            "location": "Cabin 4",
            "studentIds": [a],
        }),
    );

    let updated = s.ok(
        "mentorship.meetings.updateAttendance",
        json!({
            "meetingId": past_id,
            "attendees": [{ "studentId": a, "attended": true, "feedback": "Prepared well" }],
        }),
    );
    let marks: Vec<(&str, serde_json::Value)> = updated["attendees"]
        .as_array()
        .expect("attendees")
        .iter()
        .map(|x| (x["name"].as_str().unwrap_or_default(), x["attended"].clone()))
        .collect();
    assert_eq!(
        marks,
        vec![("Pooja", json!(true)), ("Rohan", serde_json::Value::Null)]
    );

    let upcoming = s.ok("mentorship.meetings.list", json!({ "facultyId": mentor }));
    assert_eq!(upcoming["meetings"].as_array().map(Vec::len), Some(1));
    assert_eq!(upcoming["meetings"][0]["title"], json!("Internship plans"));
    let history = s.ok(
        "mentorship.meetings.list",
        json!({ "facultyId": mentor, "when": "past" }),
    );
    assert_eq!(history["meetings"][0]["attendees"].as_array().map(Vec::len), Some(2));

    let stats = s.ok("mentorship.statistics", json!({ "facultyId": mentor }));
    assert_eq!(stats["totalMentees"], json!(2));
    assert_eq!(stats["totalMeetings"], json!(2));
    assert_eq!(stats["attendedMeetings"], json!(1));
    assert_eq!(stats["missedMeetings"], json!(1));
    assert_eq!(stats["nextMeeting"]["title"], json!("Internship plans"));
}

#[test]
fn meetings_reject_bad_rosters() {
    let mut s = Sidecar::start();
    let mentor = s.create_faculty("Dr. Iyer", "iyer@college.edu", "EE");
    let a = s.create_student("Sara", "sara@college.edu", "EE", "1");
    let b = s.create_student("Tanay", "tanay@college.edu", "EE", "1");
    let base = json!({
        "facultyId": mentor,
        "title": "Doubt clearing",
        "meetingType": "individual",
        "meetingDate": "2999-05-01",
        "durationMinutes": 15,
    });

    let mut empty = base.clone();
    empty["studentIds"] = json!([]);
    let (code, _) = s.fail("mentorship.meetings.schedule", empty);
    assert_eq!(code, "bad_params");

    let mut crowded = base.clone();
    crowded["studentIds"] = json!([a, b]);
    let (code, _) = s.fail("mentorship.meetings.schedule", crowded);
    assert_eq!(code, "bad_params");

    let mut zero = base.clone();
    zero["studentIds"] = json!([a]);
    zero["durationMinutes"] = json!(0);
    let (code, _) = s.fail("mentorship.meetings.schedule", zero);
    assert_eq!(code, "bad_params");

    let mut ghost = base.clone();
    ghost["studentIds"] = json!(["nobody"]);
    let (code, status) = s.fail("mentorship.meetings.schedule", ghost);
    assert_eq!((code.as_str(), status), ("not_found", 404));

    let mut ok = base;
    ok["studentIds"] = json!([a]);
    let meeting = s.ok("mentorship.meetings.schedule", ok);
    let (code, _) = s.fail(
        "mentorship.meetings.updateAttendance",
        json!({
            "meetingId": meeting["meetingId"],
            "attendees": [{ "studentId": b, "attended": true }],
        }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn notes_and_help_requests() {
    let mut s = Sidecar::start();
    let mentor = s.create_faculty("Dr. Bose", "bose@college.edu", "CE");
    let student = s.create_student("Uma", "uma@college.edu", "CE", "3");

    s.ok(
        "mentorship.notes.add",
        json!({ "facultyId": mentor, "studentId": student, "note": "Needs help with surveying lab" }),
    );
    let notes = s.ok(
        "mentorship.notes.list",
        json!({ "facultyId": mentor, "studentId": student }),
    );
    assert_eq!(notes["notes"][0]["isConfidential"], json!(true));
    assert_eq!(notes["notes"][0]["studentName"], json!("Uma"));

    let request = s.ok(
        "mentorship.helpRequests.create",
        json!({ "studentId": student, "facultyId": mentor, "subject": "Project topic", "description": "Unsure between two ideas" }),
    );
    let request_id = request["requestId"].as_str().expect("requestId").to_string();
    s.ok(
        "mentorship.helpRequests.updateStatus",
        json!({ "requestId": request_id, "status": "in_progress" }),
    );
    let (code, _) = s.fail(
        "mentorship.helpRequests.updateStatus",
        json!({ "requestId": request_id, "status": "closed" }),
    );
    assert_eq!(code, "bad_params");

    let open = s.ok(
        "mentorship.helpRequests.list",
        json!({ "facultyId": mentor, "status": "in_progress" }),
    );
    assert_eq!(open["requests"].as_array().map(Vec::len), Some(1));
    assert_eq!(open["requests"][0]["studentName"], json!("Uma"));
    let (code, _) = s.fail("mentorship.helpRequests.list", json!({}));
    assert_eq!(code, "bad_params");
}
