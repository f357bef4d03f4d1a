mod common;

use common::Sidecar;
use pretty_assertions::assert_eq;
use serde_json::json;

fn titles(listed: &serde_json::Value) -> Vec<String> {
    let mut out: Vec<String> = listed["announcements"]
        .as_array()
        .expect("announcements")
        .iter()
        .filter_map(|a| a["title"].as_str().map(str::to_string))
        .collect();
    out.sort();
    out
}

#[test]
fn students_see_university_department_and_class_announcements() {
    let mut s = Sidecar::start();
    let dean = s.create_faculty("Dr. Kale", "kale@college.edu", "CSE");
    let hod = s.create_faculty("Dr. Pawar", "pawar@college.edu", "MECH");
    let cse_second = s.create_student("Asha", "asha@college.edu", "CSE", "2");
    let cse_third = s.create_student("Bilal", "bilal@college.edu", "CSE", "3");
    let mech_second = s.create_student("Chen", "chen@college.edu", "MECH", "2");

    for (author, params) in [
        (&dean, json!({ "title": "Convocation", "content": "Main ground, 10am", "isUniversityWide": true })),
        (&dean, json!({ "title": "CSE seminar", "content": "AI talk", "department": "Computer Science" })),
        (&dean, json!({ "title": "SE-2 lab", "content": "Lab moved", "department": "CSE", "year": "2" })),
        (&hod, json!({ "title": "Workshop visit", "content": "Bring shoes", "department": "MECH", "year": "2nd Year" })),
    ] {
        let mut params = params;
        params["authorId"] = json!(author);
        s.ok("announcements.create", params);
    }

    let seen = s.ok("announcements.listForStudent", json!({ "studentId": cse_second }));
    assert_eq!(titles(&seen), vec!["CSE seminar", "Convocation", "SE-2 lab"]);
    assert!(seen["announcements"][0]["authorName"].is_string());

    let seen = s.ok("announcements.listForStudent", json!({ "studentId": cse_third }));
    assert_eq!(titles(&seen), vec!["CSE seminar", "Convocation"]);

    let seen = s.ok("announcements.listForStudent", json!({ "studentId": mech_second }));
    assert_eq!(titles(&seen), vec!["Convocation", "Workshop visit"]);

    let (code, status) = s.fail("announcements.listForStudent", json!({ "studentId": "ghost" }));
    assert_eq!((code.as_str(), status), ("not_found", 404));

    let by_hod = s.ok("announcements.list", json!({ "authorId": hod }));
    assert_eq!(titles(&by_hod), vec!["Workshop visit"]);
    let everything = s.ok("announcements.list", json!({}));
    assert_eq!(everything["announcements"].as_array().map(Vec::len), Some(4));
}

#[test]
fn department_is_required_unless_university_wide() {
    let mut s = Sidecar::start();
    let dean = s.create_faculty("Dr. Kale", "kale@college.edu", "CSE");

    let (code, status) = s.fail(
        "announcements.create",
        json!({ "authorId": dean, "title": "Holiday", "content": "Closed Friday" }),
    );
    assert_eq!((code.as_str(), status), ("bad_params", 400));

    let (code, _) = s.fail(
        "announcements.create",
        json!({ "authorId": "nobody", "title": "Holiday", "content": "Closed", "isUniversityWide": true }),
    );
    assert_eq!(code, "not_found");
}
