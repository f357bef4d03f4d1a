mod common;

use common::Sidecar;
use pretty_assertions::assert_eq;
use serde_json::json;

fn create_hackathon(s: &mut Sidecar, organizer: &str, deadline: &str, max_team_size: i64) -> String {
    let result = s.ok(
        "hackathons.create",
        json!({
            "name": "Campus Build Week",
            "description": "48 hours of building",
            "startDate": "2026-01-10",
            "endDate": "2999-01-12",
            "registrationDeadline": deadline,
            "location": "Main auditorium",
            "organizerId": organizer,
            "organizerType": "faculty",
            "maxTeamSize": max_team_size,
            "technologies": ["rust", "sqlite"],
        }),
    );
    result["hackathonId"].as_str().expect("hackathonId").to_string()
}

#[test]
fn team_size_and_membership_are_enforced() {
    let mut s = Sidecar::start();
    let faculty = s.create_faculty("Dr. Rao", "rao@college.edu", "CSE");
    let lead = s.create_student("Ishaan", "ishaan@college.edu", "CSE", "3");
    let b = s.create_student("Jaya", "jaya@college.edu", "CSE", "3");
    let c = s.create_student("Kabir", "kabir@college.edu", "CSE", "3");
    let hackathon = create_hackathon(&mut s, &faculty, "2999-01-01", 2);

    let team = s.ok(
        "hackathons.teams.create",
        json!({
            "hackathonId": hackathon,
            "teamName": "Borrow Checkers",
            "projectName": "Attendance heatmap",
            "leaderId": lead,
            "leaderType": "student",
        }),
    );
    assert_eq!(team["memberCount"], json!(1));
    let team_id = team["teamId"].as_str().expect("teamId").to_string();

    let (code, status) = s.fail(
        "hackathons.teams.create",
        json!({
            "hackathonId": hackathon,
            "teamName": "Borrow Checkers",
            "projectName": "Another",
            "leaderId": b,
            "leaderType": "student",
        }),
    );
    assert_eq!((code.as_str(), status), ("conflict", 409));

    let (code, status) = s.fail(
        "hackathons.teams.addMember",
        json!({ "teamId": team_id, "userId": lead, "userType": "student" }),
    );
    assert_eq!((code.as_str(), status), ("conflict", 409));

    let added = s.ok(
        "hackathons.teams.addMember",
        json!({ "teamId": team_id, "userId": b, "userType": "student", "role": "Backend" }),
    );
    assert_eq!(added["memberCount"], json!(2));

    let (code, status) = s.fail(
        "hackathons.teams.addMember",
        json!({ "teamId": team_id, "userId": c, "userType": "student" }),
    );
    assert_eq!((code.as_str(), status), ("conflict", 409));

    let (code, _) = s.fail(
        "hackathons.teams.removeMember",
        json!({ "teamId": team_id, "userId": lead }),
    );
    assert_eq!(code, "conflict");
    let (code, _) = s.fail(
        "hackathons.teams.removeMember",
        json!({ "teamId": team_id, "userId": c }),
    );
    assert_eq!(code, "not_found");

    let detail = s.ok("hackathons.teams.get", json!({ "teamId": team_id }));
    let members: Vec<(&str, &str)> = detail["team"]["members"]
        .as_array()
        .expect("members")
        .iter()
        .map(|m| {
            (
                m["name"].as_str().unwrap_or_default(),
                m["role"].as_str().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(members, vec![("Ishaan", "Team Leader"), ("Jaya", "Backend")]);

    s.ok("hackathons.teams.removeMember", json!({ "teamId": team_id, "userId": b }));
    s.ok(
        "hackathons.teams.addMember",
        json!({ "teamId": team_id, "userId": c, "userType": "student" }),
    );

    let mine = s.ok("hackathons.teams.listForUser", json!({ "userId": c }));
    assert_eq!(mine["teams"].as_array().map(Vec::len), Some(1));
    let listed = s.ok("hackathons.get", json!({ "hackathonId": hackathon }));
    assert_eq!(listed["hackathon"]["teamCount"], json!(1));
    assert_eq!(listed["hackathon"]["technologies"], json!(["rust", "sqlite"]));
}

#[test]
fn closed_registration_still_accepts_one_submission() {
    let mut s = Sidecar::start();
    let faculty = s.create_faculty("Dr. Menon", "menon@college.edu", "IT");
    let lead = s.create_student("Lavanya", "lavanya@college.edu", "IT", "2");
    let late = s.create_student("Manav", "manav@college.edu", "IT", "2");
    let hackathon = create_hackathon(&mut s, &faculty, "2999-01-01", 4);

    let team = s.ok(
        "hackathons.teams.create",
        json!({
            "hackathonId": hackathon,
            "teamName": "Null Pointers",
            "projectName": "Queue tracker",
            "leaderId": lead,
            "leaderType": "student",
        }),
    );
    let team_id = team["teamId"].as_str().expect("teamId").to_string();

    s.ok(
        "hackathons.update",
        json!({ "hackathonId": hackathon, "registrationDeadline": "2020-01-09T00:00:00Z", "status": "ongoing" }),
    );
    let (code, status) = s.fail(
        "hackathons.teams.addMember",
        json!({ "teamId": team_id, "userId": late, "userType": "student" }),
    );
    assert_eq!((code.as_str(), status), ("conflict", 409));
    let (code, _) = s.fail(
        "hackathons.teams.create",
        json!({
            "hackathonId": hackathon,
            "teamName": "Latecomers",
            "projectName": "Anything",
            "leaderId": late,
            "leaderType": "student",
        }),
    );
    assert_eq!(code, "conflict");

    let submitted = s.ok(
        "hackathons.teams.submit",
        json!({
            "teamId": team_id,
            "projectName": "Queue tracker",
            "projectDescription": "Live canteen queue lengths",
            "technologiesUsed": ["rust"],
            "githubUrl": "https://example.org/queue",
        }),
    );
    assert_eq!(submitted["isSubmitted"], json!(true));
    let (code, status) = s.fail(
        "hackathons.teams.submit",
        json!({ "teamId": team_id, "projectName": "Again", "projectDescription": "Again" }),
    );
    assert_eq!((code.as_str(), status), ("conflict", 409));

    let deck = s.ok(
        "hackathons.teams.uploadPresentation",
        json!({ "teamId": team_id, "fileName": "deck.pdf", "dataBase64": "JVBERi0=" }),
    );
    let url = deck["presentationUrl"].as_str().expect("presentationUrl").to_string();
    assert!(url.starts_with("storage/hackathons/"), "{url}");
    assert!(s.workspace.path().join(&url).exists());

    s.ok(
        "hackathons.teams.judge",
        json!({ "teamId": team_id, "score": 87.5, "feedback": "Clear demo", "rank": 1 }),
    );
    let teams = s.ok("hackathons.teams.list", json!({ "hackathonId": hackathon }));
    let judged = &teams["teams"][0];
    assert_eq!(judged["score"], json!(87.5));
    assert_eq!(judged["rank"], json!(1));
    assert_eq!(judged["presentationUrl"], json!(url));
    assert_eq!(judged["technologiesUsed"], json!(["rust"]));

    let result = s.ok("hackathons.delete", json!({ "hackathonId": hackathon }));
    assert_eq!(result["teamsDeleted"], json!(1));
    let (code, _) = s.fail("hackathons.teams.get", json!({ "teamId": team_id }));
    assert_eq!(code, "not_found");
}

#[test]
fn hackathon_dates_and_sizes_are_validated() {
    let mut s = Sidecar::start();
    let base = json!({
        "name": "Bad",
        "description": "x",
        "startDate": "2026-03-10",
        "endDate": "2026-03-12",
        "registrationDeadline": "2026-03-01",
        "location": "Lab 2",
        "organizerType": "university",
        "maxTeamSize": 4,
    });

    let mut backwards = base.clone();
    backwards["endDate"] = json!("2026-03-09");
    let (code, _) = s.fail("hackathons.create", backwards);
    assert_eq!(code, "bad_params");

    let mut late_deadline = base.clone();
    late_deadline["registrationDeadline"] = json!("2026-03-20");
    let (code, _) = s.fail("hackathons.create", late_deadline);
    assert_eq!(code, "bad_params");

    let mut sizes = base.clone();
    sizes["minTeamSize"] = json!(5);
    let (code, _) = s.fail("hackathons.create", sizes);
    assert_eq!(code, "bad_params");

    let mut unknown = base.clone();
    unknown["organizerType"] = json!("faculty");
    unknown["organizerId"] = json!("missing");
    let (code, _) = s.fail("hackathons.create", unknown);
    assert_eq!(code, "not_found");

    s.ok("hackathons.create", base);
    let found = s.ok("hackathons.list", json!({ "search": "lab 2" }));
    assert_eq!(found["hackathons"].as_array().map(Vec::len), Some(1));
    let none = s.ok("hackathons.list", json!({ "status": "completed" }));
    assert_eq!(none["hackathons"], json!([]));
}
