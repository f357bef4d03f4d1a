use rusqlite::Connection;
use std::path::Path;

const DB_FILE: &str = "eduvision.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT,
            year TEXT,
            faculty_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            prn TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            year TEXT NOT NULL,
            mobile TEXT,
            class_id TEXT,
            password_hash TEXT,
            face_url TEXT,
            face_registered INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_dept_year ON students(department, year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            designation TEXT,
            field TEXT,
            course TEXT,
            mobile TEXT,
            password_hash TEXT,
            face_url TEXT,
            face_registered INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_faculty_department ON faculty(department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pending_registrations(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            user_type TEXT NOT NULL,
            field TEXT NOT NULL,
            course TEXT NOT NULL,
            department TEXT NOT NULL,
            year TEXT,
            phone TEXT,
            face_url TEXT,
            status TEXT NOT NULL,
            rejection_reason TEXT,
            submitted_at TEXT NOT NULL,
            reviewed_at TEXT,
            reviewed_by TEXT,
            approved_user_id TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pending_registrations_status ON pending_registrations(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            faculty_id TEXT NOT NULL,
            department TEXT NOT NULL,
            year TEXT NOT NULL,
            class_id TEXT,
            assignment_type TEXT NOT NULL,
            allowed_file_types TEXT,
            word_limit INTEGER,
            max_marks REAL NOT NULL,
            start_date TEXT,
            due_date TEXT NOT NULL,
            visibility INTEGER NOT NULL DEFAULT 1,
            allow_late_submission INTEGER NOT NULL DEFAULT 0,
            allow_resubmission INTEGER NOT NULL DEFAULT 0,
            enable_plagiarism_check INTEGER NOT NULL DEFAULT 0,
            allow_group_submission INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_faculty ON assignments(faculty_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_dept_year ON assignments(department, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            content TEXT,
            attachment_url TEXT,
            status TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            plagiarism_score REAL,
            grade REAL,
            feedback TEXT,
            graded_at TEXT,
            graded_by TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(assignment_id, student_id)
        )",
        [],
    )?;
    ensure_column(&conn, "assignment_submissions", "auto_grade", "REAL")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_assignment ON assignment_submissions(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON assignment_submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            session_name TEXT NOT NULL,
            session_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            location_latitude REAL,
            location_longitude REAL,
            geo_fence_radius REAL NOT NULL,
            require_face_recognition INTEGER NOT NULL,
            require_geo_fencing INTEGER NOT NULL,
            require_liveness_detection INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_class ON attendance_sessions(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_faculty ON attendance_sessions(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attendance_status TEXT NOT NULL,
            marked_at TEXT NOT NULL,
            face_verified INTEGER NOT NULL DEFAULT 0,
            geo_location_verified INTEGER NOT NULL DEFAULT 0,
            liveness_verified INTEGER NOT NULL DEFAULT 0,
            latitude REAL,
            longitude REAL,
            distance_from_center REAL,
            face_confidence_score REAL,
            liveness_score REAL,
            updated_at TEXT,
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(session_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_attendance_session ON student_attendance(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_attendance(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            attendance_status TEXT NOT NULL,
            marked_at TEXT NOT NULL,
            face_verified INTEGER NOT NULL DEFAULT 0,
            geo_location_verified INTEGER NOT NULL DEFAULT 0,
            latitude REAL,
            longitude REAL,
            distance_from_center REAL,
            updated_at TEXT,
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            UNIQUE(session_id, faculty_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS conversations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            UNIQUE(student_id, faculty_id)
        )",
        [],
    )?;
    ensure_column(&conn, "conversations", "last_message_at", "TEXT")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            content TEXT,
            message_type TEXT NOT NULL,
            attachment_url TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(conversation_id) REFERENCES conversations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            department TEXT,
            year TEXT,
            is_university_wide INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(author_id) REFERENCES faculty(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grievances(
            id TEXT PRIMARY KEY,
            grievance_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            against TEXT,
            status TEXT NOT NULL,
            is_anonymous INTEGER NOT NULL DEFAULT 0,
            assigned_to TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resolved_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(assigned_to) REFERENCES faculty(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grievances_student ON grievances(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grievance_comments(
            id TEXT PRIMARY KEY,
            grievance_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_type TEXT NOT NULL,
            comment TEXT NOT NULL,
            is_internal INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(grievance_id) REFERENCES grievances(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS service_requests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            service_type TEXT NOT NULL,
            subject TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            priority TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_service_requests_student ON service_requests(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS service_responses(
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            responder_id TEXT NOT NULL,
            responder_name TEXT NOT NULL,
            responder_role TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(request_id) REFERENCES service_requests(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_requests(
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            leave_type TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            reason TEXT NOT NULL,
            additional_info TEXT,
            status TEXT NOT NULL,
            faculty_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_request_comments(
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_type TEXT NOT NULL,
            comment TEXT NOT NULL,
            is_private INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(request_id) REFERENCES leave_requests(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_documents(
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            url TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            FOREIGN KEY(request_id) REFERENCES leave_requests(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leave_requests_faculty ON leave_requests(faculty_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            department TEXT,
            year TEXT,
            class_id TEXT,
            faculty_id TEXT,
            created_by TEXT NOT NULL,
            max_members INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_group_members(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            joined_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES study_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(group_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_group_tasks(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            due_date TEXT NOT NULL,
            assigned_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES study_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_study_group_members_group ON study_group_members(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            assignment_id TEXT,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS email_outbox(
            id TEXT PRIMARY KEY,
            to_address TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            created_at TEXT NOT NULL,
            sent_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hackathons(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            rules TEXT,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            registration_deadline TEXT NOT NULL,
            location TEXT NOT NULL,
            organizer_id TEXT,
            organizer_type TEXT NOT NULL,
            max_team_size INTEGER NOT NULL,
            min_team_size INTEGER NOT NULL,
            prizes TEXT,
            technologies TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            website_url TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS hackathon_teams(
            id TEXT PRIMARY KEY,
            hackathon_id TEXT NOT NULL,
            team_name TEXT NOT NULL,
            project_name TEXT NOT NULL,
            project_description TEXT,
            technologies_used TEXT NOT NULL DEFAULT '[]',
            github_url TEXT,
            demo_url TEXT,
            presentation_url TEXT,
            leader_id TEXT NOT NULL,
            leader_type TEXT NOT NULL,
            is_submitted INTEGER NOT NULL DEFAULT 0,
            submission_time TEXT,
            rank INTEGER,
            score REAL,
            feedback TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(hackathon_id) REFERENCES hackathons(id),
            UNIQUE(hackathon_id, team_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS hackathon_team_members(
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_type TEXT NOT NULL,
            role TEXT,
            joined_at TEXT NOT NULL,
            FOREIGN KEY(team_id) REFERENCES hackathon_teams(id),
            UNIQUE(team_id, user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scholarships(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            eligibility_criteria TEXT NOT NULL,
            amount REAL NOT NULL,
            deadline TEXT NOT NULL,
            provider TEXT NOT NULL,
            provider_website TEXT,
            document_requirements TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_featured INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scholarship_applications(
            id TEXT PRIMARY KEY,
            scholarship_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            application_data TEXT NOT NULL DEFAULT '{}',
            feedback TEXT,
            submitted_at TEXT,
            reviewed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(scholarship_id) REFERENCES scholarships(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(scholarship_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scholarship_documents(
            id TEXT PRIMARY KEY,
            application_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            url TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            FOREIGN KEY(application_id) REFERENCES scholarship_applications(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scholarship_comments(
            id TEXT PRIMARY KEY,
            application_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_type TEXT NOT NULL,
            comment TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(application_id) REFERENCES scholarship_applications(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mentorships(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(faculty_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mentorship_meetings(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            meeting_type TEXT NOT NULL,
            meeting_date TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            location TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mentorship_meeting_attendees(
            id TEXT PRIMARY KEY,
            meeting_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attended INTEGER,
            feedback TEXT,
            updated_at TEXT,
            FOREIGN KEY(meeting_id) REFERENCES mentorship_meetings(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(meeting_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mentorship_notes(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            note TEXT NOT NULL,
            is_confidential INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mentorship_help_requests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;

    // Older workspaces wrote the short "pending" status for new registrations.
    conn.execute(
        "UPDATE pending_registrations SET status = 'pending_approval' WHERE status = 'pending'",
        [],
    )?;

    Ok(conn)
}

fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"),
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_idempotent_and_adds_late_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("first open");
        assert!(table_has_column(&conn, "assignment_submissions", "auto_grade").expect("pragma"));
        assert!(table_has_column(&conn, "conversations", "last_message_at").expect("pragma"));
        assert!(table_has_column(&conn, "hackathons", "max_team_size").expect("pragma"));
        assert!(table_has_column(&conn, "scholarship_applications", "reviewed_at").expect("pragma"));
        drop(conn);
        let conn = open_db(dir.path()).expect("second open");
        assert!(!table_has_column(&conn, "students", "nope").expect("pragma"));
    }

    #[test]
    fn legacy_pending_status_is_migrated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open");
        conn.execute(
            "INSERT INTO pending_registrations(id, email, name, user_type, field, course, department, status, submitted_at)
             VALUES('r1', 'a@b.c', 'A', 'student', 'Engineering', 'BTech', 'CSE', 'pending', '2024-01-01T00:00:00Z')",
            [],
        )
        .expect("insert");
        drop(conn);
        let conn = open_db(dir.path()).expect("reopen");
        let status: String = conn
            .query_row("SELECT status FROM pending_registrations WHERE id = 'r1'", [], |r| r.get(0))
            .expect("status");
        assert_eq!(status, "pending_approval");
    }
}
