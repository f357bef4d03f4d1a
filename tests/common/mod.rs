#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub workspace: tempfile::TempDir,
}

impl Sidecar {
    /// Spawns the daemon and selects a fresh workspace.
    pub fn start() -> Self {
        let workspace = tempfile::tempdir().expect("temp workspace");
        let exe = env!("CARGO_BIN_EXE_eduvisiond");
        let mut child = Command::new(exe)
            .current_dir(workspace.path())
            .env_remove("EDUVISION_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn eduvisiond");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let mut sidecar = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
            workspace,
        };
        let path = sidecar.workspace.path().to_string_lossy().to_string();
        sidecar.ok("workspace.select", json!({ "path": path }));
        sidecar
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{line}").expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {line}");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Sends a request that must succeed and returns its result.
    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{method} failed: {value}"
        );
        value["result"].clone()
    }

    /// Sends a request that must fail and returns `(code, status)`.
    pub fn fail(&mut self, method: &str, params: serde_json::Value) -> (String, u64) {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{method} unexpectedly succeeded: {value}"
        );
        (
            value["error"]["code"].as_str().unwrap_or_default().to_string(),
            value["error"]["status"].as_u64().unwrap_or_default(),
        )
    }

    pub fn create_faculty(&mut self, name: &str, email: &str, department: &str) -> String {
        let result = self.ok(
            "faculty.create",
            json!({
                "name": name,
                "email": email,
                "department": department,
                "password": "faculty-pass-1",
            }),
        );
        result["facultyId"].as_str().expect("facultyId").to_string()
    }

    pub fn create_student(&mut self, name: &str, email: &str, department: &str, year: &str) -> String {
        let result = self.ok(
            "students.create",
            json!({
                "name": name,
                "email": email,
                "department": department,
                "year": year,
                "password": "student-pass-1",
            }),
        );
        result["studentId"].as_str().expect("studentId").to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
