//! Email, department and year normalization shared by registration and login.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    Student,
    Faculty,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub prn: String,
    pub department: Option<&'static str>,
    pub year: String,
    pub admission_year: i32,
}

/// `domain` of `None` accepts anything with a local part and a host.
pub fn validate_email(email: &str, domain: Option<&str>) -> bool {
    let email = email.trim().to_ascii_lowercase();
    let Some((local, host)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || host.is_empty() || host.contains('@') {
        return false;
    }
    match domain {
        Some(d) => host == d.trim().trim_start_matches('@').to_ascii_lowercase(),
        None => true,
    }
}

fn local_part(email: &str) -> &str {
    email.trim().split('@').next().unwrap_or_default()
}

/// `2021cse001`: four digits, letters, digits.
fn split_legacy_prn(local: &str) -> Option<(i32, &str)> {
    let digits_end = local.find(|c: char| !c.is_ascii_digit())?;
    if digits_end != 4 {
        return None;
    }
    let rest = &local[4..];
    let letters_end = rest.find(|c: char| !c.is_ascii_alphabetic())?;
    if letters_end == 0 {
        return None;
    }
    let tail = &rest[letters_end..];
    if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((local[..4].parse().ok()?, &rest[..letters_end]))
}

/// `firstname.lastname_24cse`: underscore, two digits, letters at the end.
fn split_underscore_suffix(local: &str) -> Option<(i32, &str)> {
    let (_, suffix) = local.rsplit_once('_')?;
    if suffix.len() < 3 {
        return None;
    }
    let (yy, code) = suffix.split_at(2);
    if !yy.chars().all(|c| c.is_ascii_digit())
        || code.is_empty()
        || !code.chars().all(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    Some((2000 + yy.parse::<i32>().ok()?, code))
}

pub fn email_kind(email: &str, domain: Option<&str>) -> EmailKind {
    if !validate_email(email, domain) {
        return EmailKind::Invalid;
    }
    let local = local_part(email).to_ascii_lowercase();
    if split_legacy_prn(&local).is_some() || split_underscore_suffix(&local).is_some() {
        EmailKind::Student
    } else {
        EmailKind::Faculty
    }
}

pub fn department_from_email_code(code: &str) -> Option<&'static str> {
    match code.to_ascii_lowercase().as_str() {
        "cse" | "cs" | "ce" | "uce" => Some("CSE"),
        "cyber" | "cys" | "csec" => Some("CYBER"),
        "aids" | "ai&ds" | "ds" => Some("AIDS"),
        "aiml" | "ai&ml" | "ml" => Some("AIML"),
        _ => None,
    }
}

pub fn year_label(n: i32) -> String {
    let suffix = match n {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    };
    format!("{n}{suffix} Year")
}

pub fn extract_student_info(email: &str, current_year: i32) -> Option<StudentInfo> {
    let local = local_part(email);
    if local.is_empty() || !email.contains('@') {
        return None;
    }
    let lower = local.to_ascii_lowercase();
    let (admission_year, code) =
        split_legacy_prn(&lower).or_else(|| split_underscore_suffix(&lower))?;
    let academic_year = (current_year - admission_year + 1).clamp(1, 4);
    Some(StudentInfo {
        prn: local.to_ascii_uppercase(),
        department: department_from_email_code(code),
        year: year_label(academic_year),
        admission_year,
    })
}

pub fn normalize_department(raw: &str) -> String {
    let d = raw.trim().to_ascii_lowercase();
    if d.contains("cse") || d.contains("computer") {
        "CSE".to_string()
    } else if d.contains("cyber") {
        "CYBER".to_string()
    } else if d.contains("aids") || d.contains("data science") {
        "AIDS".to_string()
    } else if d.contains("aiml") || d.contains("machine learning") {
        "AIML".to_string()
    } else {
        raw.trim().to_ascii_uppercase()
    }
}

pub fn normalize_year(raw: &str) -> String {
    let v = raw.trim().to_ascii_lowercase().replace('_', " ");
    let n = match v.as_str() {
        "1" | "1st" | "first" | "first year" | "1st year" => 1,
        "2" | "2nd" | "second" | "second year" | "2nd year" => 2,
        "3" | "3rd" | "third" | "third year" | "3rd year" => 3,
        "4" | "4th" | "fourth" | "fourth year" | "4th year" => 4,
        _ => return raw.trim().to_string(),
    };
    year_label(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_case_insensitive() {
        assert!(validate_email("Jane.Doe@Sanjivani.EDU.in", Some("sanjivani.edu.in")));
        assert!(validate_email("jane@sanjivani.edu.in", Some("@sanjivani.edu.in")));
        assert!(!validate_email("jane@gmail.com", Some("sanjivani.edu.in")));
        assert!(validate_email("jane@gmail.com", None));
        assert!(!validate_email("no-at-sign", None));
        assert!(!validate_email("@host", None));
    }

    #[test]
    fn student_patterns_are_recognized() {
        let d = Some("sanjivani.edu.in");
        assert_eq!(email_kind("2021cse001@sanjivani.edu.in", d), EmailKind::Student);
        assert_eq!(email_kind("asha.patil_24aiml@sanjivani.edu.in", d), EmailKind::Student);
        assert_eq!(email_kind("r.kulkarni@sanjivani.edu.in", d), EmailKind::Faculty);
        assert_eq!(email_kind("2021cse001@example.com", d), EmailKind::Invalid);
    }

    #[test]
    fn legacy_prn_extracts_clamped_year() {
        let info = extract_student_info("2021cse001@sanjivani.edu.in", 2023).expect("info");
        assert_eq!(info.prn, "2021CSE001");
        assert_eq!(info.department, Some("CSE"));
        assert_eq!(info.year, "3rd Year");

        let old = extract_student_info("2015cyber042@sanjivani.edu.in", 2025).expect("info");
        assert_eq!(old.year, "4th Year");
        assert_eq!(old.department, Some("CYBER"));
    }

    #[test]
    fn underscore_suffix_uses_two_digit_year() {
        let info = extract_student_info("asha.patil_24ds@sanjivani.edu.in", 2024).expect("info");
        assert_eq!(info.admission_year, 2024);
        assert_eq!(info.year, "1st Year");
        assert_eq!(info.department, Some("AIDS"));
        assert_eq!(info.prn, "ASHA.PATIL_24DS");

        let future = extract_student_info("x_26zz@sanjivani.edu.in", 2024).expect("info");
        assert_eq!(future.year, "1st Year");
        assert_eq!(future.department, None);
    }

    #[test]
    fn faculty_email_has_no_student_info() {
        assert_eq!(extract_student_info("r.kulkarni@sanjivani.edu.in", 2024), None);
    }

    #[test]
    fn departments_and_years_normalize() {
        assert_eq!(normalize_department("Computer Science and Engineering"), "CSE");
        assert_eq!(normalize_department("cyber security"), "CYBER");
        assert_eq!(normalize_department("Artificial Intelligence and Data Science"), "AIDS");
        assert_eq!(normalize_department("aiml"), "AIML");
        assert_eq!(normalize_department(" mech "), "MECH");

        assert_eq!(normalize_year("2"), "2nd Year");
        assert_eq!(normalize_year("3rd_year"), "3rd Year");
        assert_eq!(normalize_year("First Year"), "1st Year");
        assert_eq!(normalize_year("final"), "final");
    }
}
