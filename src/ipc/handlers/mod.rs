pub mod announcements;
pub mod assignments;
pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod directory;
pub mod grievances;
pub mod hackathons;
pub mod leave;
pub mod mentorship;
pub mod messaging;
pub mod notifications;
pub mod registration;
pub mod scholarships;
pub mod service_requests;
pub mod sessions;
pub mod study_groups;
