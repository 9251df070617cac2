//! Reusable test fixtures for scheduling scenarios.
//!
//! Provides pre-built entities and a bundle builder so scenario tests stay
//! readable. Dates parse from ISO strings; availability helpers expand
//! weekday patterns over a range.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::context::{EntityBundle, SchedulingContext};
use crate::domain::{
    Availability, BlackoutDate, Clerkship, ClerkshipType, Elective, Enrollment, HealthSystem,
    Preceptor, SchedulingPeriod, Site, Student, Team, TeamMember,
};

pub fn date(s: &str) -> NaiveDate {
    s.parse().expect("fixture date")
}

pub fn period(id: &str, start: &str, end: &str) -> SchedulingPeriod {
    SchedulingPeriod {
        id: id.to_string(),
        start_date: date(start),
        end_date: date(end),
        is_active: true,
    }
}

pub fn health_system(id: &str) -> HealthSystem {
    HealthSystem {
        id: id.to_string(),
        name: format!("Health system {}", id),
    }
}

pub fn site(id: &str, health_system_id: &str) -> Site {
    Site {
        id: id.to_string(),
        name: format!("Site {}", id),
        health_system_id: health_system_id.to_string(),
    }
}

pub fn student(id: &str, systems: &[&str]) -> Student {
    Student {
        id: id.to_string(),
        name: format!("Student {}", id),
        onboarded_health_systems: systems.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn preceptor(id: &str, health_system_id: &str, sites: &[&str], max_students: u32) -> Preceptor {
    Preceptor {
        id: id.to_string(),
        name: format!("Dr {}", id),
        specialty: None,
        health_system_id: health_system_id.to_string(),
        site_ids: sites.iter().map(|s| s.to_string()).collect(),
        max_students,
        is_global_fallback_only: false,
    }
}

pub fn clerkship(id: &str, clerkship_type: ClerkshipType, required_days: u32) -> Clerkship {
    Clerkship {
        id: id.to_string(),
        name: format!("Clerkship {}", id),
        clerkship_type,
        required_days,
        specialty: None,
    }
}

pub fn elective(id: &str, parent: &str, minimum_days: u32, is_required: bool) -> Elective {
    Elective {
        id: id.to_string(),
        parent_clerkship_id: parent.to_string(),
        name: format!("Elective {}", id),
        minimum_days,
        specialty: None,
        is_required,
        allowed_preceptor_ids: vec![],
    }
}

pub fn enrollment(student_id: &str, clerkship_id: &str) -> Enrollment {
    Enrollment {
        student_id: student_id.to_string(),
        clerkship_id: clerkship_id.to_string(),
        elective_id: None,
    }
}

pub fn team(id: &str, clerkship_id: &str, members: &[(&str, u32)]) -> Team {
    Team {
        id: id.to_string(),
        clerkship_id: clerkship_id.to_string(),
        site_ids: vec![],
        require_same_health_system: false,
        require_same_site: false,
        require_same_specialty: false,
        members: members
            .iter()
            .map(|(preceptor_id, priority)| TeamMember {
                preceptor_id: preceptor_id.to_string(),
                priority: *priority,
            })
            .collect(),
    }
}

pub fn blackout(s: &str) -> BlackoutDate {
    BlackoutDate {
        date: date(s),
        reason: None,
    }
}

/// Availability rows marking the preceptor available at `site_id` on the
/// listed weekdays of `[start, end]`.
pub fn weekday_availability(
    preceptor_id: &str,
    site_id: &str,
    start: &str,
    end: &str,
    weekdays: &[Weekday],
) -> Vec<Availability> {
    let mut rows = Vec::new();
    let mut current = date(start);
    let end = date(end);
    while current <= end {
        if weekdays.contains(&current.weekday()) {
            rows.push(Availability {
                preceptor_id: preceptor_id.to_string(),
                site_id: site_id.to_string(),
                date: current,
                is_available: true,
            });
        }
        current += Duration::days(1);
    }
    rows
}

/// Availability rows for every weekday (Mon-Fri) of `[start, end]`.
pub fn weekday_availability_all(
    preceptor_id: &str,
    site_id: &str,
    start: &str,
    end: &str,
) -> Vec<Availability> {
    weekday_availability(
        preceptor_id,
        site_id,
        start,
        end,
        &[
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ],
    )
}

/// Minimal bundle with one health system and one site, ready for pushes.
pub fn base_bundle() -> EntityBundle {
    EntityBundle {
        health_systems: vec![health_system("hs1")],
        sites: vec![site("site1", "hs1")],
        ..Default::default()
    }
}

pub fn build_context(
    period: SchedulingPeriod,
    bundle: &EntityBundle,
) -> SchedulingContext {
    SchedulingContext::build(period, bundle, vec![]).expect("fixture context")
}
