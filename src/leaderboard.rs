use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::{UniversityStats, Volunteer};

/// Group volunteers by university and sum their reputation totals.
///
/// Volunteers without a university are excluded entirely; there is no
/// "unknown" bucket. The result carries no ordering promise of its own,
/// callers rank it with [`rank_universities`].
pub fn aggregate_by_university(volunteers: &[Volunteer]) -> Vec<UniversityStats> {
    let mut map: HashMap<&str, (u32, u32, usize)> = HashMap::new();

    for volunteer in volunteers {
        let Some(university) = volunteer.university.as_deref() else {
            continue;
        };
        if university.is_empty() {
            continue;
        }
        let entry = map.entry(university).or_insert((0, 0, 0));
        entry.0 += volunteer.points;
        entry.1 += volunteer.hours;
        entry.2 += 1;
    }

    map.into_iter()
        .map(
            |(name, (total_points, total_hours, volunteer_count))| UniversityStats {
                name: name.to_string(),
                total_points,
                total_hours,
                volunteer_count,
            },
        )
        .collect()
}

fn compare_volunteers(a: &Volunteer, b: &Volunteer) -> Ordering {
    b.points
        .cmp(&a.points)
        .then(b.hours.cmp(&a.hours))
        .then_with(|| a.full_name.cmp(&b.full_name))
}

/// Total order over volunteers: points desc, hours desc, name asc.
///
/// The name tie-break makes the order fully deterministic so pagination is
/// stable and no two volunteers can report the same rank.
pub fn rank_volunteers(volunteers: &[Volunteer]) -> Vec<Volunteer> {
    let mut ordered = volunteers.to_vec();
    ordered.sort_by(compare_volunteers);
    ordered
}

/// Total order over universities: total points desc, total hours desc,
/// member count desc.
pub fn rank_universities(stats: &[UniversityStats]) -> Vec<UniversityStats> {
    let mut ordered = stats.to_vec();
    ordered.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then(b.total_hours.cmp(&a.total_hours))
            .then(b.volunteer_count.cmp(&a.volunteer_count))
    });
    ordered
}

/// 1-based rank of the volunteer with the given id within an ordered slice.
pub fn volunteer_rank(ordered: &[Volunteer], id: u64) -> Result<usize> {
    ordered
        .iter()
        .position(|v| v.id == id)
        .map(|index| index + 1)
        .ok_or_else(|| AppError::not_found(format!("volunteer {id} is not ranked")))
}

/// 1-based rank of the named university within an ordered slice.
pub fn university_rank(ordered: &[UniversityStats], name: &str) -> Result<usize> {
    ordered
        .iter()
        .position(|u| u.name == name)
        .map(|index| index + 1)
        .ok_or_else(|| AppError::not_found(format!("university {name} is not ranked")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_volunteer;

    fn scored(id: u64, name: &str, university: Option<&str>, points: u32, hours: u32) -> Volunteer {
        let mut volunteer = sample_volunteer(id, name);
        volunteer.university = university.map(str::to_string);
        volunteer.points = points;
        volunteer.hours = hours;
        volunteer
    }

    #[test]
    fn aggregation_sums_per_university() {
        let volunteers = vec![
            scored(1, "سارة", Some("جامعة شقراء"), 100, 20),
            scored(2, "أحمد", Some("جامعة شقراء"), 50, 10),
            scored(3, "منى", Some("جامعة الملك سعود"), 70, 5),
        ];

        let mut stats = aggregate_by_university(&volunteers);
        stats.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(stats.len(), 2);
        let shaqra = stats.iter().find(|s| s.name == "جامعة شقراء").unwrap();
        assert_eq!(shaqra.total_points, 150);
        assert_eq!(shaqra.total_hours, 30);
        assert_eq!(shaqra.volunteer_count, 2);
    }

    #[test]
    fn aggregation_excludes_missing_university() {
        let volunteers = vec![
            scored(1, "سارة", Some("جامعة شقراء"), 100, 20),
            scored(2, "أحمد", None, 50, 10),
            scored(3, "منى", Some(""), 70, 5),
        ];

        let stats = aggregate_by_university(&volunteers);
        assert_eq!(stats.len(), 1);

        // Conservation: totals equal the sum over volunteers that have a
        // non-empty university, nothing more.
        let total: u32 = stats.iter().map(|s| s.total_points).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn aggregation_of_empty_input_is_empty() {
        assert!(aggregate_by_university(&[]).is_empty());
    }

    #[test]
    fn volunteer_order_breaks_ties_by_hours_then_name() {
        let volunteers = vec![
            scored(1, "B", None, 100, 20),
            scored(2, "A", None, 100, 20),
            scored(3, "C", None, 150, 5),
        ];

        let ordered = rank_volunteers(&volunteers);
        let ids: Vec<u64> = ordered.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        assert_eq!(volunteer_rank(&ordered, 3).unwrap(), 1);
        assert_eq!(volunteer_rank(&ordered, 2).unwrap(), 2);
        assert_eq!(volunteer_rank(&ordered, 1).unwrap(), 3);
    }

    #[test]
    fn volunteer_order_is_deterministic() {
        let volunteers = vec![
            scored(1, "خالد", None, 80, 12),
            scored(2, "سارة", None, 80, 12),
            scored(3, "أحمد", None, 80, 30),
        ];

        let first = rank_volunteers(&volunteers);
        let second = rank_volunteers(&volunteers);
        let first_ids: Vec<u64> = first.iter().map(|v| v.id).collect();
        let second_ids: Vec<u64> = second.iter().map(|v| v.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn ranks_are_unique_and_cover_the_range() {
        let volunteers = vec![
            scored(1, "A", None, 50, 1),
            scored(2, "B", None, 50, 1),
            scored(3, "C", None, 50, 1),
            scored(4, "D", None, 90, 1),
        ];

        let ordered = rank_volunteers(&volunteers);
        let mut ranks: Vec<usize> = volunteers
            .iter()
            .map(|v| volunteer_rank(&ordered, v.id).unwrap())
            .collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn university_order_uses_successive_tie_breaks() {
        let stats = vec![
            UniversityStats {
                name: "أ".to_string(),
                total_points: 100,
                total_hours: 40,
                volunteer_count: 3,
            },
            UniversityStats {
                name: "ب".to_string(),
                total_points: 100,
                total_hours: 60,
                volunteer_count: 2,
            },
            UniversityStats {
                name: "ج".to_string(),
                total_points: 100,
                total_hours: 40,
                volunteer_count: 5,
            },
        ];

        let ordered = rank_universities(&stats);
        let names: Vec<&str> = ordered.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["ب", "ج", "أ"]);
    }

    #[test]
    fn rank_lookup_of_unknown_id_is_not_found() {
        let ordered = rank_volunteers(&[]);
        assert!(matches!(
            volunteer_rank(&ordered, 42),
            Err(crate::error::AppError::NotFound(_))
        ));
        assert!(matches!(
            university_rank(&[], "جامعة شقراء"),
            Err(crate::error::AppError::NotFound(_))
        ));
    }
}
