use std::collections::HashSet;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{
    AcademicQualification, Category, ExperienceYears, Opportunity, Volunteer, WorkStyle,
};

/// The session's entity collections. Owned by whoever constructs it and
/// passed by reference, so tests and commands each get an isolated instance.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EntityStore {
    pub volunteers: Vec<Volunteer>,
    pub opportunities: Vec<Opportunity>,
}

impl EntityStore {
    /// Load a JSON snapshot. Serde rejects malformed dates and unknown enum
    /// values here, so everything past this point compares cleanly.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let store: EntityStore = serde_json::from_str(&raw)?;
        store.validate()?;
        debug!(
            "loaded {} volunteers and {} opportunities from {}",
            store.volunteers.len(),
            store.opportunities.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        debug!("snapshot written to {}", path.display());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut volunteer_ids = HashSet::new();
        for volunteer in &self.volunteers {
            if !volunteer_ids.insert(volunteer.id) {
                return Err(AppError::validation(format!(
                    "duplicate volunteer id {}",
                    volunteer.id
                )));
            }
        }
        let mut opportunity_ids = HashSet::new();
        for opportunity in &self.opportunities {
            if !opportunity_ids.insert(opportunity.id) {
                return Err(AppError::validation(format!(
                    "duplicate opportunity id {}",
                    opportunity.id
                )));
            }
        }
        Ok(())
    }

    pub fn volunteer(&self, id: u64) -> Result<&Volunteer> {
        self.volunteers
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| AppError::not_found(format!("volunteer {id}")))
    }

    pub fn volunteer_mut(&mut self, id: u64) -> Result<&mut Volunteer> {
        self.volunteers
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| AppError::not_found(format!("volunteer {id}")))
    }

    pub fn opportunity(&self, id: u64) -> Result<&Opportunity> {
        self.opportunities
            .iter()
            .find(|o| o.id == id)
            .ok_or_else(|| AppError::not_found(format!("opportunity {id}")))
    }

    /// Replace a volunteer's profile wholesale (last write wins).
    pub fn update_volunteer(&mut self, updated: Volunteer) -> Result<()> {
        let slot = self.volunteer_mut(updated.id)?;
        *slot = updated;
        Ok(())
    }

    /// Import volunteers from a CSV export, upserting by email. Returns the
    /// number of newly inserted volunteers.
    pub fn import_volunteers_csv(&mut self, csv_path: &Path) -> Result<usize> {
        #[derive(Deserialize)]
        struct CsvRow {
            full_name: String,
            email: String,
            phone: String,
            city: String,
            university: Option<String>,
            specialization: String,
            points: u32,
            hours: u32,
        }

        let mut reader = csv::Reader::from_path(csv_path)?;
        let mut inserted = 0usize;
        let mut next_id = self.volunteers.iter().map(|v| v.id).max().unwrap_or(0) + 1;

        for result in reader.deserialize::<CsvRow>() {
            let row = result?;
            if let Some(existing) = self.volunteers.iter_mut().find(|v| v.email == row.email) {
                existing.full_name = row.full_name;
                existing.phone = row.phone;
                existing.city = row.city;
                existing.university = row.university.filter(|u| !u.is_empty());
                existing.specialization = row.specialization;
                existing.points = row.points;
                existing.hours = row.hours;
                continue;
            }

            let mut volunteer = blank_volunteer(next_id, &row.full_name, &row.email);
            volunteer.phone = row.phone;
            volunteer.city = row.city;
            volunteer.university = row.university.filter(|u| !u.is_empty());
            volunteer.specialization = row.specialization;
            volunteer.points = row.points;
            volunteer.hours = row.hours;
            self.volunteers.push(volunteer);
            next_id += 1;
            inserted += 1;
        }

        info!("imported {inserted} new volunteers from {}", csv_path.display());
        Ok(inserted)
    }

    /// Build the mock dataset the platform ships with.
    pub fn seed() -> Result<Self> {
        let volunteer_rows: Vec<(u64, &str, &str, &str, Option<&str>, &str, u32, u32)> = vec![
            (
                1,
                "أحمد بن خالد الرشيد",
                "ahmed@taww.sa",
                "الرياض",
                Some("جامعة شقراء"),
                "علوم الحاسب",
                1250,
                85,
            ),
            (
                2,
                "سارة عبدالله العتيبي",
                "sara@taww.sa",
                "جدة",
                Some("جامعة الملك عبدالعزيز"),
                "التسويق الرقمي",
                980,
                72,
            ),
            (
                3,
                "محمد صالح الزياد",
                "mohammed@taww.sa",
                "شقراء",
                Some("جامعة شقراء"),
                "علوم الحاسب",
                910,
                64,
            ),
            (
                4,
                "نورة فهد القحطاني",
                "noura@taww.sa",
                "الدمام",
                Some("جامعة الإمام عبدالرحمن بن فيصل"),
                "التصميم الجرافيكي",
                860,
                58,
            ),
            (
                5,
                "عبدالرزاق حسن الدوسري",
                "abdulrazzaq@taww.sa",
                "الرياض",
                Some("جامعة شقراء"),
                "هندسة البرمجيات",
                860,
                91,
            ),
            (
                6,
                "ريم ناصر الشمري",
                "reem@taww.sa",
                "حائل",
                Some("جامعة حائل"),
                "إدارة الأعمال",
                540,
                33,
            ),
            (
                7,
                "عثمان لقمان الحردلو",
                "othman@taww.sa",
                "الرياض",
                Some("جامعة شقراء"),
                "الأمن السيبراني",
                540,
                33,
            ),
            (
                8,
                "لمى سعود الحربي",
                "lama@taww.sa",
                "المدينة المنورة",
                None,
                "التمريض",
                420,
                47,
            ),
        ];

        let volunteers = volunteer_rows
            .into_iter()
            .map(
                |(id, name, email, city, university, specialization, points, hours)| {
                    let mut volunteer = blank_volunteer(id, name, email);
                    volunteer.city = city.to_string();
                    volunteer.university = university.map(str::to_string);
                    volunteer.specialization = specialization.to_string();
                    volunteer.points = points;
                    volunteer.hours = hours;
                    volunteer
                },
            )
            .collect();

        let opportunity_rows: Vec<(
            u64,
            &str,
            &str,
            Category,
            WorkStyle,
            &str,
            Vec<&str>,
            bool,
            u32,
            u32,
            f32,
            u32,
        )> = vec![
            (
                1,
                "تعليم الأطفال البرمجة",
                "جمعية طوع",
                Category::Education,
                WorkStyle::Onsite,
                "2026-10-15",
                vec!["تدريس", "Scratch", "تواصل"],
                true,
                150,
                20,
                4.8,
                34,
            ),
            (
                2,
                "حملة تشجير حي النخيل",
                "بيئتنا الخضراء",
                Category::Environmental,
                WorkStyle::Onsite,
                "2026-09-20",
                vec!["عمل ميداني", "زراعة"],
                false,
                90,
                8,
                4.5,
                21,
            ),
            (
                3,
                "تطوير موقع الجمعية",
                "جمعية طوع",
                Category::Tech,
                WorkStyle::Remote,
                "2026-11-01",
                vec!["React", "TypeScript", "API"],
                true,
                220,
                40,
                4.9,
                12,
            ),
            (
                4,
                "تصميم هوية بصرية لحملة الدم",
                "بنك الحياة",
                Category::Design,
                WorkStyle::Hybrid,
                "2026-09-05",
                vec!["Figma", "هوية بصرية"],
                false,
                120,
                16,
                4.2,
                9,
            ),
            (
                5,
                "إدارة حسابات التواصل الاجتماعي",
                "ملتقى الشباب",
                Category::Marketing,
                WorkStyle::Remote,
                "2026-12-10",
                vec!["تسويق", "كتابة محتوى"],
                false,
                100,
                12,
                4.0,
                17,
            ),
            (
                6,
                "فحوصات صحية مجانية",
                "صحة المجتمع",
                Category::Health,
                WorkStyle::Onsite,
                "2026-10-01",
                vec!["تمريض", "إسعافات أولية"],
                false,
                180,
                24,
                4.7,
                28,
            ),
            (
                7,
                "إعداد الميزانية السنوية",
                "جمعية البر",
                Category::Finance,
                WorkStyle::Hybrid,
                "2026-09-28",
                vec!["محاسبة", "Excel"],
                false,
                140,
                18,
                3.9,
                6,
            ),
            (
                8,
                "توزيع السلال الغذائية",
                "إطعام",
                Category::Social,
                WorkStyle::Onsite,
                "2026-09-12",
                vec!["عمل ميداني", "تنظيم"],
                true,
                80,
                6,
                4.6,
                41,
            ),
        ];

        let mut opportunities = Vec::new();
        for (
            id,
            title,
            organization,
            category,
            work_style,
            deadline,
            tags,
            is_featured,
            points,
            hours,
            rating,
            reviews_count,
        ) in opportunity_rows
        {
            let application_deadline = deadline
                .parse()
                .map_err(|_| AppError::validation(format!("invalid seed deadline {deadline}")))?;
            opportunities.push(Opportunity {
                id,
                title: title.to_string(),
                organization: organization.to_string(),
                summary: format!("فرصة تطوعية بعنوان {title} لدى {organization}."),
                volunteer_role: "متطوع ميداني".to_string(),
                city: Some("الرياض".to_string()),
                category,
                work_style,
                application_deadline,
                skill_tags: tags.into_iter().map(str::to_string).collect(),
                is_featured,
                points,
                hours,
                rating,
                reviews_count,
            });
        }

        Ok(EntityStore {
            volunteers,
            opportunities,
        })
    }
}

fn blank_volunteer(id: u64, full_name: &str, email: &str) -> Volunteer {
    Volunteer {
        id,
        full_name: full_name.to_string(),
        email: email.to_string(),
        phone: String::new(),
        city: String::new(),
        country: "السعودية".to_string(),
        short_bio: String::new(),
        university: None,
        specialization: String::new(),
        graduation_year: String::new(),
        current_job_title: None,
        academic_qualification: AcademicQualification::Student,
        experience_years: ExperienceYears::ZeroToOne,
        skills: Vec::new(),
        portfolio_link: None,
        points: 0,
        hours: 0,
        registered_opportunities: Vec::new(),
        badges: Default::default(),
        reviewed_opportunity_ids: Default::default(),
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::io::Write as _;

    pub fn sample_volunteer(id: u64, full_name: &str) -> Volunteer {
        blank_volunteer(id, full_name, &format!("v{id}@taww.sa"))
    }

    pub fn sample_opportunity(id: u64, title: &str) -> Opportunity {
        Opportunity {
            id,
            title: title.to_string(),
            organization: "جمعية طوع".to_string(),
            summary: String::new(),
            volunteer_role: String::new(),
            city: None,
            category: Category::Social,
            work_style: WorkStyle::Onsite,
            application_deadline: "2026-12-31".parse().unwrap(),
            skill_tags: Vec::new(),
            is_featured: false,
            points: 50,
            hours: 5,
            rating: 0.0,
            reviews_count: 0,
        }
    }

    #[test]
    fn seed_ids_are_unique() {
        let store = EntityStore::seed().unwrap();
        assert!(store.validate().is_ok());
        assert!(!store.volunteers.is_empty());
        assert!(!store.opportunities.is_empty());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = EntityStore::seed().unwrap();
        store.save(&path).unwrap();
        let reloaded = EntityStore::load(&path).unwrap();

        assert_eq!(reloaded.volunteers.len(), store.volunteers.len());
        assert_eq!(reloaded.opportunities.len(), store.opportunities.len());
        assert_eq!(reloaded.volunteer(1).unwrap().full_name, store.volunteer(1).unwrap().full_name);
    }

    #[test]
    fn load_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = EntityStore::seed().unwrap();
        let clone = store.volunteers[0].clone();
        store.volunteers.push(clone);
        store.save(&path).unwrap();

        assert!(matches!(
            EntityStore::load(&path),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn load_rejects_malformed_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let raw = serde_json::to_string(&EntityStore::seed().unwrap())
            .unwrap()
            .replace("2026-10-15", "2026-13-40");
        std::fs::write(&path, raw).unwrap();

        assert!(matches!(EntityStore::load(&path), Err(AppError::Json(_))));
    }

    #[test]
    fn csv_import_upserts_by_email() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("volunteers.csv");
        let mut file = std::fs::File::create(&csv_path).unwrap();
        writeln!(
            file,
            "full_name,email,phone,city,university,specialization,points,hours"
        )
        .unwrap();
        // Existing email: update in place.
        writeln!(
            file,
            "أحمد الرشيد,ahmed@taww.sa,0550000000,الرياض,جامعة شقراء,علوم الحاسب,1500,90"
        )
        .unwrap();
        // New email: insert with a fresh id.
        writeln!(
            file,
            "هند المطيري,hind@taww.sa,0551111111,تبوك,جامعة تبوك,القانون,10,2"
        )
        .unwrap();
        drop(file);

        let mut store = EntityStore::seed().unwrap();
        let before = store.volunteers.len();
        let inserted = store.import_volunteers_csv(&csv_path).unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.volunteers.len(), before + 1);
        assert_eq!(store.volunteer(1).unwrap().points, 1500);
        let hind = store.volunteers.iter().find(|v| v.email == "hind@taww.sa").unwrap();
        assert!(hind.id > 8);
        assert_eq!(hind.university.as_deref(), Some("جامعة تبوك"));
    }

    #[test]
    fn lookups_report_not_found() {
        let store = EntityStore::seed().unwrap();
        assert!(matches!(store.volunteer(999), Err(AppError::NotFound(_))));
        assert!(matches!(store.opportunity(999), Err(AppError::NotFound(_))));
    }
}
