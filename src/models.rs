use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tech,
    Design,
    Finance,
    Marketing,
    Environmental,
    Social,
    Health,
    Education,
}

impl Category {
    /// Arabic display label, matching the platform's UI language.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Tech => "تقنية",
            Category::Design => "تصميم",
            Category::Finance => "مالية",
            Category::Marketing => "تسويق",
            Category::Environmental => "بيئية",
            Category::Social => "اجتماعية",
            Category::Health => "صحية",
            Category::Education => "تعليمية",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WorkStyle {
    Onsite,
    Remote,
    Hybrid,
}

impl WorkStyle {
    pub fn label(&self) -> &'static str {
        match self {
            WorkStyle::Onsite => "حضوري",
            WorkStyle::Remote => "عن بُعد",
            WorkStyle::Hybrid => "هجين",
        }
    }
}

impl fmt::Display for WorkStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered,
    Completed,
    Cancelled,
}

impl RegistrationStatus {
    /// An active registration blocks re-registration for the same opportunity.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RegistrationStatus::Registered | RegistrationStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicQualification {
    HighSchool,
    Diploma,
    Bachelor,
    Master,
    Phd,
    Student,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceYears {
    ZeroToOne,
    OneToThree,
    ThreeToFive,
    FiveToTen,
    TenPlus,
}

/// How the opportunity listing is ordered. `Default` keeps insertion order
/// except that featured opportunities move to the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortOption {
    Default,
    DateAsc,
    DateDesc,
    PointsAsc,
    PointsDesc,
    RatingDesc,
    ReviewsDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredOpportunity {
    pub opportunity_id: u64,
    pub status: RegistrationStatus,
    pub application_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: u64,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub country: String,
    pub short_bio: String,
    #[serde(default)]
    pub university: Option<String>,
    pub specialization: String,
    pub graduation_year: String,
    #[serde(default)]
    pub current_job_title: Option<String>,
    pub academic_qualification: AcademicQualification,
    pub experience_years: ExperienceYears,
    pub skills: Vec<String>,
    #[serde(default)]
    pub portfolio_link: Option<String>,
    // Platform-managed reputation fields.
    pub points: u32,
    pub hours: u32,
    #[serde(default)]
    pub registered_opportunities: Vec<RegisteredOpportunity>,
    #[serde(default)]
    pub badges: BTreeSet<u64>,
    #[serde(default)]
    pub reviewed_opportunity_ids: BTreeSet<u64>,
}

impl Volunteer {
    pub fn registration_for(&self, opportunity_id: u64) -> Option<&RegisteredOpportunity> {
        self.registered_opportunities
            .iter()
            .find(|r| r.opportunity_id == opportunity_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: u64,
    pub title: String,
    pub organization: String,
    pub summary: String,
    pub volunteer_role: String,
    #[serde(default)]
    pub city: Option<String>,
    pub category: Category,
    pub work_style: WorkStyle,
    pub application_deadline: NaiveDate,
    pub skill_tags: Vec<String>,
    #[serde(default)]
    pub is_featured: bool,
    pub points: u32,
    pub hours: u32,
    pub rating: f32,
    pub reviews_count: u32,
}

/// Per-university totals derived from the current volunteer collection.
/// Recomputed on every aggregation pass; never persisted or cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniversityStats {
    pub name: String,
    pub total_points: u32,
    pub total_hours: u32,
    pub volunteer_count: usize,
}
