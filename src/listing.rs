use crate::models::{Category, Opportunity, SortOption, WorkStyle};

pub const PAGE_SIZE: usize = 10;

/// Active listing predicates. `None` means "all" for that dimension, and a
/// blank search term disables the text predicate. Active predicates combine
/// with AND.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub category: Option<Category>,
    pub work_style: Option<WorkStyle>,
    pub search_term: Option<String>,
}

impl Filters {
    fn matches(&self, opportunity: &Opportunity) -> bool {
        if let Some(category) = self.category {
            if opportunity.category != category {
                return false;
            }
        }
        if let Some(work_style) = self.work_style {
            if opportunity.work_style != work_style {
                return false;
            }
        }
        if let Some(term) = self.search_term.as_deref() {
            let needle = term.trim().to_lowercase();
            if !needle.is_empty() && !searchable_text(opportunity).contains(&needle) {
                return false;
            }
        }
        true
    }
}

fn searchable_text(opportunity: &Opportunity) -> String {
    let mut fields = vec![
        opportunity.title.as_str(),
        opportunity.organization.as_str(),
    ];
    if let Some(city) = opportunity.city.as_deref() {
        fields.push(city);
    }
    fields.extend(opportunity.skill_tags.iter().map(String::as_str));
    fields.join(" ").to_lowercase()
}

pub fn filter_opportunities(all: &[Opportunity], filters: &Filters) -> Vec<Opportunity> {
    all.iter()
        .filter(|o| filters.matches(o))
        .cloned()
        .collect()
}

/// Order a filtered listing. `sort_by` is stable, which the default sort
/// relies on: featured opportunities move ahead as a group while each
/// group keeps its insertion order.
pub fn sort_opportunities(opportunities: &mut [Opportunity], sort: SortOption) {
    match sort {
        SortOption::Default => {
            opportunities.sort_by(|a, b| b.is_featured.cmp(&a.is_featured));
        }
        SortOption::DateAsc => {
            opportunities.sort_by(|a, b| a.application_deadline.cmp(&b.application_deadline));
        }
        SortOption::DateDesc => {
            opportunities.sort_by(|a, b| b.application_deadline.cmp(&a.application_deadline));
        }
        SortOption::PointsAsc => {
            opportunities.sort_by(|a, b| a.points.cmp(&b.points));
        }
        SortOption::PointsDesc => {
            opportunities.sort_by(|a, b| b.points.cmp(&a.points));
        }
        SortOption::RatingDesc => {
            opportunities.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        }
        SortOption::ReviewsDesc => {
            opportunities.sort_by(|a, b| b.reviews_count.cmp(&a.reviews_count));
        }
    }
}

pub fn list_opportunities(
    all: &[Opportunity],
    filters: &Filters,
    sort: SortOption,
) -> Vec<Opportunity> {
    let mut listed = filter_opportunities(all, filters);
    sort_opportunities(&mut listed, sort);
    listed
}

pub fn total_pages(count: usize) -> usize {
    count.div_ceil(PAGE_SIZE)
}

/// Slice one 1-based page out of a listing. Page zero clamps to the first
/// page; a page past the end is an empty slice, not an error, even when the
/// start offset would not fit in a usize.
pub fn paginate(listed: &[Opportunity], page: usize) -> &[Opportunity] {
    match page.max(1).checked_sub(1).and_then(|p| p.checked_mul(PAGE_SIZE)) {
        Some(start) if start < listed.len() => {
            let end = (start + PAGE_SIZE).min(listed.len());
            &listed[start..end]
        }
        _ => &[],
    }
}
