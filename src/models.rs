use garde::Validate;
use jiff::{ToSpan, civil::Date};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    entities::{actor, country, genre, language, movie, movie::MovieStatus},
    error::{AppError, AppResult},
};

const MAX_NAME_CHARS: usize = 255;
const BUDGET_SCALE: u32 = 2;
const BUDGET_MAX_DIGITS: u32 = 15;

#[derive(Debug, Deserialize, Validate)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    #[garde(range(min = 1))]
    pub page: u64,
    #[serde(default = "default_per_page")]
    #[garde(range(min = 1, max = 20))]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    10
}

impl PaginationParams {
    /// Rows to skip, or `None` when the page lies past anything SQLite can
    /// address (offsets are bound as `i64`).
    pub fn offset(&self) -> Option<u64> {
        self.page
            .checked_sub(1)?
            .checked_mul(self.per_page)
            .filter(|offset| i64::try_from(*offset).is_ok())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageLinks {
    pub total_pages: u64,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

impl PageLinks {
    pub fn new(page: u64, per_page: u64, total_items: u64) -> Self {
        let total_pages = total_items.div_ceil(per_page);
        Self {
            total_pages,
            next_page: (page < total_pages).then(|| page + 1),
            prev_page: (page > 1).then(|| page - 1),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovieListItem {
    pub id: i32,
    pub name: String,
    pub date: Date,
    pub score: f64,
    pub overview: String,
}

impl TryFrom<movie::Model> for MovieListItem {
    type Error = AppError;

    fn try_from(row: movie::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            date: row.date.parse()?,
            name: row.name,
            score: row.score,
            overview: row.overview,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovieListResponse {
    pub movies: Vec<MovieListItem>,
    pub total_pages: u64,
    pub total_items: u64,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

impl MovieListResponse {
    pub fn new(movies: Vec<MovieListItem>, params: &PaginationParams, total_items: u64) -> Self {
        let links = PageLinks::new(params.page, params.per_page, total_items);
        Self {
            movies,
            total_pages: links.total_pages,
            total_items,
            next_page: links.next_page,
            prev_page: links.prev_page,
        }
    }
}

/// Country, genre, actor or language as nested in a movie.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReferenceView {
    pub id: i32,
    pub name: String,
}

impl From<country::Model> for ReferenceView {
    fn from(row: country::Model) -> Self {
        Self { id: row.id, name: row.name }
    }
}

impl From<genre::Model> for ReferenceView {
    fn from(row: genre::Model) -> Self {
        Self { id: row.id, name: row.name }
    }
}

impl From<actor::Model> for ReferenceView {
    fn from(row: actor::Model) -> Self {
        Self { id: row.id, name: row.name }
    }
}

impl From<language::Model> for ReferenceView {
    fn from(row: language::Model) -> Self {
        Self { id: row.id, name: row.name }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovieDetail {
    pub id: i32,
    pub name: String,
    pub date: Date,
    pub score: f64,
    pub overview: String,
    pub status: MovieStatus,
    pub budget: Decimal,
    pub revenue: f64,
    pub country: Option<ReferenceView>,
    pub genres: Vec<ReferenceView>,
    pub actors: Vec<ReferenceView>,
    pub languages: Vec<ReferenceView>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MovieCreate {
    #[garde(custom(check_name))]
    pub name: String,
    #[garde(custom(check_date))]
    pub date: Date,
    #[garde(custom(check_score))]
    pub score: f64,
    #[garde(skip)]
    pub overview: String,
    #[garde(skip)]
    pub status: MovieStatus,
    #[garde(custom(check_budget))]
    pub budget: Decimal,
    #[garde(custom(check_revenue))]
    pub revenue: f64,
    #[serde(default)]
    #[garde(custom(check_country))]
    pub country: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub country_id: Option<i32>,
    #[serde(default)]
    #[garde(custom(check_references))]
    pub genres: Vec<String>,
    #[serde(default)]
    #[garde(custom(check_references))]
    pub actors: Vec<String>,
    #[serde(default)]
    #[garde(custom(check_references))]
    pub languages: Vec<String>,
}

impl MovieCreate {
    pub fn country_ref(&self) -> AppResult<CountryRef> {
        country_ref(self.country.clone().map(Some), self.country_id.map(Some))
    }
}

/// Partial update payload. `None` means the field was not supplied; for
/// `country` and `country_id`, `Some(None)` clears the movie's country.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct MovieUpdate {
    #[serde(default)]
    #[garde(custom(check_optional_name))]
    pub name: Option<String>,
    #[serde(default)]
    #[garde(custom(check_optional_date))]
    pub date: Option<Date>,
    #[serde(default)]
    #[garde(custom(check_optional_score))]
    pub score: Option<f64>,
    #[serde(default)]
    #[garde(skip)]
    pub overview: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub status: Option<MovieStatus>,
    #[serde(default)]
    #[garde(custom(check_optional_budget))]
    pub budget: Option<Decimal>,
    #[serde(default)]
    #[garde(custom(check_optional_revenue))]
    pub revenue: Option<f64>,
    #[serde(default, deserialize_with = "present")]
    #[garde(custom(check_country_patch))]
    pub country: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    #[garde(skip)]
    pub country_id: Option<Option<i32>>,
    #[serde(default)]
    #[garde(custom(check_optional_references))]
    pub genres: Option<Vec<String>>,
    #[serde(default)]
    #[garde(custom(check_optional_references))]
    pub actors: Option<Vec<String>>,
    #[serde(default)]
    #[garde(custom(check_optional_references))]
    pub languages: Option<Vec<String>>,
}

impl MovieUpdate {
    pub fn country_ref(&self) -> AppResult<CountryRef> {
        country_ref(self.country.clone(), self.country_id)
    }
}

/// How a payload refers to the movie's country.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CountryRef {
    Keep,
    Clear,
    Name(String),
    Id(i32),
}

fn country_ref(name: Option<Option<String>>, id: Option<Option<i32>>) -> AppResult<CountryRef> {
    match (name, id) {
        (Some(_), Some(_)) => Err(AppError::Validation(
            "country: Give either a country name or a country_id, not both.".to_string(),
        )),
        (Some(Some(name)), None) => Ok(CountryRef::Name(name)),
        (None, Some(Some(id))) => Ok(CountryRef::Id(id)),
        (Some(None), None) | (None, Some(None)) => Ok(CountryRef::Clear),
        (None, None) => Ok(CountryRef::Keep),
    }
}

/// Distinguishes an explicit `null` from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Budget text as persisted: always two decimal places.
pub fn budget_text(budget: Decimal) -> String {
    let mut budget = budget;
    budget.rescale(BUDGET_SCALE);
    budget.to_string()
}

fn when_present<T>(value: Option<&T>, check: fn(&T, &()) -> garde::Result) -> garde::Result {
    value.map_or(Ok(()), |value| check(value, &()))
}

fn check_name(value: &String, _: &()) -> garde::Result {
    if value.chars().count() > MAX_NAME_CHARS {
        return Err(garde::Error::new("Name must not exceed 255 characters."));
    }
    Ok(())
}

fn check_optional_name(value: &Option<String>, _: &()) -> garde::Result {
    when_present(value.as_ref(), check_name)
}

/// Rejects dates more than 365 days after `today`.
pub fn date_within_a_year(date: Date, today: Date) -> bool {
    date <= today.saturating_add(365.days())
}

fn check_date(value: &Date, _: &()) -> garde::Result {
    let today: Date = jiff::Zoned::now().into();
    if !date_within_a_year(*value, today) {
        return Err(garde::Error::new("Date must not be more than one year in the future."));
    }
    Ok(())
}

fn check_optional_date(value: &Option<Date>, _: &()) -> garde::Result {
    when_present(value.as_ref(), check_date)
}

fn check_score(value: &f64, _: &()) -> garde::Result {
    if !(0.0..=100.0).contains(value) {
        return Err(garde::Error::new("Score must be between 0 and 100."));
    }
    Ok(())
}

fn check_optional_score(value: &Option<f64>, _: &()) -> garde::Result {
    when_present(value.as_ref(), check_score)
}

fn check_budget(value: &Decimal, _: &()) -> garde::Result {
    if *value < Decimal::ZERO {
        return Err(garde::Error::new("Budget must be non-negative."));
    }
    if value.normalize().scale() > BUDGET_SCALE {
        return Err(garde::Error::new("Budget must have at most 2 decimal places."));
    }
    let mut scaled = *value;
    scaled.rescale(BUDGET_SCALE);
    if scaled.mantissa().unsigned_abs() >= 10u128.pow(BUDGET_MAX_DIGITS) {
        return Err(garde::Error::new("Budget must have at most 15 digits."));
    }
    Ok(())
}

fn check_optional_budget(value: &Option<Decimal>, _: &()) -> garde::Result {
    when_present(value.as_ref(), check_budget)
}

fn check_revenue(value: &f64, _: &()) -> garde::Result {
    // NaN fails the comparison as well
    if !(*value >= 0.0) {
        return Err(garde::Error::new("Revenue must be non-negative."));
    }
    Ok(())
}

fn check_optional_revenue(value: &Option<f64>, _: &()) -> garde::Result {
    when_present(value.as_ref(), check_revenue)
}

fn check_reference(value: &String, _: &()) -> garde::Result {
    let len = value.trim().chars().count();
    if len == 0 || len > MAX_NAME_CHARS {
        return Err(garde::Error::new("Reference names must be 1 to 255 characters."));
    }
    Ok(())
}

fn check_country(value: &Option<String>, _: &()) -> garde::Result {
    when_present(value.as_ref(), check_reference)
}

fn check_country_patch(value: &Option<Option<String>>, _: &()) -> garde::Result {
    when_present(value.as_ref().and_then(Option::as_ref), check_reference)
}

fn check_references(value: &Vec<String>, _: &()) -> garde::Result {
    value.iter().try_for_each(|name| check_reference(name, &()))
}

fn check_optional_references(value: &Option<Vec<String>>, _: &()) -> garde::Result {
    when_present(value.as_ref(), check_references)
}

#[cfg(test)]
mod tests {
    use garde::Validate;
    use jiff::{ToSpan, civil::date};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    #[test]
    fn page_links_follow_position() {
        assert_eq!(
            PageLinks::new(1, 10, 25),
            PageLinks { total_pages: 3, next_page: Some(2), prev_page: None }
        );
        assert_eq!(
            PageLinks::new(2, 10, 25),
            PageLinks { total_pages: 3, next_page: Some(3), prev_page: Some(1) }
        );
        assert_eq!(
            PageLinks::new(3, 10, 25),
            PageLinks { total_pages: 3, next_page: None, prev_page: Some(2) }
        );
        assert_eq!(PageLinks::new(1, 20, 20).total_pages, 1);
        assert_eq!(PageLinks::new(1, 1, 7).total_pages, 7);
    }

    #[test]
    fn pagination_defaults_and_bounds() {
        let params: PaginationParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!((params.page, params.per_page), (1, 10));
        assert_eq!(params.offset(), Some(0));
        assert!(params.validate().is_ok());

        let params = PaginationParams { page: 3, per_page: 20 };
        assert_eq!(params.offset(), Some(40));
        assert!(params.validate().is_ok());

        assert!(PaginationParams { page: 0, per_page: 10 }.validate().is_err());
        assert!(PaginationParams { page: 1, per_page: 21 }.validate().is_err());
    }

    #[test]
    fn huge_pages_have_no_offset() {
        for (page, per_page) in
            [(u64::MAX, 1), (1_000_000_000_000_000_000, 20), (500_000_000_000_000_000, 20)]
        {
            assert_eq!(PaginationParams { page, per_page }.offset(), None, "{page}");
        }
        let last = i64::MAX as u64 + 1;
        assert_eq!(PaginationParams { page: last, per_page: 1 }.offset(), Some(i64::MAX as u64));
    }

    #[test]
    fn country_may_be_named_or_referenced_by_id() {
        let by_id: MovieUpdate = serde_json::from_value(json!({ "country_id": 3 })).unwrap();
        assert_eq!(by_id.country_ref().unwrap(), CountryRef::Id(3));

        let cleared: MovieUpdate = serde_json::from_value(json!({ "country_id": null })).unwrap();
        assert_eq!(cleared.country_ref().unwrap(), CountryRef::Clear);

        let untouched = MovieUpdate::default();
        assert_eq!(untouched.country_ref().unwrap(), CountryRef::Keep);

        let both: MovieUpdate =
            serde_json::from_value(json!({ "country": "US", "country_id": 3 })).unwrap();
        assert!(matches!(both.country_ref(), Err(AppError::Validation(_))));
    }

    #[test]
    fn release_date_window_is_one_year() {
        let today = date(2024, 3, 1);
        assert!(date_within_a_year(date(1900, 1, 1), today));
        assert!(date_within_a_year(today.saturating_add(365.days()), today));
        assert!(!date_within_a_year(today.saturating_add(366.days()), today));
    }

    #[test]
    fn budget_rules() {
        let ok = |s: &str| check_budget(&s.parse::<Decimal>().unwrap(), &()).is_ok();
        assert!(ok("0"));
        assert!(ok("160000000.00"));
        assert!(ok("9999999999999.99"));
        assert!(!ok("10000000000000"));
        assert!(!ok("-0.01"));
        assert!(!ok("1.005"));
        assert!(ok("1.500"));
    }

    #[test]
    fn budget_is_persisted_with_two_places() {
        assert_eq!(budget_text(Decimal::new(160_000_000, 0)), "160000000.00");
        assert_eq!(budget_text(Decimal::new(15, 1)), "1.50");
    }

    #[test]
    fn create_payload_messages_name_the_field() {
        let payload: MovieCreate = serde_json::from_value(json!({
            "name": "Inception",
            "date": "2010-07-16",
            "score": 120,
            "overview": "",
            "status": "Post Production",
            "budget": 1,
            "revenue": -1
        }))
        .unwrap();
        assert_eq!(payload.status, MovieStatus::PostProduction);

        let report = payload.validate().unwrap_err();
        let message = crate::error::AppError::from(report).to_string();
        assert!(message.contains("score: Score must be between 0 and 100."));
        assert!(message.contains("revenue: Revenue must be non-negative."));
    }

    #[test]
    fn update_tracks_explicit_null_country() {
        let absent: MovieUpdate = serde_json::from_value(json!({ "score": 1 })).unwrap();
        assert_eq!(absent.country, None);
        assert_eq!(absent.score, Some(1.0));

        let cleared: MovieUpdate = serde_json::from_value(json!({ "country": null })).unwrap();
        assert_eq!(cleared.country, Some(None));
        assert!(cleared.validate().is_ok());

        let blank: MovieUpdate = serde_json::from_value(json!({ "country": "" })).unwrap();
        assert!(blank.validate().is_err());

        let ignored: MovieUpdate = serde_json::from_value(json!({ "tagline": "x" })).unwrap();
        assert!(ignored.name.is_none() && ignored.validate().is_ok());
    }
}
