use std::collections::BTreeSet;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityName, EntityTrait,
    IntoActiveModel, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait, sea_query::OnConflict,
};
use tracing::debug;

use crate::{
    entities::{actor, country, genre, language, movie, movie_actor, movie_genre, movie_language},
    error::{AppError, AppResult, COUNTRY_NOT_FOUND, NO_MOVIES_FOUND, movie_write_error},
    models::{
        CountryRef, MovieCreate, MovieDetail, MovieListItem, MovieListResponse, MovieUpdate,
        PaginationParams, budget_text,
    },
};

#[derive(Clone)]
pub struct MovieStore {
    db: DatabaseConnection,
}

impl MovieStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list(&self, params: &PaginationParams) -> AppResult<MovieListResponse> {
        let Some(offset) = params.offset() else {
            debug!(page = params.page, per_page = params.per_page, "page offset out of range");
            return Err(AppError::NotFound(NO_MOVIES_FOUND.to_string()));
        };

        let rows = movie::Entity::find()
            .order_by_desc(movie::Column::Id)
            .offset(offset)
            .limit(params.per_page)
            .all(&self.db)
            .await?;

        if rows.is_empty() {
            debug!(page = params.page, per_page = params.per_page, "empty movie page");
            return Err(AppError::NotFound(NO_MOVIES_FOUND.to_string()));
        }

        let total_items = movie::Entity::find().count(&self.db).await?;
        let movies =
            rows.into_iter().map(MovieListItem::try_from).collect::<AppResult<Vec<_>>>()?;

        Ok(MovieListResponse::new(movies, params, total_items))
    }

    pub async fn get(&self, id: i32) -> AppResult<MovieDetail> {
        let txn = self.db.begin().await?;
        let row = find_movie(&txn, id).await?;
        let detail = load_detail(&txn, row).await?;
        txn.commit().await?;
        Ok(detail)
    }

    pub async fn create(&self, input: MovieCreate) -> AppResult<MovieDetail> {
        let country = input.country_ref()?;
        let date = input.date.to_string();
        let txn = self.db.begin().await?;

        let existing = movie::Entity::find()
            .filter(movie::Column::Name.eq(input.name.as_str()))
            .filter(movie::Column::Date.eq(date.as_str()))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(AppError::duplicate_movie());
        }

        let country_id = resolve_country(&txn, country).await?.flatten();

        let row = movie::ActiveModel {
            id: Default::default(),
            name: Set(input.name),
            date: Set(date),
            score: Set(input.score),
            overview: Set(input.overview),
            status: Set(input.status),
            budget: Set(budget_text(input.budget)),
            revenue: Set(input.revenue),
            country_id: Set(country_id),
        }
        .insert(&txn)
        .await
        .map_err(movie_write_error)?;

        replace_links::<movie_genre::Entity, _>(&txn, row.id, &input.genres).await?;
        replace_links::<movie_actor::Entity, _>(&txn, row.id, &input.actors).await?;
        replace_links::<movie_language::Entity, _>(&txn, row.id, &input.languages).await?;

        let detail = load_detail(&txn, row).await?;
        txn.commit().await?;

        debug!(movie_id = detail.id, "movie created");
        Ok(detail)
    }

    pub async fn update(&self, id: i32, input: MovieUpdate) -> AppResult<MovieDetail> {
        let country = input.country_ref()?;
        let txn = self.db.begin().await?;
        let row = find_movie(&txn, id).await?;

        let mut staged = row.clone().into_active_model();
        if let Some(name) = input.name {
            staged.name = Set(name);
        }
        if let Some(date) = input.date {
            staged.date = Set(date.to_string());
        }
        if let Some(score) = input.score {
            staged.score = Set(score);
        }
        if let Some(overview) = input.overview {
            staged.overview = Set(overview);
        }
        if let Some(status) = input.status {
            staged.status = Set(status);
        }
        if let Some(budget) = input.budget {
            staged.budget = Set(budget_text(budget));
        }
        if let Some(revenue) = input.revenue {
            staged.revenue = Set(revenue);
        }
        if let Some(country_id) = resolve_country(&txn, country).await? {
            staged.country_id = Set(country_id);
        }

        let row = if staged.is_changed() {
            staged.update(&txn).await.map_err(movie_write_error)?
        } else {
            row
        };

        if let Some(genres) = input.genres {
            replace_links::<movie_genre::Entity, _>(&txn, id, &genres).await?;
        }
        if let Some(actors) = input.actors {
            replace_links::<movie_actor::Entity, _>(&txn, id, &actors).await?;
        }
        if let Some(languages) = input.languages {
            replace_links::<movie_language::Entity, _>(&txn, id, &languages).await?;
        }

        let detail = load_detail(&txn, row).await?;
        txn.commit().await?;

        debug!(movie_id = id, "movie updated");
        Ok(detail)
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let txn = self.db.begin().await?;
        find_movie(&txn, id).await?;

        clear_links::<movie_genre::Entity, _>(&txn, id).await?;
        clear_links::<movie_actor::Entity, _>(&txn, id).await?;
        clear_links::<movie_language::Entity, _>(&txn, id).await?;
        movie::Entity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;

        debug!(movie_id = id, "movie deleted");
        Ok(())
    }
}

async fn find_movie<C: ConnectionTrait>(conn: &C, id: i32) -> AppResult<movie::Model> {
    movie::Entity::find_by_id(id).one(conn).await?.ok_or_else(AppError::movie_not_found)
}

/// One query per relation, regardless of how many rows each holds.
async fn load_detail<C: ConnectionTrait>(conn: &C, row: movie::Model) -> AppResult<MovieDetail> {
    let country = match row.country_id {
        Some(_) => row.find_related(country::Entity).one(conn).await?,
        None => None,
    };
    let genres =
        row.find_related(genre::Entity).order_by_asc(genre::Column::Id).all(conn).await?;
    let actors =
        row.find_related(actor::Entity).order_by_asc(actor::Column::Id).all(conn).await?;
    let languages = row
        .find_related(language::Entity)
        .order_by_asc(language::Column::Id)
        .all(conn)
        .await?;

    Ok(MovieDetail {
        id: row.id,
        date: row.date.parse()?,
        budget: row.budget.parse()?,
        name: row.name,
        score: row.score,
        overview: row.overview,
        status: row.status,
        revenue: row.revenue,
        country: country.map(Into::into),
        genres: genres.into_iter().map(Into::into).collect(),
        actors: actors.into_iter().map(Into::into).collect(),
        languages: languages.into_iter().map(Into::into).collect(),
    })
}

/// A shared lookup table keyed by a unique `name` column.
trait NamedReference: EntityTrait {
    type Row: ActiveModelTrait<Entity = Self> + Send;

    fn name_column() -> Self::Column;
    fn new_row(name: &str) -> Self::Row;
    fn row_id(row: &Self::Model) -> i32;
}

impl NamedReference for country::Entity {
    type Row = country::ActiveModel;

    fn name_column() -> country::Column {
        country::Column::Name
    }

    fn new_row(name: &str) -> country::ActiveModel {
        country::ActiveModel { id: Default::default(), name: Set(name.to_string()) }
    }

    fn row_id(row: &country::Model) -> i32 {
        row.id
    }
}

impl NamedReference for genre::Entity {
    type Row = genre::ActiveModel;

    fn name_column() -> genre::Column {
        genre::Column::Name
    }

    fn new_row(name: &str) -> genre::ActiveModel {
        genre::ActiveModel { id: Default::default(), name: Set(name.to_string()) }
    }

    fn row_id(row: &genre::Model) -> i32 {
        row.id
    }
}

impl NamedReference for actor::Entity {
    type Row = actor::ActiveModel;

    fn name_column() -> actor::Column {
        actor::Column::Name
    }

    fn new_row(name: &str) -> actor::ActiveModel {
        actor::ActiveModel { id: Default::default(), name: Set(name.to_string()) }
    }

    fn row_id(row: &actor::Model) -> i32 {
        row.id
    }
}

impl NamedReference for language::Entity {
    type Row = language::ActiveModel;

    fn name_column() -> language::Column {
        language::Column::Name
    }

    fn new_row(name: &str) -> language::ActiveModel {
        language::ActiveModel { id: Default::default(), name: Set(name.to_string()) }
    }

    fn row_id(row: &language::Model) -> i32 {
        row.id
    }
}

/// Junction table between movies and one kind of reference.
trait MovieLink: EntityTrait {
    type Reference: NamedReference;
    type Row: ActiveModelTrait<Entity = Self> + Send;

    fn movie_column() -> Self::Column;
    fn new_link(movie_id: i32, reference_id: i32) -> Self::Row;
}

impl MovieLink for movie_genre::Entity {
    type Reference = genre::Entity;
    type Row = movie_genre::ActiveModel;

    fn movie_column() -> movie_genre::Column {
        movie_genre::Column::MovieId
    }

    fn new_link(movie_id: i32, genre_id: i32) -> movie_genre::ActiveModel {
        movie_genre::ActiveModel { movie_id: Set(movie_id), genre_id: Set(genre_id) }
    }
}

impl MovieLink for movie_actor::Entity {
    type Reference = actor::Entity;
    type Row = movie_actor::ActiveModel;

    fn movie_column() -> movie_actor::Column {
        movie_actor::Column::MovieId
    }

    fn new_link(movie_id: i32, actor_id: i32) -> movie_actor::ActiveModel {
        movie_actor::ActiveModel { movie_id: Set(movie_id), actor_id: Set(actor_id) }
    }
}

impl MovieLink for movie_language::Entity {
    type Reference = language::Entity;
    type Row = movie_language::ActiveModel;

    fn movie_column() -> movie_language::Column {
        movie_language::Column::MovieId
    }

    fn new_link(movie_id: i32, language_id: i32) -> movie_language::ActiveModel {
        movie_language::ActiveModel { movie_id: Set(movie_id), language_id: Set(language_id) }
    }
}

/// Reference rows are shared between movies: insert when missing, then read
/// the id back so concurrent inserts of the same name converge on one row.
async fn reference_id<E, C>(conn: &C, name: &str) -> AppResult<i32>
where
    E: NamedReference,
    E::Model: IntoActiveModel<E::Row>,
    C: ConnectionTrait,
{
    E::insert(E::new_row(name))
        .on_conflict(OnConflict::column(E::name_column()).do_nothing().to_owned())
        .exec_without_returning(conn)
        .await?;

    let row = E::find()
        .filter(E::name_column().eq(name))
        .one(conn)
        .await?
        .ok_or_else(|| {
            anyhow::anyhow!("{} row {name:?} missing after insert", E::default().table_name())
        })?;
    Ok(E::row_id(&row))
}

/// Resolves the payload's country reference. `None` leaves the movie's
/// country as it is.
async fn resolve_country<C: ConnectionTrait>(
    conn: &C,
    country: CountryRef,
) -> AppResult<Option<Option<i32>>> {
    match country {
        CountryRef::Keep => Ok(None),
        CountryRef::Clear => Ok(Some(None)),
        CountryRef::Name(name) => {
            Ok(Some(Some(reference_id::<country::Entity, _>(conn, name.trim()).await?)))
        },
        CountryRef::Id(id) => {
            let row = country::Entity::find_by_id(id)
                .one(conn)
                .await?
                .ok_or_else(|| AppError::Validation(COUNTRY_NOT_FOUND.to_string()))?;
            Ok(Some(Some(row.id)))
        },
    }
}

/// Trimmed names with duplicates removed, in first-seen order.
fn distinct_names(names: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    names.iter().map(|n| n.trim()).filter(|n| seen.insert(*n)).collect()
}

async fn clear_links<L: MovieLink, C: ConnectionTrait>(conn: &C, movie_id: i32) -> AppResult<()> {
    L::delete_many().filter(L::movie_column().eq(movie_id)).exec(conn).await?;
    Ok(())
}

async fn replace_links<L, C>(conn: &C, movie_id: i32, names: &[String]) -> AppResult<()>
where
    L: MovieLink,
    L::Model: IntoActiveModel<<L as MovieLink>::Row>,
    <L::Reference as EntityTrait>::Model:
        IntoActiveModel<<L::Reference as NamedReference>::Row>,
    C: ConnectionTrait,
{
    clear_links::<L, C>(conn, movie_id).await?;
    for name in distinct_names(names) {
        let reference_id = reference_id::<L::Reference, C>(conn, name).await?;
        L::insert(L::new_link(movie_id, reference_id)).exec_without_returning(conn).await?;
    }
    Ok(())
}
