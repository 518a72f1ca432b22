use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use garde::Validate;

use crate::{
    AppState,
    error::AppResult,
    models::{MovieCreate, MovieDetail, MovieListResponse, MovieUpdate, PaginationParams},
};

pub async fn list_movies(
    State(state): State<Arc<AppState>>,
    params: Result<Query<PaginationParams>, QueryRejection>,
) -> AppResult<Json<MovieListResponse>> {
    let Query(params) = params?;
    params.validate()?;

    Ok(Json(state.store.list(&params).await?))
}

pub async fn get_movie(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i32>, PathRejection>,
) -> AppResult<Json<MovieDetail>> {
    let Path(id) = id?;

    Ok(Json(state.store.get(id).await?))
}

pub async fn create_movie(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MovieCreate>, JsonRejection>,
) -> AppResult<(StatusCode, Json<MovieDetail>)> {
    let Json(payload) = payload?;
    payload.validate()?;

    let detail = state.store.create(payload).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn update_movie(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i32>, PathRejection>,
    payload: Result<Json<MovieUpdate>, JsonRejection>,
) -> AppResult<Json<MovieDetail>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    payload.validate()?;

    Ok(Json(state.store.update(id, payload).await?))
}

pub async fn delete_movie(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i32>, PathRejection>,
) -> AppResult<StatusCode> {
    let Path(id) = id?;
    state.store.delete(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use jiff::ToSpan;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::{AppState, app, config::Config, db, store::MovieStore};

    async fn test_app() -> Router {
        let config = Config {
            addr: "127.0.0.1:0".parse().unwrap(),
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            db_connect_timeout_secs: 5,
        };
        let db = db::connect_and_migrate(&config).await.unwrap();
        app(Arc::new(AppState { store: MovieStore::new(db) }))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn names(list: &Value) -> Vec<Value> {
        list.as_array().unwrap().iter().map(|item| item["name"].clone()).collect()
    }

    fn inception() -> Value {
        json!({
            "name": "Inception",
            "date": "2010-07-16",
            "score": 87,
            "overview": "A thief who steals corporate secrets through dream-sharing.",
            "status": "Released",
            "budget": 160000000.00,
            "revenue": 836800000
        })
    }

    fn movie(name: &str, date: &str) -> Value {
        json!({
            "name": name,
            "date": date,
            "score": 50.5,
            "overview": "",
            "status": "In Production",
            "budget": "1000.50",
            "revenue": 0
        })
    }

    #[tokio::test]
    async fn movie_lifecycle() {
        let app = test_app().await;

        let (status, created) = send(&app, "POST", "/movies/", Some(inception())).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["budget"], "160000000.00");
        assert_eq!(created["country"], Value::Null);
        assert_eq!(created["genres"], json!([]));

        let (status, body) = send(&app, "POST", "/movies/", Some(inception())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Movie with the same name and date already exists.");

        let (status, fetched) = send(&app, "GET", &format!("/movies/{id}/"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, patched) =
            send(&app, "PATCH", &format!("/movies/{id}"), Some(json!({ "score": 90 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["score"], 90.0);
        for field in ["name", "date", "overview", "status", "budget", "revenue", "country"] {
            assert_eq!(patched[field], created[field], "{field} changed");
        }

        let (status, body) = send(&app, "DELETE", &format!("/movies/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, body) = send(&app, "GET", &format!("/movies/{id}/"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Movie with the given ID was not found.");
    }

    #[tokio::test]
    async fn duplicate_name_and_date_conflicts_regardless_of_other_fields() {
        let app = test_app().await;
        send(&app, "POST", "/movies/", Some(movie("Heat", "1995-12-15"))).await;

        let mut other = movie("Heat", "1995-12-15");
        other["score"] = json!(99);
        other["status"] = json!("Released");
        let (status, _) = send(&app, "POST", "/movies/", Some(other)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "POST", "/movies/", Some(movie("Heat", "1986-01-01"))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn list_paginates_newest_first() {
        let app = test_app().await;
        for (name, date) in [("A", "2001-01-01"), ("B", "2002-02-02"), ("C", "2003-03-03")] {
            let (status, _) = send(&app, "POST", "/movies/", Some(movie(name, date))).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, first) = send(&app, "GET", "/movies/?page=1&per_page=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&first["movies"]), vec![json!("C"), json!("B")]);
        assert_eq!(first["total_items"], 3);
        assert_eq!(first["total_pages"], 2);
        assert_eq!(first["next_page"], 2);
        assert_eq!(first["prev_page"], Value::Null);
        assert!(first["movies"][0].get("status").is_none());

        let (status, second) = send(&app, "GET", "/movies/?page=2&per_page=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["movies"].as_array().unwrap().len(), 1);
        assert_eq!(second["next_page"], Value::Null);
        assert_eq!(second["prev_page"], 1);

        let (status, body) = send(&app, "GET", "/movies/?page=3&per_page=2", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "No movies found.");

        let (status, defaults) = send(&app, "GET", "/movies/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(defaults["total_pages"], 1);
        assert_eq!(defaults["movies"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn list_rejects_out_of_range_pagination() {
        let app = test_app().await;

        let (status, _) = send(&app, "GET", "/movies/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        for uri in [
            "/movies/?page=0",
            "/movies/?per_page=0",
            "/movies/?per_page=21",
            "/movies/?page=x",
        ] {
            let (status, _) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        }
    }

    #[tokio::test]
    async fn pages_beyond_any_offset_are_not_found() {
        let app = test_app().await;
        let (status, _) = send(&app, "POST", "/movies/", Some(inception())).await;
        assert_eq!(status, StatusCode::CREATED);

        for uri in [
            "/movies/?page=18446744073709551615",
            "/movies/?page=1000000000000000000&per_page=20",
        ] {
            let (status, body) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["detail"], "No movies found.");
        }
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected_before_storage() {
        let app = test_app().await;
        let too_late: jiff::civil::Date = jiff::Zoned::now().into();
        let too_late = too_late.saturating_add(400.days()).to_string();

        let cases = [
            ("score", json!(100.5)),
            ("score", json!(-1)),
            ("budget", json!(-0.01)),
            ("budget", json!("12.345")),
            ("budget", json!("10000000000000.00")),
            ("revenue", json!(-5)),
            ("date", json!(too_late)),
            ("name", json!("x".repeat(256))),
            ("status", json!("Cancelled")),
            ("genres", json!(["  "])),
        ];
        for (field, value) in cases {
            let mut payload = inception();
            payload[field] = value;
            let (status, _) = send(&app, "POST", "/movies/", Some(payload)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{field}");
        }

        let (status, _) = send(&app, "GET", "/movies/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn relations_are_resolved_by_name_and_shared() {
        let app = test_app().await;
        let mut payload = inception();
        payload["country"] = json!("US");
        payload["genres"] = json!(["Sci-Fi", "Action", "Sci-Fi"]);
        payload["actors"] = json!(["Leonardo DiCaprio", "Elliot Page"]);
        payload["languages"] = json!(["English", "Japanese"]);

        let (status, first) = send(&app, "POST", "/movies/", Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["country"]["name"], "US");
        assert_eq!(names(&first["genres"]), vec![json!("Sci-Fi"), json!("Action")]);
        assert_eq!(first["actors"].as_array().unwrap().len(), 2);
        assert_eq!(first["languages"].as_array().unwrap().len(), 2);

        let mut payload = movie("Interstellar", "2014-11-07");
        payload["country"] = json!("US");
        payload["genres"] = json!(["Sci-Fi"]);
        let (_, second) = send(&app, "POST", "/movies/", Some(payload)).await;
        assert_eq!(second["country"]["id"], first["country"]["id"]);
        assert_eq!(second["genres"][0]["id"], first["genres"][0]["id"]);

        // deleting a movie leaves shared reference rows in place
        let first_id = first["id"].as_i64().unwrap();
        let (status, _) = send(&app, "DELETE", &format!("/movies/{first_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let second_id = second["id"].as_i64().unwrap();
        let (_, second) = send(&app, "GET", &format!("/movies/{second_id}/"), None).await;
        assert_eq!(second["genres"][0]["name"], "Sci-Fi");
        assert_eq!(second["country"]["name"], "US");
    }

    #[tokio::test]
    async fn country_can_be_referenced_by_id() {
        let app = test_app().await;
        let mut payload = inception();
        payload["country"] = json!("US");
        let (_, first) = send(&app, "POST", "/movies/", Some(payload)).await;
        let us = first["country"]["id"].clone();

        let mut payload = movie("Dunkirk", "2017-07-21");
        payload["country_id"] = us.clone();
        let (status, second) = send(&app, "POST", "/movies/", Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["country"], first["country"]);

        let (_, third) = send(&app, "POST", "/movies/", Some(movie("Tenet", "2020-08-26"))).await;
        let id = third["id"].as_i64().unwrap();
        let (status, patched) =
            send(&app, "PATCH", &format!("/movies/{id}"), Some(json!({ "country_id": us }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["country"]["name"], "US");

        let (status, cleared) =
            send(&app, "PATCH", &format!("/movies/{id}"), Some(json!({ "country_id": null })))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["country"], Value::Null);
    }

    #[tokio::test]
    async fn bad_country_id_is_rejected() {
        let app = test_app().await;

        let mut payload = inception();
        payload["country_id"] = json!(404);
        let (status, body) = send(&app, "POST", "/movies/", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"], "country_id: Country with the given ID was not found.");

        let mut payload = inception();
        payload["country"] = json!("US");
        payload["country_id"] = json!(1);
        let (status, _) = send(&app, "POST", "/movies/", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, "GET", "/movies/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, created) = send(&app, "POST", "/movies/", Some(inception())).await;
        let id = created["id"].as_i64().unwrap();
        let (status, _) =
            send(&app, "PATCH", &format!("/movies/{id}"), Some(json!({ "country_id": 404 }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn patch_replaces_supplied_relations_only() {
        let app = test_app().await;
        let mut payload = inception();
        payload["country"] = json!("US");
        payload["genres"] = json!(["Sci-Fi"]);
        payload["actors"] = json!(["Tom Hardy"]);
        let (_, created) = send(&app, "POST", "/movies/", Some(payload)).await;
        let id = created["id"].as_i64().unwrap();

        let (status, patched) = send(
            &app,
            "PATCH",
            &format!("/movies/{id}"),
            Some(json!({ "genres": ["Thriller", "Heist"], "country": null, "rating": "PG-13" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["country"], Value::Null);
        assert_eq!(names(&patched["genres"]), vec![json!("Thriller"), json!("Heist")]);
        assert_eq!(patched["actors"], created["actors"]);
        assert_eq!(patched["score"], created["score"]);
        assert!(patched.get("rating").is_none());
    }

    #[tokio::test]
    async fn patch_errors() {
        let app = test_app().await;
        send(&app, "POST", "/movies/", Some(movie("Alien", "1979-05-25"))).await;
        let (_, aliens) = send(&app, "POST", "/movies/", Some(movie("Aliens", "1986-07-18"))).await;
        let id = aliens["id"].as_i64().unwrap();

        let (status, body) =
            send(&app, "PATCH", "/movies/9999", Some(json!({ "score": 10 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Movie with the given ID was not found.");

        let (status, _) =
            send(&app, "PATCH", &format!("/movies/{id}"), Some(json!({ "score": 101 }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/movies/{id}"),
            Some(json!({ "name": "Alien", "date": "1979-05-25" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, unchanged) = send(&app, "GET", &format!("/movies/{id}/"), None).await;
        assert_eq!(unchanged["name"], "Aliens");
    }

    #[tokio::test]
    async fn delete_missing_movie_is_not_found() {
        let app = test_app().await;
        let (status, body) = send(&app, "DELETE", "/movies/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Movie with the given ID was not found.");

        let (status, _) = send(&app, "GET", "/movies/abc/", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
