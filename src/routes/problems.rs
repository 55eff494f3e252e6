use actix_web::{HttpResponse, Responder, get, web};
use sqlx::sqlite::SqlitePool;

use super::ErrorResponse;
use crate::database as db;

#[get("/problems")]
pub async fn get_problems_handler(pool: web::Data<SqlitePool>) -> impl Responder {
    match db::fetch_problem_summaries(pool.get_ref()).await {
        Ok(problems) => HttpResponse::Ok().json(problems),
        Err(e) => {
            log::error!("Failed to list problems: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/problems/{id}")]
pub async fn get_problem_by_id_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let id = path.into_inner();
    match db::fetch_problem_detail(pool.get_ref(), id).await {
        Ok(Some(detail)) => HttpResponse::Ok().json(detail),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        }),
        Err(e) => {
            log::error!("Failed to fetch problem {id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}
