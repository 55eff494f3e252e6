use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::ServerConfig;
use crate::queue::SubmissionQueue;
use crate::routes::{
    WaitTimeout, get_problem_by_id_handler, get_problems_handler, get_submission_by_id_handler,
    get_submissions_handler, json_error_handler, post_rejudge_handler, post_submission_handler,
    query_error_handler,
};

pub fn build_server(
    server_config: ServerConfig,
    db_pool: Arc<SqlitePool>,
    queue: Arc<SubmissionQueue>,
) -> std::io::Result<Server> {
    let db_pool = web::Data::from(db_pool);
    let queue = web::Data::from(queue);
    let wait_timeout = web::Data::new(WaitTimeout(Duration::from_secs(
        server_config.wait_timeout_s,
    )));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(queue.clone())
            .app_data(wait_timeout.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(get_problems_handler)
            .service(get_problem_by_id_handler)
            .service(post_submission_handler)
            .service(get_submissions_handler)
            .service(get_submission_by_id_handler)
            .service(post_rejudge_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
