mod auth;
mod config;
mod db;
mod entity;
mod error;
mod likes;
mod policy;
mod response;
mod routes;
#[cfg(test)]
mod test_util;

use actix_web::{middleware, web, App, HttpServer};
use config::AppConfig;
use db::connect_db;
use log::info;
use response::json_error_handler;
use routes::{post, token, user};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let config = AppConfig::from_env();
    let db = connect_db(&config).await;
    let server_port = config.server_port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(db.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .wrap(actix_web::middleware::from_fn(routes::last_request::track_last_request))
            .wrap(actix_web::middleware::from_fn(routes::cors::cors_handler))
            .service(
                web::scope("/api")
                    .service(web::scope("/users").configure(user::config))
                    .service(web::scope("/posts").configure(post::config))
                    .service(web::scope("/token").configure(token::config)),
            )
    })
    .bind(("0.0.0.0", server_port))?;
    info!("server started at http://0.0.0.0:{}", server_port);
    server.run().await
}
