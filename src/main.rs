use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    self, App, HttpServer,
    middleware::{Logger, from_fn},
    web,
};
use std::sync::{Arc, LazyLock};

use crate::{
    configs::{RealtimeConfig, RedisCache, connect_database},
    middlewares::authentication,
    modules::{
        conversation::{repository_pg::ConversationPgRepository, service::ConversationService},
        delivery::service::DeliveryService,
        keys::repository_pg::KeyRepositoryPg,
        message::{repository_pg::MessageRepositoryPg, service::MessageService},
        settings::{repository_pg::SettingsRepositoryPg, service::SettingsService},
        websocket::{
            fanout::{Broadcaster, Fanout, run_subscriber},
            gateway::GatewayService,
            handler::websocket_handler,
            notifier::OfflineNotifier,
            presence::PresenceTracker,
            server::WebSocketServer,
            typing::TypingTracker,
        },
    },
};

mod api;
mod configs;
mod constants;
mod middlewares;
mod modules;
#[cfg(test)]
mod test;
mod utils;

pub static ENV: LazyLock<constants::Env> = LazyLock::new(|| {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();
    log::info!("Environment variables loaded from .env file");
    constants::Env::default()
});

#[actix_web::get("/")]
async fn health_check() -> &'static str {
    "Server is running"
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let db_pool = connect_database(&ENV)
        .await
        .map_err(|e| std::io::Error::other(format!("Database connection error: {e}")))?;

    let redis = Arc::new(
        RedisCache::new(&ENV.redis_url)
            .await
            .map_err(|e| std::io::Error::other(format!("Redis connection error: {e}")))?,
    );

    let config = RealtimeConfig::from_env(&ENV);

    let ws_server = WebSocketServer::new().start();
    let broadcaster: Arc<dyn Broadcaster + Send + Sync> =
        Arc::new(Fanout::new(ws_server.clone().recipient(), redis.clone(), &config));
    actix_web::rt::spawn(run_subscriber(
        ENV.redis_url.clone(),
        config.fanout_channel.clone(),
        config.instance_id,
        ws_server.clone().recipient(),
    ));

    let conversation_repo = Arc::new(ConversationPgRepository::new(db_pool.clone()));
    let message_repo = Arc::new(MessageRepositoryPg::new(db_pool.clone()));
    let settings_repo = Arc::new(SettingsRepositoryPg::new(db_pool.clone()));
    let key_repo = Arc::new(KeyRepositoryPg::new(db_pool.clone()));

    let presence = PresenceTracker::new(redis.clone(), &config);
    let typing = TypingTracker::new(redis.clone(), config.typing_ttl);
    let notifier = OfflineNotifier::new(presence.clone(), redis.clone(), &config);

    let conversation_service = ConversationService::with_dependencies(
        conversation_repo,
        message_repo.clone(),
        broadcaster.clone(),
    );
    let settings_service = SettingsService::with_dependencies(settings_repo, redis.clone());
    let message_service = MessageService::with_dependencies(
        message_repo.clone(),
        conversation_service.clone(),
        settings_service.clone(),
        key_repo.clone(),
        broadcaster.clone(),
        notifier,
    );
    let delivery_service = DeliveryService::with_dependencies(
        message_repo,
        conversation_service.clone(),
        settings_service.clone(),
        broadcaster.clone(),
    );
    let gateway = GatewayService::with_dependencies(
        ENV.jwt_secret.clone(),
        conversation_service.clone(),
        message_service.clone(),
        delivery_service.clone(),
        settings_service.clone(),
        key_repo,
        presence,
        typing,
        broadcaster,
        config,
    );

    log::info!("Starting server at http://{}:{}", ENV.ip.as_str(), ENV.port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&ENV.frontend_url)
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(ws_server.clone()))
            .app_data(web::Data::new(gateway.clone()))
            .app_data(web::Data::new(conversation_service.clone()))
            .app_data(web::Data::new(message_service.clone()))
            .app_data(web::Data::new(delivery_service.clone()))
            .app_data(web::Data::new(settings_service.clone()))
            .app_data(utils::path_config())
            .service(health_check)
            .service(websocket_handler)
            .service(
                web::scope("/api")
                    .wrap(from_fn(authentication))
                    .configure(modules::conversation::route::configure)
                    .configure(modules::message::route::configure),
            )
    })
    .bind((ENV.ip.as_str(), ENV.port))?
    .workers(ENV.workers)
    .run()
    .await
}
