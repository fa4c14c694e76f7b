use actix_web::web::ServiceConfig;

use crate::modules::settings::handle::*;

/// Mounted inside the `/messages` scope, ahead of the `/{message_id}` routes.
pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(get_settings).service(update_settings);
}
