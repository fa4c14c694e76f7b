use actix_web::web::{scope, ServiceConfig};

use crate::modules::message::handle::*;
use crate::modules::settings;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/messages").configure(settings::route::configure).service(delete_message),
    );
}
