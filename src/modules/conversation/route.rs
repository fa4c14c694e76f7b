use actix_web::web::{scope, ServiceConfig};

use crate::modules::conversation::handle::*;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/conversations")
            .service(get_conversations)
            .service(create_conversation)
            .service(get_conversation)
            .service(update_conversation)
            .service(delete_conversation)
            .service(get_messages)
            .service(send_message)
            .service(mark_read),
    );
}
