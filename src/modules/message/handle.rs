use actix_web::{delete, web, HttpRequest};
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::message::{model::DeleteMessageQuery, service::MessageService},
    utils::ValidatedQuery,
};

#[delete("/{message_id}")]
pub async fn delete_message(
    message_svc: web::Data<MessageService>,
    message_id: web::Path<Uuid>,
    ValidatedQuery(query): ValidatedQuery<DeleteMessageQuery>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    message_svc.delete(*message_id, user_id, query.for_everyone).await?;

    Ok(success::Success::ok(None).message("Message deleted"))
}
