use actix_web::{delete, get, patch, post, web, HttpRequest};
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::{
        conversation::{
            model::{
                ConversationPage, ConversationQuery, ConversationView, MarkReadRequest,
                NewConversation, UpdateConversation,
            },
            service::ConversationService,
        },
        delivery::{model::ReadOutcome, service::DeliveryService},
        message::{
            model::{MessagePage, MessageQuery, SendMessage},
            schema::MessageEntity,
            service::MessageService,
        },
    },
    utils::{ValidatedJson, ValidatedQuery},
};

#[get("")]
pub async fn get_conversations(
    conversation_svc: web::Data<ConversationService>,
    ValidatedQuery(query): ValidatedQuery<ConversationQuery>,
    req: HttpRequest,
) -> Result<success::Success<ConversationPage>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let page = conversation_svc.list_for_user(user_id, query).await?;

    Ok(success::Success::ok(Some(page)))
}

#[post("")]
pub async fn create_conversation(
    conversation_svc: web::Data<ConversationService>,
    ValidatedJson(body): ValidatedJson<NewConversation>,
    req: HttpRequest,
) -> Result<success::Success<ConversationView>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation = conversation_svc.create(user_id, body).await?;

    Ok(success::Success::created(Some(conversation)).message("Conversation ready"))
}

#[get("/{conversation_id}")]
pub async fn get_conversation(
    conversation_svc: web::Data<ConversationService>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<ConversationView>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation = conversation_svc.get_for_user(*conversation_id, user_id).await?;

    Ok(success::Success::ok(Some(conversation)))
}

#[patch("/{conversation_id}")]
pub async fn update_conversation(
    conversation_svc: web::Data<ConversationService>,
    conversation_id: web::Path<Uuid>,
    ValidatedJson(body): ValidatedJson<UpdateConversation>,
    req: HttpRequest,
) -> Result<success::Success<ConversationView>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversation = conversation_svc.update(*conversation_id, user_id, body).await?;

    Ok(success::Success::ok(Some(conversation)).message("Conversation updated"))
}

#[delete("/{conversation_id}")]
pub async fn delete_conversation(
    conversation_svc: web::Data<ConversationService>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    conversation_svc.delete_for_user(*conversation_id, user_id).await?;

    Ok(success::Success::ok(None).message("Conversation deleted"))
}

#[get("/{conversation_id}/messages")]
pub async fn get_messages(
    message_svc: web::Data<MessageService>,
    conversation_id: web::Path<Uuid>,
    ValidatedQuery(query): ValidatedQuery<MessageQuery>,
    req: HttpRequest,
) -> Result<success::Success<MessagePage>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let page = message_svc.list(*conversation_id, user_id, query).await?;

    Ok(success::Success::ok(Some(page)))
}

/// REST fallback for clients without a live socket; same fanout as
/// `message:send`, with no origin connection to skip.
#[post("/{conversation_id}/messages")]
pub async fn send_message(
    message_svc: web::Data<MessageService>,
    conversation_id: web::Path<Uuid>,
    ValidatedJson(body): ValidatedJson<SendMessage>,
    req: HttpRequest,
) -> Result<success::Success<MessageEntity>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let message = message_svc.send(user_id, *conversation_id, body, None).await?;

    Ok(success::Success::created(Some(message)).message("Message sent"))
}

#[post("/{conversation_id}/read")]
pub async fn mark_read(
    delivery_svc: web::Data<DeliveryService>,
    conversation_id: web::Path<Uuid>,
    ValidatedJson(body): ValidatedJson<MarkReadRequest>,
    req: HttpRequest,
) -> Result<success::Success<ReadOutcome>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let outcome =
        delivery_svc.acknowledge_read(*conversation_id, user_id, body.message_id).await?;

    Ok(success::Success::ok(Some(outcome)))
}
