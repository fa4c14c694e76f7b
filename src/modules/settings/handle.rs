use actix_web::{get, patch, web, HttpRequest};

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::settings::{
        model::UpdateSettings, schema::MessagingSettingsEntity, service::SettingsService,
    },
    utils::ValidatedJson,
};

#[get("/settings")]
pub async fn get_settings(
    settings_svc: web::Data<SettingsService>,
    req: HttpRequest,
) -> Result<success::Success<MessagingSettingsEntity>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let settings = settings_svc.get(&user_id).await?;

    Ok(success::Success::ok(Some(settings)))
}

#[patch("/settings")]
pub async fn update_settings(
    settings_svc: web::Data<SettingsService>,
    ValidatedJson(body): ValidatedJson<UpdateSettings>,
    req: HttpRequest,
) -> Result<success::Success<MessagingSettingsEntity>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let settings = settings_svc.update(&user_id, body).await?;

    Ok(success::Success::ok(Some(settings)).message("Messaging settings updated"))
}
