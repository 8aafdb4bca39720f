/// Notification intake
///
/// `/notify` accepts every method so that an unauthenticated caller is told 403
/// before being told the method is wrong.
use actix_web::http::{header, Method};
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use serde_json::Value;

use crate::auth;
use crate::error::AppError;
use crate::models::{ApiResponse, NotificationRequest, RecipientSpec};
use crate::state::AppState;

const JSON_CONTENT_TYPE: &str = "application/json";
const MESSAGE_FIELD: &str = "message";
const RECIPIENT_FIELDS: [&str; 2] = ["receivers", "recipients"];

const MISSING_FIELD: &str = "Bad Request";
const UNPARSABLE: &str = "Unable to parse request";

pub async fn notify(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let caller = auth::authorize(&req, state.verifier.as_ref())?;

    if req.method() != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }

    let request = if req.content_type() == JSON_CONTENT_TYPE {
        parse_json_body(&body)?
    } else {
        parse_form_body(&body)?
    };

    tracing::info!(
        caller = %caller.subject,
        recipients = request.recipients.len(),
        "notification accepted"
    );
    state.queue.enqueue(request).await?;

    Ok(HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .json(ApiResponse::ok("success")))
}

/// `message=...&receivers=<json array>`
fn parse_form_body(body: &[u8]) -> Result<NotificationRequest, AppError> {
    let mut message = None;
    let mut recipients = None;

    for (key, value) in url::form_urlencoded::parse(body) {
        if key == MESSAGE_FIELD {
            message.get_or_insert_with(|| value.into_owned());
        } else if RECIPIENT_FIELDS.contains(&&*key) {
            recipients.get_or_insert_with(|| value.into_owned());
        }
    }

    let (Some(message), Some(recipients)) = (message, recipients) else {
        return Err(AppError::BadRequest(MISSING_FIELD.to_string()));
    };

    let recipients = NotificationRequest::parse_recipients(&recipients)
        .map_err(|e| unparsable(&e))?;
    Ok(NotificationRequest::new(recipients, message))
}

/// `{"message": "...", "receivers": [...]}`; the list may also arrive JSON-encoded as a string
fn parse_json_body(body: &[u8]) -> Result<NotificationRequest, AppError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| unparsable(&e))?;

    let message = value
        .get(MESSAGE_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest(MISSING_FIELD.to_string()))?;

    let raw = RECIPIENT_FIELDS
        .iter()
        .find_map(|field| value.get(*field))
        .ok_or_else(|| AppError::BadRequest(MISSING_FIELD.to_string()))?;

    let recipients: Vec<RecipientSpec> = match raw {
        Value::String(encoded) => NotificationRequest::parse_recipients(encoded),
        other => serde_json::from_value(other.clone()),
    }
    .map_err(|e| unparsable(&e))?;

    Ok(NotificationRequest::new(recipients, message))
}

fn unparsable(e: &serde_json::Error) -> AppError {
    tracing::debug!(error = %e, "rejecting undecodable notification body");
    AppError::BadRequest(UNPARSABLE.to_string())
}
