/// Push endpoint
///
/// `GET /listen` upgrades to a WebSocket. The credential is checked once the
/// socket is up; a rejected client gets a policy-violation close and is never
/// registered. An accepted client is registered and owned by a local connection
/// task until it disconnects or something asks it to terminate.
use actix_web::{rt, web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason as WsCloseReason, MessageStream, Session};

use crate::auth;
use crate::state::AppState;
use crate::websocket::{own_connection, WsChannel};

pub async fn listen(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, stream) = actix_ws::handle(&req, body)?;

    let identity = match auth::authorize(&req, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(peer = ?req.peer_addr(), error = %e, "rejecting push connection");
            rt::spawn(reject(session, stream, e.to_string()));
            return Ok(response);
        }
    };

    let (channel, pump) = WsChannel::start(session, stream);
    let registration = match state.registry.register(Box::new(channel), identity).await {
        Ok(registration) => registration,
        Err(e) => {
            tracing::error!(error = %e, "failed to register push channel");
            return Ok(response);
        }
    };

    rt::spawn(own_connection(state.registry.clone(), registration, pump.run()));
    Ok(response)
}

async fn reject(session: Session, stream: MessageStream, description: String) {
    let reason = WsCloseReason {
        code: CloseCode::Policy,
        description: Some(description),
    };
    let _ = session.close(Some(reason)).await;
    drop(stream);
}
