use std::collections::HashMap;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use duet_db::models::MessageRow;
use duet_db::queries::timestamp_now;
use duet_gateway::dispatcher::Delivery;
use duet_types::api::{
    DeleteMessageRequest, MessagesResponse, SendMessageRequest, SendMessageResponse,
    SidebarResponse, StatusResponse,
};
use duet_types::events::GatewayEvent;

use crate::auth::{AppState, with_db};
use crate::error::{ApiError, path_id};
use crate::middleware::Claims;
use crate::rows::{message_from_row, user_from_row};

/// Everyone except the caller, plus how many unseen messages each of them sent the caller.
pub async fn get_users_for_sidebar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SidebarResponse>, ApiError> {
    let me = claims.sub.to_string();
    let (users, counts) = with_db(&state, move |db| {
        Ok((db.list_users_except(&me)?, db.unseen_counts(&me)?))
    })
    .await
    .map_err(ApiError::failed)?;

    let unseen_messages: HashMap<Uuid, u32> = counts
        .into_iter()
        .filter_map(|(sender, count)| match sender.parse() {
            Ok(id) => Some((id, count)),
            Err(e) => {
                warn!("Corrupt sender_id '{}' in unseen counts: {}", sender, e);
                None
            }
        })
        .collect();

    Ok(Json(SidebarResponse {
        success: true,
        users: users.into_iter().map(user_from_row).collect(),
        unseen_messages,
    }))
}

/// The whole conversation with `partner_id`. Reading it marks the partner's
/// messages to the caller as seen; the returned list predates that update.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let me = claims.sub.to_string();
    let partner = path_id(&partner_id)?.to_string();
    let rows = with_db(&state, move |db| {
        let rows = db.get_conversation(&me, &partner)?;
        db.mark_conversation_seen(&partner, &me)?;
        Ok(rows)
    })
    .await
    .map_err(ApiError::failed)?;

    Ok(Json(MessagesResponse {
        success: true,
        messages: rows.into_iter().map(message_from_row).collect(),
    }))
}

pub async fn mark_message_as_seen(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = path_id(&message_id)?.to_string();
    with_db(&state, move |db| db.mark_message_seen(&id))
        .await
        .map_err(ApiError::failed)?;

    Ok(Json(StatusResponse::ok()))
}

/// Persist a message to `receiver_id`, then push it to their socket if they are online.
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let receiver_id = path_id(&receiver_id)?;
    let text = req.text.filter(|t| !t.trim().is_empty());
    if text.is_none() && req.image.is_none() {
        return Err(ApiError::Failed("Message must contain text or an image".into()));
    }

    // Upload first: a failed upload must not leave a message behind.
    let image = match req.image.as_deref() {
        Some(data_url) => Some(state.images.upload(data_url).await.map_err(ApiError::failed)?),
        None => None,
    };

    let row = MessageRow {
        id: Uuid::new_v4().to_string(),
        sender_id: claims.sub.to_string(),
        receiver_id: receiver_id.to_string(),
        text,
        image,
        seen: false,
        created_at: timestamp_now(),
    };
    let insert = row.clone();
    with_db(&state, move |db| db.insert_message(&insert))
        .await
        .map_err(ApiError::failed)?;

    let message = message_from_row(row);
    let delivery = state
        .dispatcher
        .send_to_user(receiver_id, GatewayEvent::NewMessage(message.clone()))
        .await;
    debug!("message {} to {}: {:?}", message.id, receiver_id, delivery);

    Ok(Json(SendMessageResponse { success: true, new_message: message }))
}

/// Remove the whole conversation with `partner_id`, both directions.
pub async fn delete_all_messages(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StatusResponse>, ApiError> {
    let partner_id = path_id(&partner_id)?;
    let me = claims.sub.to_string();
    let partner = partner_id.to_string();
    let removed = with_db(&state, move |db| db.delete_conversation(&me, &partner))
        .await
        .map_err(|e| {
            error!("delete_conversation failed: {}", e);
            ApiError::Failed("Failed to delete messages.".into())
        })?;
    debug!("{} cleared {} messages with {}", claims.sub, removed, partner_id);

    state
        .dispatcher
        .send_to_user(partner_id, GatewayEvent::MessagesDeleted { by: claims.sub })
        .await;

    Ok(Json(StatusResponse::ok_with("All messages deleted.")))
}

/// Delete one message. Only its sender may do so.
///
/// The body may carry `{userId}`; when present it must name the caller.
pub async fn delete_message_by_id(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    // This route answers lookup failures with 500, malformed ids included.
    let message_id = path_id(&message_id).map_err(|e| ApiError::Internal(e.to_string()))?;
    let req: DeleteMessageRequest = if body.is_empty() {
        DeleteMessageRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Failed(format!("Invalid request body: {}", e)))?
    };

    let internal = |e: anyhow::Error| {
        error!("delete_message_by_id {} failed: {}", message_id, e);
        ApiError::Internal("Failed to delete message.".into())
    };

    let id = message_id.to_string();
    let row = with_db(&state, move |db| db.get_message(&id))
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound("Message not found.".into()))?;

    let requester = req.user_id.unwrap_or(claims.sub);
    if requester != claims.sub || row.sender_id != claims.sub.to_string() {
        return Err(ApiError::Forbidden("You can only delete your own messages.".into()));
    }

    let id = message_id.to_string();
    with_db(&state, move |db| db.delete_message(&id))
        .await
        .map_err(internal)?;

    let message = message_from_row(row);
    state
        .dispatcher
        .record_deletion(message_id, claims.sub, message.receiver_id)
        .await;
    if state
        .dispatcher
        .send_to_user(message.receiver_id, GatewayEvent::MessageDeleted { message_id })
        .await
        == Delivery::Offline
    {
        debug!("delete of {} not relayed, {} offline", message_id, message.receiver_id);
    }

    Ok(Json(StatusResponse::ok_with("Message deleted successfully.")))
}
