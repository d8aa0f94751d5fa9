use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    mailer::OutboundEmail,
    state::AppState,
};

#[derive(Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(payload): Json<ContactRequest>,
) -> AppResult<StatusCode> {
    let name = payload.name.trim();
    let email = payload.email.trim();
    let subject = payload.subject.trim();
    let message = payload.message.trim();
    if name.is_empty() || email.is_empty() || subject.is_empty() || message.is_empty() {
        return Err(AppError::bad_request("all contact fields are required"));
    }
    if !email.contains('@') {
        return Err(AppError::bad_request("email is not valid"));
    }

    let recipient = state
        .config
        .contact_recipient
        .clone()
        .ok_or_else(|| AppError::internal("contact recipient is not configured"))?;

    let text = format!(
        "New contact form submission\n\nName: {name}\nEmail: {email}\nSubject: {subject}\n\n{message}\n",
    );
    let html = format!(
        "<h2>New contact form submission</h2>\
         <p><strong>Name:</strong> {name}</p>\
         <p><strong>Email:</strong> {email}</p>\
         <p><strong>Subject:</strong> {subject}</p>\
         <p>{message}</p>",
    );

    state
        .mailer
        .send(OutboundEmail {
            from: format!(
                "{} <{}>",
                state.config.contact_from_name, state.config.contact_from_email
            ),
            to: recipient,
            reply_to: Some(email.to_string()),
            subject: format!("[Contact] {subject}"),
            text,
            html: Some(html),
        })
        .await
        .map_err(AppError::from)?;

    Ok(StatusCode::NO_CONTENT)
}
