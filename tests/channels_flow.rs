mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct ChannelInfo {
    id: Uuid,
    name: String,
}

#[derive(Deserialize)]
struct MessageInfo {
    content: String,
    attachments: Vec<AttachmentInfo>,
    grouped: bool,
    author: AuthorInfo,
}

#[derive(Deserialize)]
struct AttachmentInfo {
    kind: String,
    payload: String,
}

#[derive(Deserialize)]
struct AuthorInfo {
    id: Uuid,
    name: String,
}

#[derive(Deserialize)]
struct ChannelPage {
    items: Vec<ChannelInfo>,
    total: i64,
    total_pages: i64,
}

#[derive(Serialize)]
struct CreateChannel<'a> {
    name: &'a str,
}

async fn parse_channels(response: hyper::Response<axum::body::Body>) -> Result<Vec<ChannelInfo>> {
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[tokio::test]
async fn general_channel_is_provisioned_once_and_shared() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Ada", "ada@example.com", "password-one")
        .await?;
    app.insert_user("Ben", "ben@example.com", "password-two")
        .await?;
    let ada = app.login_token("ada@example.com", "password-one").await?;
    let ben = app.login_token("ben@example.com", "password-two").await?;

    let first = app.get("/api/channels", Some(&ada)).await?;
    assert_eq!(first.status(), StatusCode::OK);
    let ada_channels = parse_channels(first).await?;
    assert_eq!(ada_channels.len(), 1);
    assert_eq!(ada_channels[0].name, "General");

    // A second memberless user lands in the same channel, not a duplicate.
    let second = app.get("/api/channels", Some(&ben)).await?;
    let ben_channels = parse_channels(second).await?;
    assert_eq!(ben_channels.len(), 1);
    assert_eq!(ben_channels[0].id, ada_channels[0].id);

    // The ensure step is idempotent for repeat visitors.
    let again = app.get("/api/channels", Some(&ada)).await?;
    let ada_again = parse_channels(again).await?;
    assert_eq!(ada_again.len(), 1);
    assert_eq!(ada_again[0].id, ada_channels[0].id);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn message_validation_and_listing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let ada_id = app
        .insert_user("Ada", "ada@example.com", "password-one")
        .await?;
    let ada = app.login_token("ada@example.com", "password-one").await?;

    let created = app
        .post_json("/api/channels", &CreateChannel { name: "design" }, Some(&ada))
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_to_vec(created.into_body()).await?;
    let channel: ChannelInfo = serde_json::from_slice(&body)?;

    let empty = app
        .post_json(
            &format!("/api/channels/{}/messages", channel.id),
            &json!({ "content": "   " }),
            Some(&ada),
        )
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let first = app
        .post_json(
            &format!("/api/channels/{}/messages", channel.id),
            &json!({ "content": "hello" }),
            Some(&ada),
        )
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    // Attachment-only messages are valid.
    let attachment_only = app
        .post_json(
            &format!("/api/channels/{}/messages", channel.id),
            &json!({
                "content": "",
                "attachments": [{ "kind": "image", "payload": "aGVsbG8=" }],
            }),
            Some(&ada),
        )
        .await?;
    assert_eq!(attachment_only.status(), StatusCode::CREATED);

    let listing = app
        .get(&format!("/api/channels/{}/messages", channel.id), Some(&ada))
        .await?;
    assert_eq!(listing.status(), StatusCode::OK);
    let listing_body = body_to_vec(listing.into_body()).await?;
    let messages: Vec<MessageInfo> = serde_json::from_slice(&listing_body)?;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[0].author.id, ada_id);
    assert_eq!(messages[0].author.name, "Ada");
    assert!(!messages[0].grouped);
    // Same author within ten minutes collapses into a run.
    assert!(messages[1].grouped);
    assert_eq!(messages[1].attachments.len(), 1);
    assert_eq!(messages[1].attachments[0].kind, "image");
    assert_eq!(messages[1].attachments[0].payload, "aGVsbG8=");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn non_members_are_forbidden() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Ada", "ada@example.com", "password-one")
        .await?;
    let ben_id = app
        .insert_user("Ben", "ben@example.com", "password-two")
        .await?;
    let ada = app.login_token("ada@example.com", "password-one").await?;
    let ben = app.login_token("ben@example.com", "password-two").await?;

    let created = app
        .post_json("/api/channels", &CreateChannel { name: "private" }, Some(&ada))
        .await?;
    let body = body_to_vec(created.into_body()).await?;
    let channel: ChannelInfo = serde_json::from_slice(&body)?;

    let send = app
        .post_json(
            &format!("/api/channels/{}/messages", channel.id),
            &json!({ "content": "intruder" }),
            Some(&ben),
        )
        .await?;
    assert_eq!(send.status(), StatusCode::FORBIDDEN);

    let read = app
        .get(&format!("/api/channels/{}/messages", channel.id), Some(&ben))
        .await?;
    assert_eq!(read.status(), StatusCode::FORBIDDEN);

    let rename = app
        .patch_json(
            &format!("/api/channels/{}", channel.id),
            &json!({ "name": "stolen" }),
            Some(&ben),
        )
        .await?;
    assert_eq!(rename.status(), StatusCode::FORBIDDEN);

    let remove = app
        .delete(&format!("/api/channels/{}", channel.id), Some(&ben))
        .await?;
    assert_eq!(remove.status(), StatusCode::FORBIDDEN);

    let invite_self = app
        .post_json(
            &format!("/api/channels/{}/members", channel.id),
            &json!({ "user_id": ben_id }),
            Some(&ben),
        )
        .await?;
    assert_eq!(invite_self.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn add_member_grants_access() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Ada", "ada@example.com", "password-one")
        .await?;
    let ben_id = app
        .insert_user("Ben", "ben@example.com", "password-two")
        .await?;
    let ada = app.login_token("ada@example.com", "password-one").await?;
    let ben = app.login_token("ben@example.com", "password-two").await?;

    let created = app
        .post_json("/api/channels", &CreateChannel { name: "shared" }, Some(&ada))
        .await?;
    let body = body_to_vec(created.into_body()).await?;
    let channel: ChannelInfo = serde_json::from_slice(&body)?;

    let invite = app
        .post_json(
            &format!("/api/channels/{}/members", channel.id),
            &json!({ "user_id": ben_id }),
            Some(&ada),
        )
        .await?;
    assert_eq!(invite.status(), StatusCode::CREATED);

    let duplicate = app
        .post_json(
            &format!("/api/channels/{}/members", channel.id),
            &json!({ "user_id": ben_id }),
            Some(&ada),
        )
        .await?;
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .post_json(
            &format!("/api/channels/{}/members", channel.id),
            &json!({ "user_id": Uuid::new_v4() }),
            Some(&ada),
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let send = app
        .post_json(
            &format!("/api/channels/{}/messages", channel.id),
            &json!({ "content": "hi from Ben" }),
            Some(&ben),
        )
        .await?;
    assert_eq!(send.status(), StatusCode::CREATED);
    let send_body = body_to_vec(send.into_body()).await?;
    let message: MessageInfo = serde_json::from_slice(&send_body)?;
    assert_eq!(message.author.id, ben_id);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn channel_names_are_unique() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Ada", "ada@example.com", "password-one")
        .await?;
    app.insert_user("Ben", "ben@example.com", "password-two")
        .await?;
    let ada = app.login_token("ada@example.com", "password-one").await?;
    let ben = app.login_token("ben@example.com", "password-two").await?;

    let first = app
        .post_json("/api/channels", &CreateChannel { name: "design" }, Some(&ada))
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    // Uniqueness holds across users, not per user.
    let clash = app
        .post_json("/api/channels", &CreateChannel { name: "design" }, Some(&ben))
        .await?;
    assert_eq!(clash.status(), StatusCode::BAD_REQUEST);

    let blank = app
        .post_json("/api/channels", &CreateChannel { name: "  " }, Some(&ada))
        .await?;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn update_and_delete_channel() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Ada", "ada@example.com", "password-one")
        .await?;
    let ada = app.login_token("ada@example.com", "password-one").await?;

    let created = app
        .post_json("/api/channels", &CreateChannel { name: "temp" }, Some(&ada))
        .await?;
    let body = body_to_vec(created.into_body()).await?;
    let channel: ChannelInfo = serde_json::from_slice(&body)?;

    let renamed = app
        .patch_json(
            &format!("/api/channels/{}", channel.id),
            &json!({ "name": "renamed" }),
            Some(&ada),
        )
        .await?;
    assert_eq!(renamed.status(), StatusCode::OK);
    let renamed_body = body_to_vec(renamed.into_body()).await?;
    let renamed: ChannelInfo = serde_json::from_slice(&renamed_body)?;
    assert_eq!(renamed.name, "renamed");

    app.post_json(
        &format!("/api/channels/{}/messages", channel.id),
        &json!({ "content": "to be cascaded" }),
        Some(&ada),
    )
    .await?;

    let deleted = app
        .delete(&format!("/api/channels/{}", channel.id), Some(&ada))
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    // Membership went with the channel, so everything now hits the guard
    // instead of serving stale data.
    let stale_read = app
        .get(&format!("/api/channels/{}/messages", channel.id), Some(&ada))
        .await?;
    assert_eq!(stale_read.status(), StatusCode::FORBIDDEN);

    let gone = app
        .delete(&format!("/api/channels/{}", channel.id), Some(&ada))
        .await?;
    assert_eq!(gone.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn browse_paginates_and_searches() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Ada", "ada@example.com", "password-one")
        .await?;
    let ada = app.login_token("ada@example.com", "password-one").await?;

    for name in ["alpha", "beta", "gamma"] {
        let response = app
            .post_json("/api/channels", &CreateChannel { name }, Some(&ada))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let page = app
        .get("/api/channels/browse?page=1&page_size=2", Some(&ada))
        .await?;
    assert_eq!(page.status(), StatusCode::OK);
    let page_body = body_to_vec(page.into_body()).await?;
    let page: ChannelPage = serde_json::from_slice(&page_body)?;
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items.len(), 2);

    let filtered = app
        .get("/api/channels/browse?search=ALP", Some(&ada))
        .await?;
    let filtered_body = body_to_vec(filtered.into_body()).await?;
    let filtered: ChannelPage = serde_json::from_slice(&filtered_body)?;
    assert_eq!(filtered.total, 1);
    assert_eq!(filtered.items[0].name, "alpha");

    app.cleanup().await?;
    Ok(())
}
